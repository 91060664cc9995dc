//! Credit and passcode data types.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::FREE_USE_LIMIT;

/// Current time as unix milliseconds, the unit all expiry columns use.
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Errors produced by the credit ledger and passcode registry.
///
/// `Denied` and `NotFoundOrUsed` are expected user-facing outcomes the
/// caller branches on, not faults. Only `Store` and `Io` are worth a retry.
#[derive(Debug, thiserror::Error)]
pub enum CreditError {
    /// Quota exhausted. Deliberately carries no detail beyond the upgrade
    /// message so callers cannot leak how close a user is to a limit.
    #[error("No credits remaining. Upgrade to Premium for 100 monthly uses!")]
    Denied,

    /// One message for both "never existed" and "already used" so the
    /// response is not a code-guessing oracle.
    #[error("Invalid or already used passcode")]
    NotFoundOrUsed,

    /// Non-admin invoking an admin-only operation.
    #[error("Administrator role required")]
    Unauthorized,

    /// Generation prefix failed validation (empty, too long, or not ASCII
    /// alphanumeric).
    #[error("Invalid passcode prefix")]
    InvalidPrefix,

    /// Underlying store failure; safe to retry because every operation is
    /// all-or-nothing.
    #[error("Credit store unavailable: {0}")]
    Store(#[from] rusqlite::Error),

    /// Could not create or open the database file.
    #[error("Failed to open credit store: {0}")]
    Io(#[from] std::io::Error),
}

impl CreditError {
    /// Whether the caller may retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Io(_))
    }
}

/// Entitlement view rendered by the credit badge and upgrade prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditInfo {
    pub can_use: bool,
    pub remaining: i64,
    pub is_premium: bool,
    pub total_uses: i64,
}

impl CreditInfo {
    /// View for a user with no stored record yet.
    pub(crate) fn fresh() -> Self {
        Self {
            can_use: true,
            remaining: FREE_USE_LIMIT,
            is_premium: false,
            total_uses: 0,
        }
    }
}

/// A user's stored credit row, as shown on the admin stats page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCredits {
    pub user_id: String,
    pub total_uses: i64,
    pub premium_uses_remaining: i64,
    /// Unix milliseconds; premium is active iff this is set and in the future.
    pub premium_expires_at: Option<i64>,
    /// Id of the passcode that granted the current premium period.
    pub passcode_id: Option<String>,
    pub created_at: i64,
}

impl UserCredits {
    /// Premium status is always derived from the expiry timestamp at read
    /// time, never stored as its own flag.
    pub fn is_premium(&self, now_ms: i64) -> bool {
        self.premium_expires_at.map_or(false, |at| at > now_ms)
    }

    /// Remaining credits under the tier active at `now_ms`.
    pub fn remaining(&self, now_ms: i64) -> i64 {
        if self.is_premium(now_ms) {
            self.premium_uses_remaining
        } else {
            (FREE_USE_LIMIT - self.total_uses).max(0)
        }
    }

    pub(crate) fn to_info(&self, now_ms: i64) -> CreditInfo {
        let remaining = self.remaining(now_ms);
        CreditInfo {
            can_use: remaining > 0,
            remaining,
            is_premium: self.is_premium(now_ms),
            total_uses: self.total_uses,
        }
    }
}

/// A single-use premium activation code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Passcode {
    pub id: String,
    pub code: String,
    pub used: bool,
    pub created_at: i64,
}

/// Successful redemption: confirmation text plus the refreshed view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    pub message: String,
    pub credits: CreditInfo,
}
