//! Passcode generation and redemption.
//!
//! Passcodes are administrator-issued, single-use, and ownerless until
//! redeemed. Redemption marks the code used and grants premium in one
//! transaction; if either half fails nothing is observable.

use chrono::Duration;
use rand::Rng;
use rusqlite::{params, Connection, ErrorCode};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use super::store;
use super::types::{now_ms, Passcode, Redemption};
use super::{CreditError, PREMIUM_PERIOD_DAYS, PREMIUM_USE_ALLOTMENT};
use crate::roles::RoleCheck;

/// Suffix alphabet: letters and digits minus the easily-confused
/// 0/O and 1/I, 32 characters total.
const PASSCODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Random suffix length; 32^8 possible suffixes per prefix.
const SUFFIX_LEN: usize = 8;

const MAX_PREFIX_LEN: usize = 16;

/// Collisions among unused codes are vanishingly rare; a handful of
/// regeneration attempts is plenty before giving up.
const INSERT_ATTEMPTS: u32 = 4;

/// Administrator-issued single-use activation codes.
pub struct PasscodeRegistry {
    conn: Arc<Mutex<Connection>>,
    roles: Arc<dyn RoleCheck>,
}

impl PasscodeRegistry {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>, roles: Arc<dyn RoleCheck>) -> Self {
        Self { conn, roles }
    }

    /// Issue a new unused passcode of the form `PREFIX-XXXXXXXX`.
    ///
    /// Admin only. The prefix is trimmed, uppercased, and must be 1 to 16
    /// ASCII alphanumeric characters. Regenerates the suffix on the rare
    /// unique-index collision with another unused code.
    pub fn generate(&self, admin_id: &str, prefix: &str) -> Result<Passcode, CreditError> {
        if !self.roles.is_admin(admin_id) {
            return Err(CreditError::Unauthorized);
        }
        let prefix = normalize_prefix(prefix)?;

        let conn = self.conn.lock().unwrap();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let record = Passcode {
                id: Uuid::new_v4().to_string(),
                code: format!("{}-{}", prefix, random_suffix()),
                used: false,
                created_at: now_ms(),
            };

            match conn.execute(
                "INSERT INTO passcodes (id, code, used, created_at) VALUES (?1, ?2, 0, ?3)",
                params![record.id, record.code, record.created_at],
            ) {
                Ok(_) => {
                    debug!(id = record.id.as_str(), "Generated passcode");
                    return Ok(record);
                }
                Err(e) if is_unique_violation(&e) && attempt < INSERT_ATTEMPTS => {
                    warn!(attempt, "Passcode collision, regenerating suffix");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Redeem `submitted` for `user_id`, upgrading them to premium.
    ///
    /// The submitted code is trimmed and uppercased before matching. On
    /// success the code is marked used and the user's record is upserted
    /// with a fresh 30-day, 100-use premium grant, all in one transaction.
    /// Of N concurrent attempts on one code, exactly one succeeds.
    pub fn redeem(&self, user_id: &str, submitted: &str) -> Result<Redemption, CreditError> {
        let code = submitted.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(CreditError::NotFoundOrUsed);
        }

        let mut conn = self.conn.lock().unwrap();
        let now = now_ms();
        let expires_at = now + Duration::days(PREMIUM_PERIOD_DAYS).num_milliseconds();

        let tx = conn.transaction()?;

        let passcode_id: String = match tx.query_row(
            "SELECT id FROM passcodes WHERE code = ?1 AND used = 0",
            params![code],
            |row| row.get(0),
        ) {
            Ok(id) => id,
            // Same outcome whether the code never existed or was spent
            Err(rusqlite::Error::QueryReturnedNoRows) => return Err(CreditError::NotFoundOrUsed),
            Err(e) => return Err(e.into()),
        };

        tx.execute(
            "UPDATE passcodes SET used = 1 WHERE id = ?1",
            params![passcode_id],
        )?;

        tx.execute(
            "INSERT INTO user_credits
                 (user_id, premium_uses_remaining, premium_expires_at, passcode_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                 premium_uses_remaining = ?2,
                 premium_expires_at = ?3,
                 passcode_id = ?4",
            params![
                user_id,
                PREMIUM_USE_ALLOTMENT,
                expires_at,
                passcode_id,
                now
            ],
        )?;

        let record = store::load_user_credits(&tx, user_id)?;
        tx.commit()?;

        debug!(user = user_id, passcode = passcode_id.as_str(), "Redeemed passcode");
        Ok(Redemption {
            message: format!(
                "Premium activated! You have {} uses for the next {} days.",
                PREMIUM_USE_ALLOTMENT, PREMIUM_PERIOD_DAYS
            ),
            credits: record.to_info(now),
        })
    }

    /// All generated passcodes, newest first. Admin only.
    pub fn list(&self, admin_id: &str) -> Result<Vec<Passcode>, CreditError> {
        if !self.roles.is_admin(admin_id) {
            return Err(CreditError::Unauthorized);
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, code, used, created_at FROM passcodes ORDER BY created_at DESC, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Passcode {
                id: row.get(0)?,
                code: row.get(1)?,
                used: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete a passcode by id. Admin only.
    ///
    /// Deleting an unused code revokes it. Deleting a used code only drops
    /// the audit row; the grant it produced stays in force.
    pub fn delete(&self, admin_id: &str, passcode_id: &str) -> Result<(), CreditError> {
        if !self.roles.is_admin(admin_id) {
            return Err(CreditError::Unauthorized);
        }

        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM passcodes WHERE id = ?1", params![passcode_id])?;
        if deleted == 0 {
            return Err(CreditError::NotFoundOrUsed);
        }
        debug!(passcode = passcode_id, "Deleted passcode");
        Ok(())
    }
}

fn normalize_prefix(prefix: &str) -> Result<String, CreditError> {
    let prefix = prefix.trim();
    if prefix.is_empty()
        || prefix.len() > MAX_PREFIX_LEN
        || !prefix.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(CreditError::InvalidPrefix);
    }
    Ok(prefix.to_ascii_uppercase())
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| PASSCODE_ALPHABET[rng.gen_range(0..PASSCODE_ALPHABET.len())] as char)
        .collect()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}
