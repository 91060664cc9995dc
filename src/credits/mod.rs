//! Credit metering and passcode redemption.
//!
//! This module handles:
//! - Per-user credit accounting (free tier: 3 lifetime uses)
//! - Premium entitlement derived from an expiry timestamp
//! - Single-use passcode generation and redemption
//! - Admin listings for passcodes and user stats

mod ledger;
mod registry;
mod store;
mod types;

pub use ledger::CreditLedger;
pub use registry::PasscodeRegistry;
pub use types::{CreditError, CreditInfo, Passcode, Redemption, UserCredits};

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::roles::RoleCheck;

/// Lifetime metered actions available on the free tier.
pub const FREE_USE_LIMIT: i64 = 3;

/// Uses granted by each successful passcode redemption.
pub const PREMIUM_USE_ALLOTMENT: i64 = 100;

/// Length of the premium period granted by a redemption.
pub const PREMIUM_PERIOD_DAYS: i64 = 30;

/// Credit state shared by all feature surfaces.
///
/// The ledger and registry operate on the same database so a redemption can
/// mark the passcode used and grant premium in one transaction.
pub struct CreditState {
    pub ledger: CreditLedger,
    pub registry: PasscodeRegistry,
}

impl CreditState {
    /// Open (or create) the credit database at `path`.
    pub fn open(path: impl AsRef<Path>, roles: Arc<dyn RoleCheck>) -> Result<Self, CreditError> {
        let conn = store::open(path.as_ref())?;
        Ok(Self::from_connection(conn, roles))
    }

    /// Open an in-memory store. Nothing survives the process; used in tests
    /// and by embedders that persist elsewhere.
    pub fn open_in_memory(roles: Arc<dyn RoleCheck>) -> Result<Self, CreditError> {
        let conn = store::open_in_memory()?;
        Ok(Self::from_connection(conn, roles))
    }

    fn from_connection(conn: rusqlite::Connection, roles: Arc<dyn RoleCheck>) -> Self {
        let conn = Arc::new(Mutex::new(conn));
        Self {
            ledger: CreditLedger::new(Arc::clone(&conn), Arc::clone(&roles)),
            registry: PasscodeRegistry::new(conn, roles),
        }
    }
}
