//! SQLite-backed credit ledger.
//!
//! Owns the per-user usage record and the atomic consume path. The
//! check-then-decrement runs as one conditional UPDATE inside a
//! transaction, so two concurrent requests can never both spend the last
//! credit regardless of how callers interleave.

use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::store;
use super::types::{now_ms, CreditInfo, UserCredits};
use super::{CreditError, FREE_USE_LIMIT};
use crate::roles::RoleCheck;

/// Per-user credit accounting.
pub struct CreditLedger {
    conn: Arc<Mutex<Connection>>,
    roles: Arc<dyn RoleCheck>,
}

impl CreditLedger {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>, roles: Arc<dyn RoleCheck>) -> Self {
        Self { conn, roles }
    }

    /// Current entitlement view for a user.
    ///
    /// Premium status is recomputed from the expiry timestamp on every
    /// call. A user with no record yet is a fresh free-tier user; the row
    /// is only materialized on first consume.
    pub fn query(&self, user_id: &str) -> Result<CreditInfo, CreditError> {
        let conn = self.conn.lock().unwrap();
        match store::load_user_credits(&conn, user_id) {
            Ok(record) => Ok(record.to_info(now_ms())),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(CreditInfo::fresh()),
            Err(e) => Err(e.into()),
        }
    }

    /// Spend one credit for `user_id`, returning the post-spend view.
    ///
    /// Premium users draw from `premium_uses_remaining`; free-tier users
    /// draw from the lifetime allowance. `total_uses` increments on every
    /// success for audit. Fails with [`CreditError::Denied`] and mutates
    /// nothing when no quota is left.
    pub fn consume_one(&self, user_id: &str) -> Result<CreditInfo, CreditError> {
        let mut conn = self.conn.lock().unwrap();
        let now = now_ms();

        let tx = conn.transaction()?;

        // Materialize the row lazily; rolled back again if the spend is denied.
        tx.execute(
            "INSERT OR IGNORE INTO user_credits (user_id, created_at) VALUES (?1, ?2)",
            params![user_id, now],
        )?;

        // Single conditional update: the WHERE clause is the entitlement
        // check, so check and decrement cannot be split by another writer.
        let updated = tx.execute(
            "UPDATE user_credits SET
                 total_uses = total_uses + 1,
                 premium_uses_remaining = CASE
                     WHEN premium_expires_at IS NOT NULL AND premium_expires_at > ?2
                         THEN premium_uses_remaining - 1
                     ELSE premium_uses_remaining
                 END
             WHERE user_id = ?1 AND (
                 (premium_expires_at IS NOT NULL AND premium_expires_at > ?2
                     AND premium_uses_remaining > 0)
                 OR ((premium_expires_at IS NULL OR premium_expires_at <= ?2)
                     AND total_uses < ?3)
             )",
            params![user_id, now, FREE_USE_LIMIT],
        )?;

        if updated == 0 {
            // Dropping the transaction rolls back the lazy insert too.
            debug!(user = user_id, "Credit spend denied");
            return Err(CreditError::Denied);
        }

        let record = store::load_user_credits(&tx, user_id)?;
        tx.commit()?;

        let info = record.to_info(now);
        debug!(
            user = user_id,
            remaining = info.remaining,
            premium = info.is_premium,
            "Consumed one credit"
        );
        Ok(info)
    }

    /// Stored credit rows ordered by total uses, for the admin stats page.
    pub fn list_user_stats(
        &self,
        admin_id: &str,
        limit: usize,
    ) -> Result<Vec<UserCredits>, CreditError> {
        if !self.roles.is_admin(admin_id) {
            return Err(CreditError::Unauthorized);
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT user_id, total_uses, premium_uses_remaining, premium_expires_at,
                    passcode_id, created_at
             FROM user_credits
             ORDER BY total_uses DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(UserCredits {
                user_id: row.get(0)?,
                total_uses: row.get(1)?,
                premium_uses_remaining: row.get(2)?,
                premium_expires_at: row.get(3)?,
                passcode_id: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Force a user's premium fields, bypassing redemption (tests only).
    #[cfg(test)]
    pub(crate) fn set_premium_for_test(
        &self,
        user_id: &str,
        expires_at: i64,
        uses_remaining: i64,
    ) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user_credits (user_id, premium_uses_remaining, premium_expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id) DO UPDATE SET
                 premium_uses_remaining = ?2,
                 premium_expires_at = ?3",
            params![user_id, uses_remaining, expires_at, now_ms()],
        )
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credits::CreditState;
    use crate::roles::AdminList;
    use chrono::{Duration, Utc};

    fn state() -> CreditState {
        CreditState::open_in_memory(Arc::new(AdminList::new(["admin"]))).unwrap()
    }

    #[test]
    fn test_fresh_user_view() {
        let state = state();
        let info = state.ledger.query("newcomer").unwrap();
        assert_eq!(info, CreditInfo::fresh());

        // Query alone never materializes a row
        assert!(state
            .ledger
            .list_user_stats("admin", 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_free_tier_caps_at_three() {
        let state = state();
        let user = "free_user";

        for _ in 0..3 {
            state.ledger.consume_one(user).unwrap();
        }
        assert!(matches!(
            state.ledger.consume_one(user),
            Err(CreditError::Denied)
        ));
        // Denied call mutates nothing
        assert!(matches!(
            state.ledger.consume_one(user),
            Err(CreditError::Denied)
        ));
        assert_eq!(state.ledger.query(user).unwrap().total_uses, 3);
    }

    #[test]
    fn test_expired_premium_reads_as_free() {
        let state = state();
        let user = "lapsed";
        let past = (Utc::now() - Duration::days(1)).timestamp_millis();
        state.ledger.set_premium_for_test(user, past, 42);

        let info = state.ledger.query(user).unwrap();
        assert!(!info.is_premium);
        // Stored premium quota is ignored once expired
        assert_eq!(info.remaining, 3);
    }

    #[test]
    fn test_premium_with_zero_uses_is_denied() {
        let state = state();
        let user = "drained";
        let future = (Utc::now() + Duration::days(10)).timestamp_millis();
        state.ledger.set_premium_for_test(user, future, 0);

        let info = state.ledger.query(user).unwrap();
        assert!(info.is_premium);
        assert!(!info.can_use);
        assert!(matches!(
            state.ledger.consume_one(user),
            Err(CreditError::Denied)
        ));
    }

    #[test]
    fn test_premium_consume_decrements_and_audits() {
        let state = state();
        let user = "vip";
        let future = (Utc::now() + Duration::days(10)).timestamp_millis();
        state.ledger.set_premium_for_test(user, future, 2);

        let info = state.ledger.consume_one(user).unwrap();
        assert!(info.is_premium);
        assert_eq!(info.remaining, 1);
        assert_eq!(info.total_uses, 1);

        let info = state.ledger.consume_one(user).unwrap();
        assert_eq!(info.remaining, 0);
        assert!(!info.can_use);
        assert!(matches!(
            state.ledger.consume_one(user),
            Err(CreditError::Denied)
        ));
    }

    #[test]
    fn test_last_credit_cannot_be_double_spent() {
        let state = Arc::new(state());
        let user = "contended";

        // Burn down to exactly one remaining credit
        state.ledger.consume_one(user).unwrap();
        state.ledger.consume_one(user).unwrap();
        assert_eq!(state.ledger.query(user).unwrap().remaining, 1);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let state = Arc::clone(&state);
            handles.push(std::thread::spawn(move || {
                match state.ledger.consume_one("contended") {
                    Ok(_) => true,
                    Err(CreditError::Denied) => false,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }));
        }

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);

        let info = state.ledger.query(user).unwrap();
        assert_eq!(info.remaining, 0);
        assert_eq!(info.total_uses, 3);
    }

    #[test]
    fn test_stats_require_admin() {
        let state = state();
        state.ledger.consume_one("someone").unwrap();

        assert!(matches!(
            state.ledger.list_user_stats("someone", 10),
            Err(CreditError::Unauthorized)
        ));

        let stats = state.ledger.list_user_stats("admin", 10).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].user_id, "someone");
        assert_eq!(stats[0].total_uses, 1);
    }

    #[test]
    fn test_stats_ordered_by_usage_and_bounded() {
        let state = state();
        state.ledger.consume_one("light").unwrap();
        for _ in 0..3 {
            state.ledger.consume_one("heavy").unwrap();
        }
        state.ledger.consume_one("medium").unwrap();
        state.ledger.consume_one("medium").unwrap();

        let stats = state.ledger.list_user_stats("admin", 2).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].user_id, "heavy");
        assert_eq!(stats[1].user_id, "medium");
    }
}
