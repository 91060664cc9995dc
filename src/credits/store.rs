//! SQLite store shared by the ledger and registry.
//!
//! Both tables live in one database so redemption can touch them in a
//! single transaction. Timestamps are unix milliseconds (INTEGER) to keep
//! expiry comparisons inside SQL.

use rusqlite::{params, Connection};
use std::path::Path;

use super::types::UserCredits;
use super::CreditError;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS passcodes (
        id TEXT PRIMARY KEY,
        code TEXT NOT NULL,
        used INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    );

    -- Uniqueness is only required among codes still open for redemption.
    CREATE UNIQUE INDEX IF NOT EXISTS idx_passcodes_unused_code
        ON passcodes(code) WHERE used = 0;

    CREATE TABLE IF NOT EXISTS user_credits (
        user_id TEXT PRIMARY KEY,
        total_uses INTEGER NOT NULL DEFAULT 0,
        premium_uses_remaining INTEGER NOT NULL DEFAULT 0,
        premium_expires_at INTEGER,
        passcode_id TEXT REFERENCES passcodes(id),
        created_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_user_credits_total_uses
        ON user_credits(total_uses DESC);
"#;

/// Open (or create) the database at `path` and ensure the schema exists.
pub(crate) fn open(path: &Path) -> Result<Connection, CreditError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

pub(crate) fn open_in_memory() -> Result<Connection, CreditError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Load a user's credit row. Returns `QueryReturnedNoRows` when the record
/// has not been materialized yet; callers decide how to treat that.
pub(crate) fn load_user_credits(
    conn: &Connection,
    user_id: &str,
) -> rusqlite::Result<UserCredits> {
    conn.query_row(
        "SELECT user_id, total_uses, premium_uses_remaining, premium_expires_at,
                passcode_id, created_at
         FROM user_credits WHERE user_id = ?1",
        params![user_id],
        |row| {
            Ok(UserCredits {
                user_id: row.get(0)?,
                total_uses: row.get(1)?,
                premium_uses_remaining: row.get(2)?,
                premium_expires_at: row.get(3)?,
                passcode_id: row.get(4)?,
                created_at: row.get(5)?,
            })
        },
    )
}
