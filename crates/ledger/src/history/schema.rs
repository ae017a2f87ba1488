//! Schema management for the relational history backend.
//!
//! A thin hook the core treats as opaque: it creates the tables and indexes
//! a given schema version expects, but never drives a migration between
//! versions itself.

use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::Arc;

use crate::errors::LedgerError;

/// The schema version this crate's [`super::SqliteHistory`] knows how to
/// read and write.
pub const CURRENT_VERSION: i64 = 1;

const CREATE_SQL: &str = "
CREATE TABLE IF NOT EXISTS ledgers (
    id TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    total_unspent INTEGER NOT NULL,
    total_fees INTEGER NOT NULL,
    total_minted INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS outputs (
    id TEXT NOT NULL,
    ledger_id TEXT NOT NULL,
    amount INTEGER NOT NULL,
    lock_type TEXT NOT NULL,
    lock_owner TEXT,
    lock_pubkey TEXT,
    lock_custom_data TEXT,
    is_spent INTEGER NOT NULL,
    created_by TEXT,
    spent_by TEXT,
    PRIMARY KEY (ledger_id, id),
    FOREIGN KEY (ledger_id) REFERENCES ledgers(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS transactions (
    id TEXT NOT NULL,
    ledger_id TEXT NOT NULL,
    is_coinbase INTEGER NOT NULL,
    signed_by TEXT,
    fee INTEGER,
    coinbase_amount INTEGER,
    PRIMARY KEY (ledger_id, id),
    FOREIGN KEY (ledger_id) REFERENCES ledgers(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_outputs_spent ON outputs (ledger_id, is_spent);
CREATE INDEX IF NOT EXISTS idx_outputs_owner ON outputs (ledger_id, lock_owner);
CREATE INDEX IF NOT EXISTS idx_outputs_amount ON outputs (ledger_id, amount);
CREATE INDEX IF NOT EXISTS idx_outputs_created_by ON outputs (ledger_id, created_by);
CREATE INDEX IF NOT EXISTS idx_outputs_lock_type ON outputs (ledger_id, lock_type);
CREATE INDEX IF NOT EXISTS idx_transactions_coinbase ON transactions (ledger_id, is_coinbase);
";

/// Creates, inspects and drops the relational schema for one ledger id.
///
/// Not itself a migration engine: `create` is idempotent at
/// [`CURRENT_VERSION`], and a connection opened against an older or newer
/// version is the caller's problem to reconcile before use.
pub struct DatabaseSchema {
    conn: Arc<Mutex<Connection>>,
    ledger_id: String,
}

impl DatabaseSchema {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>, ledger_id: impl Into<String>) -> Self {
        DatabaseSchema {
            conn,
            ledger_id: ledger_id.into(),
        }
    }

    /// Creates the tables and indexes if absent, and seeds the `ledgers` row
    /// for this instance's ledger id if it isn't already present.
    pub fn create(&self) -> Result<(), LedgerError> {
        let conn = self.conn.lock();
        conn.execute_batch(CREATE_SQL)
            .map_err(LedgerError::persistence)?;
        conn.execute(
            "INSERT OR IGNORE INTO ledgers
                (id, version, total_unspent, total_fees, total_minted, created_at, updated_at)
             VALUES (?1, ?2, 0, 0, 0, strftime('%s','now'), strftime('%s','now'))",
            rusqlite::params![self.ledger_id, CURRENT_VERSION],
        )
        .map_err(LedgerError::persistence)?;
        Ok(())
    }

    /// True if the `ledgers` row for this instance's ledger id exists.
    pub fn exists(&self) -> Result<bool, LedgerError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT 1 FROM ledgers WHERE id = ?1",
            rusqlite::params![self.ledger_id],
            |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
        .map_err(LedgerError::persistence)
    }

    /// Drops this instance's ledger row (and, via `ON DELETE CASCADE`, its
    /// outputs and transactions).
    pub fn drop(&self) -> Result<(), LedgerError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM ledgers WHERE id = ?1",
            rusqlite::params![self.ledger_id],
        )
        .map_err(LedgerError::persistence)?;
        Ok(())
    }

    /// The schema version recorded for this instance's ledger id, if it
    /// exists.
    pub fn version(&self) -> Result<Option<i64>, LedgerError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT version FROM ledgers WHERE id = ?1",
            rusqlite::params![self.ledger_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(LedgerError::persistence)
    }
}

pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Arc<Mutex<Connection>> {
        Arc::new(Mutex::new(Connection::open_in_memory().unwrap()))
    }

    #[test]
    fn create_is_idempotent() {
        let schema = DatabaseSchema::new(conn(), "default");
        schema.create().unwrap();
        schema.create().unwrap();
        assert!(schema.exists().unwrap());
        assert_eq!(schema.version().unwrap(), Some(CURRENT_VERSION));
    }

    #[test]
    fn drop_removes_the_ledger_row() {
        let schema = DatabaseSchema::new(conn(), "default");
        schema.create().unwrap();
        schema.drop().unwrap();
        assert!(!schema.exists().unwrap());
    }
}
