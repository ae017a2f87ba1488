//! SQLite-backed [`HistoryRepository`], grounded on the teacher's
//! `storage/sqlite.rs`: a single `Mutex`-guarded connection, explicit schema,
//! and atomic writes via `Connection::transaction`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::errors::LedgerError;
use crate::ids::{OutputId, TxId};
use crate::lock::Lock;
use crate::output::Output;
use crate::registry;
use crate::tx::{CoinbaseTx, Tx};
use crate::Amount;

use super::schema::{DatabaseSchema, OptionalExt};
use super::{HistoryRepository, OutputHistory, OutputStatus};

const LEDGER_ID: &str = "default";

/// A relational history backend over a single SQLite connection.
///
/// Operates on one implicit ledger row (`id = "default"`); the `ledger_id`
/// column exists because the schema is contractual (§4.4) and multi-ledger
/// callers may reuse the same database file.
pub struct SqliteHistory {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistory {
    /// Opens an in-memory SQLite database and creates the schema.
    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory().map_err(LedgerError::persistence)?;
        Self::with_connection(conn)
    }

    /// Opens (or creates) a file-backed SQLite database and creates the
    /// schema.
    pub fn open(path: &str) -> Result<Self, LedgerError> {
        let conn = Connection::open(path).map_err(LedgerError::persistence)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, LedgerError> {
        let conn = Arc::new(Mutex::new(conn));
        let history = SqliteHistory { conn };
        history.schema().create()?;
        Ok(history)
    }

    /// The schema-management collaborator for this connection's ledger row.
    pub fn schema(&self) -> DatabaseSchema {
        DatabaseSchema::new(self.conn.clone(), LEDGER_ID)
    }

    fn adjust_totals(
        conn: &Connection,
        unspent_delta: i64,
        fee_delta: i64,
        minted_delta: i64,
    ) -> Result<(), LedgerError> {
        conn.execute(
            "UPDATE ledgers
             SET total_unspent = total_unspent + ?1,
                 total_fees = total_fees + ?2,
                 total_minted = total_minted + ?3,
                 updated_at = strftime('%s','now')
             WHERE id = ?4",
            params![unspent_delta, fee_delta, minted_delta, LEDGER_ID],
        )
        .map_err(LedgerError::persistence)?;
        Ok(())
    }
}

fn lock_columns(lock: &Lock) -> (String, Option<String>, Option<String>, Option<String>) {
    use crate::lock::OutputLock;
    match lock {
        Lock::None => ("none".to_string(), None, None, None),
        Lock::Owner { name } => ("owner".to_string(), Some(name.clone()), None, None),
        Lock::PublicKey { key } => ("pubkey".to_string(), None, Some(key.clone()), None),
        other => {
            let canonical = other.to_canonical();
            let tag = canonical
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            let data = serde_json::to_string(&canonical).expect("canonical lock always serializes");
            (tag, None, None, Some(data))
        }
    }
}

fn row_to_lock(
    lock_type: &str,
    lock_owner: Option<String>,
    lock_pubkey: Option<String>,
    lock_custom_data: Option<String>,
) -> Result<Lock, LedgerError> {
    match lock_type {
        "none" => Ok(Lock::None),
        "owner" => {
            let name = lock_owner
                .ok_or_else(|| LedgerError::Internal("owner lock row missing lock_owner".into()))?;
            Ok(Lock::owner(name))
        }
        "pubkey" => {
            let key = lock_pubkey
                .ok_or_else(|| LedgerError::Internal("pubkey lock row missing lock_pubkey".into()))?;
            Ok(Lock::public_key(key))
        }
        other => {
            let data = lock_custom_data.ok_or_else(|| {
                LedgerError::Internal(format!("unknown lock_type {other:?} with no custom data"))
            })?;
            let value: serde_json::Value =
                serde_json::from_str(&data).map_err(LedgerError::persistence)?;
            let map = value
                .as_object()
                .ok_or_else(|| LedgerError::Internal("lock_custom_data must be a JSON object".into()))?;
            registry::from_canonical_global(map)
        }
    }
}

struct OutputRow {
    id: String,
    amount: i64,
    lock_type: String,
    lock_owner: Option<String>,
    lock_pubkey: Option<String>,
    lock_custom_data: Option<String>,
    is_spent: bool,
    created_by: Option<String>,
    spent_by: Option<String>,
}

fn row_to_output(row: &OutputRow) -> Result<Output, LedgerError> {
    let lock = row_to_lock(
        &row.lock_type,
        row.lock_owner.clone(),
        row.lock_pubkey.clone(),
        row.lock_custom_data.clone(),
    )?;
    Output::with_id(row.id.clone(), row.amount, lock)
}

#[async_trait::async_trait]
impl HistoryRepository for SqliteHistory {
    async fn save_transaction(
        &self,
        tx: &Tx,
        fee: Amount,
        spent_payloads: &[Output],
    ) -> Result<(), LedgerError> {
        let mut conn = self.conn.lock();
        let sql_tx = conn.transaction().map_err(LedgerError::persistence)?;

        // Mark spends before inserting the new outputs: §4.1 step 5 and §8
        // both require that an id spent and reintroduced within the same
        // transaction is allowed, which means the row for that id already
        // exists (unspent) when this call starts. Updating it to spent
        // first, then `INSERT OR REPLACE`-ing the fresh row, leaves the
        // reused id `is_spent = 0` either way; doing it in the other order
        // would collide with the `PRIMARY KEY (ledger_id, id)` on a plain
        // `INSERT`.
        for payload in spent_payloads {
            sql_tx
                .execute(
                    "UPDATE outputs SET is_spent = 1, spent_by = ?1
                     WHERE ledger_id = ?2 AND id = ?3",
                    params![tx.id().as_str(), LEDGER_ID, payload.id().as_str()],
                )
                .map_err(LedgerError::persistence)?;
        }

        for output in tx.outputs() {
            let (lock_type, lock_owner, lock_pubkey, lock_custom_data) = lock_columns(output.lock());
            sql_tx
                .execute(
                    "INSERT OR REPLACE INTO outputs
                        (id, ledger_id, amount, lock_type, lock_owner, lock_pubkey, lock_custom_data,
                         is_spent, created_by, spent_by)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, NULL)",
                    params![
                        output.id().as_str(),
                        LEDGER_ID,
                        output.amount().value(),
                        lock_type,
                        lock_owner,
                        lock_pubkey,
                        lock_custom_data,
                        tx.id().as_str(),
                    ],
                )
                .map_err(LedgerError::persistence)?;
        }

        sql_tx
            .execute(
                "INSERT INTO transactions (id, ledger_id, is_coinbase, signed_by, fee, coinbase_amount)
                 VALUES (?1, ?2, 0, ?3, ?4, NULL)",
                params![tx.id().as_str(), LEDGER_ID, tx.signed_by(), fee.value()],
            )
            .map_err(LedgerError::persistence)?;

        let created_total: i64 = tx
            .outputs()
            .iter()
            .map(|o| o.amount().value())
            .sum();
        let spent_total: i64 = spent_payloads.iter().map(|o| o.amount().value()).sum();
        Self::adjust_totals(&sql_tx, created_total - spent_total, fee.value(), 0)?;

        sql_tx.commit().map_err(LedgerError::persistence)?;
        Ok(())
    }

    async fn save_coinbase(&self, cb: &CoinbaseTx) -> Result<(), LedgerError> {
        let mut conn = self.conn.lock();
        let sql_tx = conn.transaction().map_err(LedgerError::persistence)?;

        for output in cb.outputs() {
            let (lock_type, lock_owner, lock_pubkey, lock_custom_data) = lock_columns(output.lock());
            sql_tx
                .execute(
                    "INSERT INTO outputs
                        (id, ledger_id, amount, lock_type, lock_owner, lock_pubkey, lock_custom_data,
                         is_spent, created_by, spent_by)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, NULL)",
                    params![
                        output.id().as_str(),
                        LEDGER_ID,
                        output.amount().value(),
                        lock_type,
                        lock_owner,
                        lock_pubkey,
                        lock_custom_data,
                        cb.id().as_str(),
                    ],
                )
                .map_err(LedgerError::persistence)?;
        }

        let minted = cb
            .minted_amount()
            .ok_or_else(|| LedgerError::Internal("coinbase amount overflow".into()))?;

        sql_tx
            .execute(
                "INSERT INTO transactions (id, ledger_id, is_coinbase, signed_by, fee, coinbase_amount)
                 VALUES (?1, ?2, 1, NULL, NULL, ?3)",
                params![cb.id().as_str(), LEDGER_ID, minted.value()],
            )
            .map_err(LedgerError::persistence)?;

        Self::adjust_totals(&sql_tx, minted.value(), 0, minted.value())?;

        sql_tx.commit().map_err(LedgerError::persistence)?;
        Ok(())
    }

    async fn save_genesis(&self, outputs: &[Output]) -> Result<(), LedgerError> {
        let mut conn = self.conn.lock();
        let sql_tx = conn.transaction().map_err(LedgerError::persistence)?;

        for output in outputs {
            let (lock_type, lock_owner, lock_pubkey, lock_custom_data) = lock_columns(output.lock());
            sql_tx
                .execute(
                    "INSERT INTO outputs
                        (id, ledger_id, amount, lock_type, lock_owner, lock_pubkey, lock_custom_data,
                         is_spent, created_by, spent_by)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 'genesis', NULL)",
                    params![
                        output.id().as_str(),
                        LEDGER_ID,
                        output.amount().value(),
                        lock_type,
                        lock_owner,
                        lock_pubkey,
                        lock_custom_data,
                    ],
                )
                .map_err(LedgerError::persistence)?;
        }

        let total: i64 = outputs.iter().map(|o| o.amount().value()).sum();
        Self::adjust_totals(&sql_tx, total, 0, 0)?;

        sql_tx.commit().map_err(LedgerError::persistence)?;
        Ok(())
    }

    async fn find_spent_output(&self, id: &OutputId) -> Result<Option<Output>, LedgerError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, amount, lock_type, lock_owner, lock_pubkey, lock_custom_data,
                        is_spent, created_by, spent_by
                 FROM outputs WHERE ledger_id = ?1 AND id = ?2 AND is_spent = 1",
                params![LEDGER_ID, id.as_str()],
                parse_output_row,
            )
            .optional()
            .map_err(LedgerError::persistence)?;
        row.map(|r| row_to_output(&r)).transpose()
    }

    async fn find_output_history(&self, id: &OutputId) -> Result<Option<OutputHistory>, LedgerError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, amount, lock_type, lock_owner, lock_pubkey, lock_custom_data,
                        is_spent, created_by, spent_by
                 FROM outputs WHERE ledger_id = ?1 AND id = ?2",
                params![LEDGER_ID, id.as_str()],
                parse_output_row,
            )
            .optional()
            .map_err(LedgerError::persistence)?;

        let Some(row) = row else { return Ok(None) };
        let lock = row_to_lock(
            &row.lock_type,
            row.lock_owner.clone(),
            row.lock_pubkey.clone(),
            row.lock_custom_data.clone(),
        )?;
        Ok(Some(OutputHistory {
            id: id.clone(),
            amount: row.amount.into(),
            lock,
            created_by: row.created_by,
            spent_by: row.spent_by.map(TxId::new).transpose()?,
            status: if row.is_spent {
                OutputStatus::Spent
            } else {
                OutputStatus::Unspent
            },
        }))
    }

    async fn find_output_created_by(&self, id: &OutputId) -> Result<Option<String>, LedgerError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT created_by FROM outputs WHERE ledger_id = ?1 AND id = ?2",
            params![LEDGER_ID, id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(LedgerError::persistence)
    }

    async fn find_output_spent_by(&self, id: &OutputId) -> Result<Option<TxId>, LedgerError> {
        let conn = self.conn.lock();
        let spent_by: Option<String> = conn
            .query_row(
                "SELECT spent_by FROM outputs WHERE ledger_id = ?1 AND id = ?2",
                params![LEDGER_ID, id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(LedgerError::persistence)?
            .flatten();
        spent_by.map(TxId::new).transpose()
    }

    async fn find_fee_for_tx(&self, id: &TxId) -> Result<Option<Amount>, LedgerError> {
        let conn = self.conn.lock();
        let fee: Option<i64> = conn
            .query_row(
                "SELECT fee FROM transactions WHERE ledger_id = ?1 AND id = ?2 AND is_coinbase = 0",
                params![LEDGER_ID, id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(LedgerError::persistence)?
            .flatten();
        Ok(fee.map(Amount::from))
    }

    async fn find_all_tx_fees(&self) -> Result<HashMap<TxId, Amount>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, fee FROM transactions
                 WHERE ledger_id = ?1 AND is_coinbase = 0 AND fee IS NOT NULL",
            )
            .map_err(LedgerError::persistence)?;
        let rows = stmt
            .query_map(params![LEDGER_ID], |row| {
                let id: String = row.get(0)?;
                let fee: i64 = row.get(1)?;
                Ok((id, fee))
            })
            .map_err(LedgerError::persistence)?;

        let mut result = HashMap::new();
        for row in rows {
            let (id, fee) = row.map_err(LedgerError::persistence)?;
            result.insert(TxId::new(id)?, Amount::from(fee));
        }
        Ok(result)
    }

    async fn is_coinbase(&self, id: &TxId) -> Result<bool, LedgerError> {
        let conn = self.conn.lock();
        let flag: Option<i64> = conn
            .query_row(
                "SELECT is_coinbase FROM transactions WHERE ledger_id = ?1 AND id = ?2",
                params![LEDGER_ID, id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(LedgerError::persistence)?;
        Ok(flag == Some(1))
    }

    async fn find_coinbase_amount(&self, id: &TxId) -> Result<Option<Amount>, LedgerError> {
        let conn = self.conn.lock();
        let amount: Option<i64> = conn
            .query_row(
                "SELECT coinbase_amount FROM transactions
                 WHERE ledger_id = ?1 AND id = ?2 AND is_coinbase = 1",
                params![LEDGER_ID, id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(LedgerError::persistence)?
            .flatten();
        Ok(amount.map(Amount::from))
    }

    async fn find_unspent_by_owner(&self, name: &str) -> Result<Vec<Output>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, amount, lock_type, lock_owner, lock_pubkey, lock_custom_data,
                        is_spent, created_by, spent_by
                 FROM outputs WHERE ledger_id = ?1 AND is_spent = 0 AND lock_owner = ?2",
            )
            .map_err(LedgerError::persistence)?;
        collect_outputs(&mut stmt, params![LEDGER_ID, name])
    }

    async fn find_unspent_by_amount_range(
        &self,
        min: Amount,
        max: Option<Amount>,
    ) -> Result<Vec<Output>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, amount, lock_type, lock_owner, lock_pubkey, lock_custom_data,
                        is_spent, created_by, spent_by
                 FROM outputs
                 WHERE ledger_id = ?1 AND is_spent = 0 AND amount >= ?2
                       AND (?3 IS NULL OR amount <= ?3)",
            )
            .map_err(LedgerError::persistence)?;
        collect_outputs(
            &mut stmt,
            params![LEDGER_ID, min.value(), max.map(|m| m.value())],
        )
    }

    async fn find_unspent_by_lock_type(&self, lock_type: &str) -> Result<Vec<Output>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, amount, lock_type, lock_owner, lock_pubkey, lock_custom_data,
                        is_spent, created_by, spent_by
                 FROM outputs WHERE ledger_id = ?1 AND is_spent = 0 AND lock_type = ?2",
            )
            .map_err(LedgerError::persistence)?;
        collect_outputs(&mut stmt, params![LEDGER_ID, lock_type])
    }

    async fn find_outputs_created_by(&self, tx_id: &TxId) -> Result<Vec<Output>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, amount, lock_type, lock_owner, lock_pubkey, lock_custom_data,
                        is_spent, created_by, spent_by
                 FROM outputs WHERE ledger_id = ?1 AND created_by = ?2",
            )
            .map_err(LedgerError::persistence)?;
        collect_outputs(&mut stmt, params![LEDGER_ID, tx_id.as_str()])
    }

    async fn find_all_spent_outputs(&self) -> Result<Vec<Output>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, amount, lock_type, lock_owner, lock_pubkey, lock_custom_data,
                        is_spent, created_by, spent_by
                 FROM outputs WHERE ledger_id = ?1 AND is_spent = 1",
            )
            .map_err(LedgerError::persistence)?;
        collect_outputs(&mut stmt, params![LEDGER_ID])
    }

    async fn count_unspent(&self) -> Result<usize, LedgerError> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM outputs WHERE ledger_id = ?1 AND is_spent = 0",
                params![LEDGER_ID],
                |row| row.get(0),
            )
            .map_err(LedgerError::persistence)?;
        Ok(count as usize)
    }

    async fn sum_unspent_by_owner(&self, name: &str) -> Result<Amount, LedgerError> {
        let conn = self.conn.lock();
        let sum: Option<i64> = conn
            .query_row(
                "SELECT SUM(amount) FROM outputs
                 WHERE ledger_id = ?1 AND is_spent = 0 AND lock_owner = ?2",
                params![LEDGER_ID, name],
                |row| row.get(0),
            )
            .map_err(LedgerError::persistence)?;
        Ok(Amount::from(sum.unwrap_or(0)))
    }

    async fn find_coinbase_transactions(&self) -> Result<Vec<TxId>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT id FROM transactions WHERE ledger_id = ?1 AND is_coinbase = 1")
            .map_err(LedgerError::persistence)?;
        let rows = stmt
            .query_map(params![LEDGER_ID], |row| row.get::<_, String>(0))
            .map_err(LedgerError::persistence)?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(TxId::new(row.map_err(LedgerError::persistence)?)?);
        }
        Ok(ids)
    }

    async fn find_transactions_by_fee_range(
        &self,
        min: Amount,
        max: Option<Amount>,
    ) -> Result<Vec<TxId>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id FROM transactions
                 WHERE ledger_id = ?1 AND is_coinbase = 0 AND fee >= ?2
                       AND (?3 IS NULL OR fee <= ?3)",
            )
            .map_err(LedgerError::persistence)?;
        let rows = stmt
            .query_map(
                params![LEDGER_ID, min.value(), max.map(|m| m.value())],
                |row| row.get::<_, String>(0),
            )
            .map_err(LedgerError::persistence)?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(TxId::new(row.map_err(LedgerError::persistence)?)?);
        }
        Ok(ids)
    }
}

fn parse_output_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutputRow> {
    Ok(OutputRow {
        id: row.get(0)?,
        amount: row.get(1)?,
        lock_type: row.get(2)?,
        lock_owner: row.get(3)?,
        lock_pubkey: row.get(4)?,
        lock_custom_data: row.get(5)?,
        is_spent: row.get::<_, i64>(6)? != 0,
        created_by: row.get(7)?,
        spent_by: row.get(8)?,
    })
}

fn collect_outputs(
    stmt: &mut rusqlite::Statement<'_>,
    params: impl rusqlite::Params,
) -> Result<Vec<Output>, LedgerError> {
    let rows = stmt
        .query_map(params, parse_output_row)
        .map_err(LedgerError::persistence)?;
    let mut outputs = Vec::new();
    for row in rows {
        outputs.push(row_to_output(&row.map_err(LedgerError::persistence)?)?);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Output;

    crate::history_property_tests!(SqliteHistory::in_memory().unwrap());

    #[tokio::test]
    async fn save_genesis_and_find_output_created_by() {
        let history = SqliteHistory::in_memory().unwrap();
        let outputs = vec![Output::owned_by("a", 10, "alice").unwrap()];
        history.save_genesis(&outputs).await.unwrap();
        assert_eq!(
            history
                .find_output_created_by(&OutputId::new("a").unwrap())
                .await
                .unwrap(),
            Some("genesis".to_string())
        );
        assert_eq!(history.count_unspent().await.unwrap(), 1);
        assert_eq!(
            history.sum_unspent_by_owner("alice").await.unwrap().value(),
            10
        );
    }

    #[tokio::test]
    async fn save_transaction_marks_spends_and_records_fee() {
        let history = SqliteHistory::in_memory().unwrap();
        let genesis = vec![Output::open("g", 100).unwrap()];
        history.save_genesis(&genesis).await.unwrap();

        let tx = Tx::create(
            vec!["g".into()],
            vec![Output::open("a", 90).unwrap()],
            None,
            Some("tx1".into()),
            vec![],
        )
        .unwrap();
        history
            .save_transaction(&tx, 10.into(), &genesis)
            .await
            .unwrap();

        assert_eq!(
            history.find_fee_for_tx(tx.id()).await.unwrap(),
            Some(10.into())
        );
        assert_eq!(history.count_unspent().await.unwrap(), 1);
        assert_eq!(
            history
                .find_spent_output(&OutputId::new("g").unwrap())
                .await
                .unwrap(),
            Some(genesis[0].clone())
        );
    }

    #[tokio::test]
    async fn save_coinbase_tracks_minted_amount_and_flag() {
        let history = SqliteHistory::in_memory().unwrap();
        let cb = CoinbaseTx::create(vec![Output::open("reward", 50).unwrap()], Some("cb1".into()))
            .unwrap();
        history.save_coinbase(&cb).await.unwrap();
        assert!(history.is_coinbase(cb.id()).await.unwrap());
        assert_eq!(
            history.find_coinbase_amount(cb.id()).await.unwrap(),
            Some(50.into())
        );
        assert_eq!(
            history.find_coinbase_transactions().await.unwrap(),
            vec![cb.id().clone()]
        );
    }

    #[tokio::test]
    async fn schema_create_is_idempotent_across_reopen() {
        let history = SqliteHistory::in_memory().unwrap();
        history.schema().create().unwrap();
        assert!(history.schema().exists().unwrap());
    }
}
