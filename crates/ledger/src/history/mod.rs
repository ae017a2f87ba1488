//! Provenance and spent-output storage: the collaborator the ledger engine
//! delegates to for everything besides the resident unspent index.

mod memory;
#[cfg(feature = "sqlite")]
mod schema;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryHistory;
#[cfg(feature = "sqlite")]
pub use schema::DatabaseSchema;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteHistory;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::LedgerError;
use crate::ids::{OutputId, TxId};
use crate::lock::Lock;
use crate::output::Output;
use crate::tx::{CoinbaseTx, Tx};
use crate::Amount;

/// Whether an output is still unspent or has been consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStatus {
    /// Still present in the unspent index.
    Unspent,
    /// Consumed by a transaction.
    Spent,
}

/// The full provenance of a single output, as returned by
/// [`HistoryRepository::find_output_history`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputHistory {
    /// The output's id.
    pub id: OutputId,
    /// The output's amount.
    pub amount: Amount,
    /// The output's lock.
    pub lock: Lock,
    /// `"genesis"`, a transaction id, or absent if unrecorded.
    pub created_by: Option<String>,
    /// The id of the transaction that consumed this output, if any.
    pub spent_by: Option<TxId>,
    /// Derived from whether `spent_by` is set.
    pub status: OutputStatus,
}

/// Provenance and payload storage for a ledger.
///
/// Writes are append-only and must be atomic: either every effect of one
/// call is visible, or none are. Reads answer provenance queries (and, for
/// backends with secondary indexes, owner/amount/lock-type queries) without
/// requiring the full ledger to be materialized.
#[async_trait::async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Records a regular transaction: provenance for each new output,
    /// provenance for each spent one, the fee, and the payload of each
    /// spent output (so `find_spent_output` keeps working after the spend).
    async fn save_transaction(
        &self,
        tx: &Tx,
        fee: Amount,
        spent_payloads: &[Output],
    ) -> Result<(), LedgerError>;

    /// Records a coinbase: provenance for its new outputs and its minted
    /// amount.
    async fn save_coinbase(&self, cb: &CoinbaseTx) -> Result<(), LedgerError>;

    /// Records `output_created_by[id] = "genesis"` for each genesis output.
    async fn save_genesis(&self, outputs: &[Output]) -> Result<(), LedgerError>;

    /// The full output, if it is recorded as spent.
    async fn find_spent_output(&self, id: &OutputId) -> Result<Option<Output>, LedgerError>;

    /// The full provenance record for `id`, if anything is known about it.
    async fn find_output_history(&self, id: &OutputId) -> Result<Option<OutputHistory>, LedgerError>;

    /// `"genesis"` or a transaction id, if `id`'s creation was recorded.
    async fn find_output_created_by(&self, id: &OutputId) -> Result<Option<String>, LedgerError>;

    /// The id of the transaction that consumed `id`, if any.
    async fn find_output_spent_by(&self, id: &OutputId) -> Result<Option<TxId>, LedgerError>;

    /// The fee recorded for a regular transaction.
    async fn find_fee_for_tx(&self, id: &TxId) -> Result<Option<Amount>, LedgerError>;

    /// All recorded transaction fees, keyed by transaction id.
    async fn find_all_tx_fees(&self) -> Result<HashMap<TxId, Amount>, LedgerError>;

    /// True if `id` was recorded as a coinbase.
    async fn is_coinbase(&self, id: &TxId) -> Result<bool, LedgerError>;

    /// The amount minted by `id`, if it is a recorded coinbase.
    async fn find_coinbase_amount(&self, id: &TxId) -> Result<Option<Amount>, LedgerError>;

    /// Unspent outputs locked to `name` via an `Owner` lock.
    async fn find_unspent_by_owner(&self, name: &str) -> Result<Vec<Output>, LedgerError>;

    /// Unspent outputs with `min <= amount` and, if given, `amount <= max`.
    async fn find_unspent_by_amount_range(
        &self,
        min: Amount,
        max: Option<Amount>,
    ) -> Result<Vec<Output>, LedgerError>;

    /// Unspent outputs whose lock's canonical `"type"` equals `lock_type`.
    async fn find_unspent_by_lock_type(&self, lock_type: &str) -> Result<Vec<Output>, LedgerError>;

    /// Outputs created by the transaction `tx_id`, whether or not still
    /// unspent.
    async fn find_outputs_created_by(&self, tx_id: &TxId) -> Result<Vec<Output>, LedgerError>;

    /// Every output recorded as spent, regardless of which transaction
    /// created or consumed it. Used to reconstruct full provenance (e.g.
    /// for [`crate::Ledger::snapshot`]) without walking applied transaction
    /// ids one at a time.
    async fn find_all_spent_outputs(&self) -> Result<Vec<Output>, LedgerError>;

    /// The number of currently-unspent outputs recorded.
    async fn count_unspent(&self) -> Result<usize, LedgerError>;

    /// The total amount currently unspent and owned by `name`.
    async fn sum_unspent_by_owner(&self, name: &str) -> Result<Amount, LedgerError>;

    /// The ids of all recorded coinbase transactions.
    async fn find_coinbase_transactions(&self) -> Result<Vec<TxId>, LedgerError>;

    /// Transaction ids with `min <= fee` and, if given, `fee <= max`.
    async fn find_transactions_by_fee_range(
        &self,
        min: Amount,
        max: Option<Amount>,
    ) -> Result<Vec<TxId>, LedgerError>;
}

/// Runs the same conformance assertions against any [`HistoryRepository`]
/// implementation, so `InMemoryHistory` and `SqliteHistory` are held to one
/// shared contract rather than two independently-maintained test suites.
#[cfg(test)]
#[macro_export]
macro_rules! history_property_tests {
    ($make:expr) => {
        #[tokio::test]
        async fn genesis_is_recorded_and_unspendable_twice() {
            let history = $make;
            let outputs = vec![$crate::Output::open("g", 100).unwrap()];
            history.save_genesis(&outputs).await.unwrap();
            assert_eq!(
                history
                    .find_output_created_by(&$crate::OutputId::new("g").unwrap())
                    .await
                    .unwrap(),
                Some("genesis".to_string())
            );
        }

        #[tokio::test]
        async fn save_transaction_marks_spends_and_records_new_outputs() {
            let history = $make;
            let genesis = vec![$crate::Output::open("g", 100).unwrap()];
            history.save_genesis(&genesis).await.unwrap();

            let tx = $crate::Tx::create(
                vec!["g".into()],
                vec![$crate::Output::open("a", 90).unwrap()],
                None,
                Some("tx1".into()),
                vec![],
            )
            .unwrap();
            history.save_transaction(&tx, 10.into(), &genesis).await.unwrap();

            assert_eq!(
                history
                    .find_output_created_by(&$crate::OutputId::new("a").unwrap())
                    .await
                    .unwrap(),
                Some("tx1".to_string())
            );
            assert_eq!(
                history
                    .find_output_spent_by(&$crate::OutputId::new("g").unwrap())
                    .await
                    .unwrap(),
                Some(tx.id().clone())
            );
            assert_eq!(
                history.find_fee_for_tx(tx.id()).await.unwrap(),
                Some(10.into())
            );
        }

        #[tokio::test]
        async fn coinbase_is_recorded_with_its_minted_amount() {
            let history = $make;
            let cb =
                $crate::CoinbaseTx::create(vec![$crate::Output::open("reward", 50).unwrap()], Some("cb1".into()))
                    .unwrap();
            history.save_coinbase(&cb).await.unwrap();
            assert!(history.is_coinbase(cb.id()).await.unwrap());
            assert_eq!(
                history.find_coinbase_amount(cb.id()).await.unwrap(),
                Some(50.into())
            );
            assert_eq!(history.find_coinbase_transactions().await.unwrap(), vec![cb.id().clone()]);
        }

        #[tokio::test]
        async fn find_all_spent_outputs_reports_every_consumed_output() {
            let history = $make;
            let genesis = vec![$crate::Output::open("g", 100).unwrap()];
            history.save_genesis(&genesis).await.unwrap();
            let tx = $crate::Tx::create(
                vec!["g".into()],
                vec![$crate::Output::open("a", 90).unwrap()],
                None,
                Some("tx1".into()),
                vec![],
            )
            .unwrap();
            history.save_transaction(&tx, 10.into(), &genesis).await.unwrap();

            let spent = history.find_all_spent_outputs().await.unwrap();
            assert_eq!(spent.len(), 1);
            assert_eq!(spent[0].id(), genesis[0].id());
        }
    };
}
