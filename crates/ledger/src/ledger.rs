//! The transaction-application engine: one generic type over the history
//! backend, directly generalizing the teacher's `Ledger<S: Storage>`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::errors::LedgerError;
use crate::history::{HistoryRepository, InMemoryHistory, OutputHistory};
use crate::ids::{OutputId, TxId};
use crate::index::UnspentIndex;
use crate::lock::{CanonicalLock, Lock, OutputLock};
use crate::output::Output;
use crate::registry::LockRegistry;
use crate::tx::{CoinbaseTx, Tx};
use crate::Amount;

/// The on-the-wire representation of one unspent or spent output, as used
/// inside a ledger's JSON snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OutputSnapshot {
    amount: Amount,
    lock: CanonicalLock,
}

/// A versioned, exact snapshot of a ledger's full state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSnapshot {
    version: u32,
    unspent: HashMap<OutputId, OutputSnapshot>,
    applied_txs: HashSet<TxId>,
    tx_fees: HashMap<TxId, Amount>,
    coinbase_amounts: HashMap<TxId, Amount>,
    output_created_by: HashMap<OutputId, String>,
    output_spent_by: HashMap<OutputId, TxId>,
    spent_outputs: HashMap<OutputId, OutputSnapshot>,
}

const SNAPSHOT_VERSION: u32 = 1;

/// A transaction-application engine over a pluggable history backend.
///
/// `R = InMemoryHistory` gives the in-memory deployment shape of §4.1:
/// provenance, fees, coinbase amounts and spent-output payloads all resident
/// alongside the unspent index. `R = SqliteHistory` gives the store-backed
/// shape: the same operations, but provenance delegated to a relational
/// backend bounded by `|unspent|` rather than total history length. Both
/// shapes are the same generic type parameterized over which collaborator
/// answers `HistoryRepository`.
pub struct Ledger<R: HistoryRepository> {
    unspent: UnspentIndex,
    applied_txs: Arc<HashSet<TxId>>,
    history: Arc<R>,
    clock: Arc<dyn Clock>,
}

impl<R: HistoryRepository> Clone for Ledger<R> {
    fn clone(&self) -> Self {
        Ledger {
            unspent: self.unspent.clone(),
            applied_txs: self.applied_txs.clone(),
            history: self.history.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl Ledger<InMemoryHistory> {
    /// An empty in-memory ledger.
    pub fn in_memory() -> Self {
        Ledger {
            unspent: UnspentIndex::new(),
            applied_txs: Arc::new(HashSet::new()),
            history: Arc::new(InMemoryHistory::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// An in-memory ledger seeded with `outputs` as genesis.
    pub async fn with_genesis(outputs: Vec<Output>) -> Result<Self, LedgerError> {
        Ledger::in_memory().seed_genesis(outputs).await
    }
}

impl<R: HistoryRepository> Ledger<R> {
    /// Builds an empty ledger over `repo` and seeds `genesis` outputs into
    /// it, if any.
    pub async fn with_store(repo: R, genesis: Vec<Output>) -> Result<Ledger<R>, LedgerError> {
        let ledger = Ledger {
            unspent: UnspentIndex::new(),
            applied_txs: Arc::new(HashSet::new()),
            history: Arc::new(repo),
            clock: Arc::new(SystemClock),
        };
        ledger.seed_genesis(genesis).await
    }

    /// Overrides the clock used to evaluate time-locks. Exists for
    /// deterministic tests; production callers should not need this.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn seed_genesis(mut self, outputs: Vec<Output>) -> Result<Self, LedgerError> {
        if outputs.is_empty() {
            return Ok(self);
        }
        if self.unspent.count() != 0 {
            return Err(LedgerError::GenesisNotAllowed);
        }
        self.history.save_genesis(&outputs).await?;
        for output in outputs {
            self.unspent.add(output);
        }
        Ok(self)
    }

    /// Seeds `outputs` as genesis, failing with [`LedgerError::GenesisNotAllowed`]
    /// if this ledger already has unspent outputs.
    pub async fn add_genesis(self, outputs: Vec<Output>) -> Result<Self, LedgerError> {
        self.seed_genesis(outputs).await
    }

    /// Applies a regular transaction per the §4.1 sequence, returning a new
    /// ledger value. Fails all-or-nothing: on error, `self` is untouched
    /// (the old value is simply dropped by the caller).
    #[tracing::instrument(skip(self, tx), fields(tx_id = %tx.id()))]
    pub async fn apply(&self, tx: &Tx) -> Result<Self, LedgerError> {
        if self.applied_txs.contains(tx.id()) {
            return Err(LedgerError::DuplicateTx(tx.id().clone()));
        }

        let mut resolved = Vec::with_capacity(tx.spends().len());
        let mut spend_amount = Amount::ZERO;
        for (index, spend_id) in tx.spends().iter().enumerate() {
            let output = self
                .unspent
                .get(spend_id)
                .ok_or_else(|| LedgerError::OutputAlreadySpent(spend_id.clone()))?
                .clone();
            output
                .lock()
                .validate(tx, index, self.clock.as_ref())?;
            spend_amount = spend_amount
                .checked_add(output.amount())
                .ok_or_else(|| LedgerError::Internal("spend amount overflow".into()))?;
            resolved.push(output);
        }

        let output_amount = tx
            .output_amount()
            .ok_or_else(|| LedgerError::Internal("output amount overflow".into()))?;

        if spend_amount.value() < output_amount.value() {
            return Err(LedgerError::InsufficientSpends {
                spent: spend_amount.value(),
                outputs: output_amount.value(),
            });
        }
        let fee = spend_amount
            .checked_sub(output_amount)
            .ok_or_else(|| LedgerError::Internal("fee computation overflow".into()))?;

        let spend_ids: HashSet<&OutputId> = tx.spends().iter().collect();
        for output in tx.outputs() {
            if self.unspent.contains(output.id()) && !spend_ids.contains(output.id()) {
                return Err(LedgerError::DuplicateOutputId(output.id().clone()));
            }
        }

        self.history.save_transaction(tx, fee, &resolved).await?;

        let mut next = self.clone();
        for spend_id in tx.spends() {
            next.unspent.remove(spend_id);
        }
        for output in tx.outputs() {
            next.unspent.add(output.clone());
        }
        Arc::make_mut(&mut next.applied_txs).insert(tx.id().clone());

        tracing::debug!(fee = fee.value(), "applied transaction");
        Ok(next)
    }

    /// Applies a coinbase: same skeleton as [`Ledger::apply`] minus spend
    /// resolution, minting `sum(cb.outputs.amount)`.
    #[tracing::instrument(skip(self, cb), fields(cb_id = %cb.id()))]
    pub async fn apply_coinbase(&self, cb: &CoinbaseTx) -> Result<Self, LedgerError> {
        if self.applied_txs.contains(cb.id()) {
            return Err(LedgerError::DuplicateTx(cb.id().clone()));
        }

        for output in cb.outputs() {
            if self.unspent.contains(output.id()) {
                return Err(LedgerError::DuplicateOutputId(output.id().clone()));
            }
        }

        self.history.save_coinbase(cb).await?;

        let mut next = self.clone();
        for output in cb.outputs() {
            next.unspent.add(output.clone());
        }
        Arc::make_mut(&mut next.applied_txs).insert(cb.id().clone());

        tracing::debug!("applied coinbase");
        Ok(next)
    }

    /// Dry-runs `apply`, returning the error it would raise without
    /// mutating any state, or `None` if it would succeed.
    pub async fn can_apply(&self, tx: &Tx) -> Option<LedgerError> {
        // A read-only re-derivation of `apply`'s validation, stopping short
        // of the persistence write and the state fork.
        if self.applied_txs.contains(tx.id()) {
            return Some(LedgerError::DuplicateTx(tx.id().clone()));
        }

        let mut spend_amount = Amount::ZERO;
        for (index, spend_id) in tx.spends().iter().enumerate() {
            let output = match self.unspent.get(spend_id) {
                Some(output) => output,
                None => return Some(LedgerError::OutputAlreadySpent(spend_id.clone())),
            };
            if let Err(err) = output.lock().validate(tx, index, self.clock.as_ref()) {
                return Some(err);
            }
            spend_amount = match spend_amount.checked_add(output.amount()) {
                Some(amount) => amount,
                None => return Some(LedgerError::Internal("spend amount overflow".into())),
            };
        }

        let output_amount = match tx.output_amount() {
            Some(amount) => amount,
            None => return Some(LedgerError::Internal("output amount overflow".into())),
        };

        if spend_amount.value() < output_amount.value() {
            return Some(LedgerError::InsufficientSpends {
                spent: spend_amount.value(),
                outputs: output_amount.value(),
            });
        }

        let spend_ids: HashSet<&OutputId> = tx.spends().iter().collect();
        for output in tx.outputs() {
            if self.unspent.contains(output.id()) && !spend_ids.contains(output.id()) {
                return Some(LedgerError::DuplicateOutputId(output.id().clone()));
            }
        }

        None
    }

    /// Transfers `amount` from outputs owned by `from_owner` to a single
    /// output owned by `to_owner`, plus a change output back to
    /// `from_owner` if the greedily-selected spends overshoot. Selection is
    /// largest-first, a deterministic order over `owned_by`.
    pub async fn transfer(
        &self,
        from_owner: &str,
        to_owner: &str,
        amount: impl Into<Amount>,
        fee: impl Into<Amount>,
    ) -> Result<Self, LedgerError> {
        let amount = amount.into();
        let fee = fee.into();
        let target = amount
            .checked_add(fee)
            .ok_or_else(|| LedgerError::Internal("transfer target overflow".into()))?;

        let mut candidates: Vec<&Output> = self.unspent.owned_by(from_owner).collect();
        candidates.sort_by(|a, b| b.amount().cmp(&a.amount()));

        let mut spends = Vec::new();
        let mut total = Amount::ZERO;
        for candidate in candidates {
            if total.value() >= target.value() {
                break;
            }
            spends.push(candidate.id().as_str().to_string());
            total = total
                .checked_add(candidate.amount())
                .ok_or_else(|| LedgerError::Internal("spend total overflow".into()))?;
        }

        if total.value() < target.value() {
            return Err(LedgerError::InsufficientSpends {
                spent: total.value(),
                outputs: target.value(),
            });
        }

        let mut outputs = vec![Output::signed_by(amount, to_owner)?];
        let change = total
            .checked_sub(target)
            .ok_or_else(|| LedgerError::Internal("change computation overflow".into()))?;
        if change.is_positive() {
            outputs.push(Output::signed_by(change, from_owner)?);
        }

        let tx = Tx::create(spends, outputs, Some(from_owner.to_string()), None, vec![])?;
        self.apply(&tx).await
    }

    /// Issues a coinbase minting `amount` to `owner`.
    pub async fn credit(
        &self,
        owner: &str,
        amount: impl Into<Amount>,
        id: Option<String>,
    ) -> Result<Self, LedgerError> {
        let output = Output::signed_by(amount, owner)?;
        let cb = CoinbaseTx::create(vec![output], id)?;
        self.apply_coinbase(&cb).await
    }

    /// Burns `amount + fee` from `owner`'s outputs: spends are selected the
    /// same way as [`Ledger::transfer`], but no recipient output is
    /// produced — only change, if any. `fee` is the amount destroyed.
    pub async fn debit(
        &self,
        owner: &str,
        amount: impl Into<Amount>,
        fee: impl Into<Amount>,
    ) -> Result<Self, LedgerError> {
        let amount = amount.into();
        let fee = fee.into();
        let target = amount
            .checked_add(fee)
            .ok_or_else(|| LedgerError::Internal("debit target overflow".into()))?;

        let mut candidates: Vec<&Output> = self.unspent.owned_by(owner).collect();
        candidates.sort_by(|a, b| b.amount().cmp(&a.amount()));

        let mut spends = Vec::new();
        let mut total = Amount::ZERO;
        for candidate in candidates {
            if total.value() >= target.value() {
                break;
            }
            spends.push(candidate.id().as_str().to_string());
            total = total
                .checked_add(candidate.amount())
                .ok_or_else(|| LedgerError::Internal("spend total overflow".into()))?;
        }

        if total.value() < target.value() {
            return Err(LedgerError::InsufficientSpends {
                spent: total.value(),
                outputs: target.value(),
            });
        }

        let change = total
            .checked_sub(target)
            .ok_or_else(|| LedgerError::Internal("change computation overflow".into()))?;
        if !change.is_positive() {
            return Err(LedgerError::Internal(
                "debit requires at least one output; use a fee that leaves no exact-zero change, \
                 or spend a single output covering exactly amount+fee via apply() directly"
                    .into(),
            ));
        }
        let outputs = vec![Output::signed_by(change, owner)?];

        let tx = Tx::create(spends, outputs, Some(owner.to_string()), None, vec![])?;
        self.apply(&tx).await
    }

    /// All currently-unspent outputs.
    pub fn unspent(&self) -> impl Iterator<Item = (&OutputId, &Output)> {
        self.unspent.iter()
    }

    /// The total amount currently unspent.
    pub fn total_unspent_amount(&self) -> Amount {
        self.unspent.total_amount()
    }

    /// Unspent outputs locked to `name` via an `Owner` lock.
    pub fn unspent_by_owner<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Output> + 'a {
        self.unspent.owned_by(name)
    }

    /// The total amount currently unspent and owned by `name`.
    pub fn total_unspent_by_owner(&self, name: &str) -> Amount {
        self.unspent.total_owned_by(name).unwrap_or(Amount::ZERO)
    }

    /// The sum of all fees collected by applied transactions.
    pub async fn total_fees_collected(&self) -> Result<Amount, LedgerError> {
        let fees = self.history.find_all_tx_fees().await?;
        Amount::checked_sum(fees.values().copied())
            .ok_or_else(|| LedgerError::Internal("fee total overflow".into()))
    }

    /// The sum of all amounts minted by applied coinbases.
    pub async fn total_minted(&self) -> Result<Amount, LedgerError> {
        let mut total = Amount::ZERO;
        for id in self.history.find_coinbase_transactions().await? {
            if let Some(amount) = self.history.find_coinbase_amount(&id).await? {
                total = total
                    .checked_add(amount)
                    .ok_or_else(|| LedgerError::Internal("minted total overflow".into()))?;
            }
        }
        Ok(total)
    }

    /// The fee recorded for a regular applied transaction.
    pub async fn fee_for_tx(&self, id: &TxId) -> Result<Option<Amount>, LedgerError> {
        self.history.find_fee_for_tx(id).await
    }

    /// All recorded transaction fees, keyed by transaction id.
    pub async fn all_tx_fees(&self) -> Result<HashMap<TxId, Amount>, LedgerError> {
        self.history.find_all_tx_fees().await
    }

    /// True if `id` has been applied, regular or coinbase.
    pub fn is_tx_applied(&self, id: &TxId) -> bool {
        self.applied_txs.contains(id)
    }

    /// True if `id` was applied as a coinbase.
    pub async fn is_coinbase(&self, id: &TxId) -> Result<bool, LedgerError> {
        self.history.is_coinbase(id).await
    }

    /// The amount minted by `id`, if it is a recorded coinbase.
    pub async fn coinbase_amount(&self, id: &TxId) -> Result<Option<Amount>, LedgerError> {
        self.history.find_coinbase_amount(id).await
    }

    /// `"genesis"` or a transaction id, if `id`'s creation was recorded.
    pub async fn output_created_by(&self, id: &OutputId) -> Result<Option<String>, LedgerError> {
        self.history.find_output_created_by(id).await
    }

    /// The id of the transaction that consumed `id`, if any.
    pub async fn output_spent_by(&self, id: &OutputId) -> Result<Option<TxId>, LedgerError> {
        self.history.find_output_spent_by(id).await
    }

    /// The output at `id`, whether or not it is still unspent.
    pub async fn get_output(&self, id: &OutputId) -> Result<Option<Output>, LedgerError> {
        if let Some(output) = self.unspent.get(id) {
            return Ok(Some(output.clone()));
        }
        self.history.find_spent_output(id).await
    }

    /// True if `id` is known to this ledger, spent or unspent.
    pub async fn output_exists(&self, id: &OutputId) -> Result<bool, LedgerError> {
        Ok(self.get_output(id).await?.is_some())
    }

    /// The full provenance record for `id`, if anything is known about it.
    pub async fn output_history(&self, id: &OutputId) -> Result<Option<OutputHistory>, LedgerError> {
        if let Some(output) = self.unspent.get(id) {
            let created_by = self.history.find_output_created_by(id).await?;
            return Ok(Some(OutputHistory {
                id: id.clone(),
                amount: output.amount(),
                lock: output.lock().clone(),
                created_by,
                spent_by: None,
                status: crate::history::OutputStatus::Unspent,
            }));
        }
        self.history.find_output_history(id).await
    }

    /// Builds an exact, versioned snapshot of this ledger's full state.
    ///
    /// Available only for `Ledger<InMemoryHistory>`-shaped provenance — the
    /// store-backed shape's provenance already lives durably in its
    /// relational backend and is not meant to be round-tripped through JSON.
    pub async fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        let mut unspent = HashMap::new();
        for (id, output) in self.unspent.iter() {
            unspent.insert(
                id.clone(),
                OutputSnapshot {
                    amount: output.amount(),
                    lock: output.lock().to_canonical(),
                },
            );
        }

        let mut output_created_by = HashMap::new();
        for id in unspent.keys() {
            if let Some(created) = self.history.find_output_created_by(id).await? {
                output_created_by.insert(id.clone(), created);
            }
        }

        // Provenance for spent outputs is derived directly from every
        // recorded spent output rather than walking `applied_txs`, so that
        // an output created before this ledger value existed (genesis, or
        // a transaction several forks back) still round-trips correctly.
        let mut output_spent_by = HashMap::new();
        let mut spent_outputs = HashMap::new();
        for output in self.history.find_all_spent_outputs().await? {
            let id = output.id().clone();
            if let Some(created) = self.history.find_output_created_by(&id).await? {
                output_created_by.insert(id.clone(), created);
            }
            if let Some(spent_by) = self.history.find_output_spent_by(&id).await? {
                output_spent_by.insert(id.clone(), spent_by);
            }
            spent_outputs.insert(
                id,
                OutputSnapshot {
                    amount: output.amount(),
                    lock: output.lock().to_canonical(),
                },
            );
        }

        Ok(LedgerSnapshot {
            version: SNAPSHOT_VERSION,
            unspent,
            applied_txs: (*self.applied_txs).clone(),
            tx_fees: self.history.find_all_tx_fees().await?,
            coinbase_amounts: {
                let mut map = HashMap::new();
                for id in self.history.find_coinbase_transactions().await? {
                    if let Some(amount) = self.history.find_coinbase_amount(&id).await? {
                        map.insert(id, amount);
                    }
                }
                map
            },
            output_created_by,
            output_spent_by,
            spent_outputs,
        })
    }
}

impl Ledger<InMemoryHistory> {
    /// Restores a ledger from a snapshot produced by [`Ledger::snapshot`],
    /// reconstructing locks via the process-wide default registry.
    pub async fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        Self::from_snapshot_with_registry(snapshot, &LockRegistry::with_extensions()).await
    }

    /// Restores a ledger from a snapshot, reconstructing locks via an
    /// explicit registry rather than the process-wide default.
    pub async fn from_snapshot_with_registry(
        snapshot: LedgerSnapshot,
        registry: &LockRegistry,
    ) -> Result<Self, LedgerError> {
        let history = InMemoryHistory::new();
        let mut unspent = UnspentIndex::new();

        for (id, entry) in &snapshot.unspent {
            let lock: Lock = registry.from_canonical(&entry.lock)?;
            unspent.add(Output::with_id(id.as_str().to_string(), entry.amount, lock)?);
        }

        // An output's body lives in whichever of the two payload maps still
        // holds it: `unspent` if nothing has consumed it yet, `spent_outputs`
        // if it has — a fresh output is never in neither.
        let output_for = |id: &OutputId| -> Result<Option<Output>, LedgerError> {
            let entry = match snapshot.unspent.get(id).or_else(|| snapshot.spent_outputs.get(id)) {
                Some(entry) => entry,
                None => return Ok(None),
            };
            let lock = registry.from_canonical(&entry.lock)?;
            Ok(Some(Output::with_id(id.as_str().to_string(), entry.amount, lock)?))
        };

        // Replay provenance directly into the fresh history store rather
        // than through `save_transaction`/`save_coinbase`, since those
        // expect a `Tx`/`CoinbaseTx` we no longer have.
        let genesis_created: Vec<Output> = snapshot
            .output_created_by
            .iter()
            .filter(|(_, creator)| creator.as_str() == "genesis")
            .filter_map(|(id, _)| output_for(id).transpose())
            .collect::<Result<_, LedgerError>>()?;
        if !genesis_created.is_empty() {
            history.save_genesis(&genesis_created).await?;
        }

        for (id, fee) in &snapshot.tx_fees {
            let spent_payloads: Vec<Output> = snapshot
                .output_spent_by
                .iter()
                .filter(|(_, spender)| *spender == id)
                .filter_map(|(sid, _)| output_for(sid).transpose())
                .collect::<Result<_, LedgerError>>()?;
            let outputs: Vec<Output> = snapshot
                .output_created_by
                .iter()
                .filter(|(_, creator)| TxId::new(creator.clone()).ok().as_ref() == Some(id))
                .filter_map(|(oid, _)| output_for(oid).transpose())
                .collect::<Result<_, LedgerError>>()?;
            let fake_tx = Tx::from_parts(
                id.clone(),
                spent_payloads.iter().map(|o| o.id().clone()).collect(),
                outputs,
                None,
                Vec::new(),
            );
            history.save_transaction(&fake_tx, *fee, &spent_payloads).await?;
        }

        for (id, amount) in &snapshot.coinbase_amounts {
            let outputs: Vec<Output> = snapshot
                .output_created_by
                .iter()
                .filter(|(_, creator)| TxId::new(creator.clone()).ok().as_ref() == Some(id))
                .filter_map(|(oid, _)| output_for(oid).transpose())
                .collect::<Result<_, LedgerError>>()?;
            let outputs = if outputs.is_empty() {
                vec![Output::open(format!("{id}-placeholder"), *amount)?]
            } else {
                outputs
            };
            let cb = CoinbaseTx::from_parts(id.clone(), outputs);
            history.save_coinbase(&cb).await?;
        }

        Ok(Ledger {
            unspent,
            applied_txs: Arc::new(snapshot.applied_txs),
            history: Arc::new(history),
            clock: Arc::new(SystemClock),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::Lock;

    #[tokio::test]
    async fn apply_moves_value_and_tracks_fee() {
        let ledger = Ledger::with_genesis(vec![Output::open("g", 100).unwrap()])
            .await
            .unwrap();
        let tx = Tx::create(
            vec!["g".into()],
            vec![Output::owned_by("a", 90, "alice").unwrap()],
            None,
            Some("tx1".into()),
            vec![],
        )
        .unwrap();
        let next = ledger.apply(&tx).await.unwrap();

        assert!(!next.unspent().any(|(id, _)| id.as_str() == "g"));
        assert_eq!(next.total_unspent_by_owner("alice").value(), 90);
        assert_eq!(next.fee_for_tx(tx.id()).await.unwrap(), Some(10.into()));
        assert!(next.is_tx_applied(tx.id()));
    }

    #[tokio::test]
    async fn apply_rejects_double_spend() {
        let ledger = Ledger::with_genesis(vec![Output::open("g", 100).unwrap()])
            .await
            .unwrap();
        let tx1 = Tx::create(
            vec!["g".into()],
            vec![Output::open("a", 100).unwrap()],
            None,
            Some("tx1".into()),
            vec![],
        )
        .unwrap();
        let applied = ledger.apply(&tx1).await.unwrap();

        let tx2 = Tx::create(
            vec!["g".into()],
            vec![Output::open("b", 100).unwrap()],
            None,
            Some("tx2".into()),
            vec![],
        )
        .unwrap();
        assert!(matches!(
            applied.apply(&tx2).await,
            Err(LedgerError::OutputAlreadySpent(_))
        ));
    }

    #[tokio::test]
    async fn apply_rejects_insufficient_spends() {
        let ledger = Ledger::with_genesis(vec![Output::open("g", 10).unwrap()])
            .await
            .unwrap();
        let tx = Tx::create(
            vec!["g".into()],
            vec![Output::open("a", 20).unwrap()],
            None,
            Some("tx1".into()),
            vec![],
        )
        .unwrap();
        assert!(matches!(
            ledger.apply(&tx).await,
            Err(LedgerError::InsufficientSpends { .. })
        ));
    }

    #[tokio::test]
    async fn apply_coinbase_mints_without_spends() {
        let ledger = Ledger::in_memory();
        let cb = CoinbaseTx::create(vec![Output::owned_by("reward", 50, "miner").unwrap()], None)
            .unwrap();
        let next = ledger.apply_coinbase(&cb).await.unwrap();

        assert_eq!(next.total_unspent_by_owner("miner").value(), 50);
        assert_eq!(next.total_minted().await.unwrap().value(), 50);
        assert!(next.is_coinbase(cb.id()).await.unwrap());
    }

    #[tokio::test]
    async fn can_apply_is_side_effect_free() {
        let ledger = Ledger::with_genesis(vec![Output::open("g", 100).unwrap()])
            .await
            .unwrap();
        let tx = Tx::create(
            vec!["g".into()],
            vec![Output::open("a", 90).unwrap()],
            None,
            Some("tx1".into()),
            vec![],
        )
        .unwrap();
        assert!(ledger.can_apply(&tx).await.is_none());
        // unapplied: "g" is still unspent afterwards
        assert!(ledger.unspent().any(|(id, _)| id.as_str() == "g"));
    }

    #[tokio::test]
    async fn transfer_produces_change_output() {
        let ledger = Ledger::with_genesis(vec![Output::owned_by("g", 100, "alice").unwrap()])
            .await
            .unwrap();
        let next = ledger.transfer("alice", "bob", 30, 5).await.unwrap();

        assert_eq!(next.total_unspent_by_owner("bob").value(), 30);
        assert_eq!(next.total_unspent_by_owner("alice").value(), 65);
    }

    #[tokio::test]
    async fn debit_burns_amount_and_fee() {
        let ledger = Ledger::with_genesis(vec![Output::owned_by("g", 100, "alice").unwrap()])
            .await
            .unwrap();
        let next = ledger.debit("alice", 30, 5).await.unwrap();

        assert_eq!(next.total_unspent_by_owner("alice").value(), 65);
        assert_eq!(next.total_unspent_amount().value(), 65);
    }

    #[tokio::test]
    async fn snapshot_round_trips_genesis_output_spent_later() {
        // The scenario that exposed the original provenance bug: a genesis
        // output is spent, so by snapshot time it no longer appears in the
        // unspent index, but its "genesis" provenance must still survive.
        let ledger = Ledger::with_genesis(vec![Output::open("g", 1000).unwrap()])
            .await
            .unwrap();
        let tx1 = Tx::create(
            vec!["g".into()],
            vec![Output::owned_by("a", 900, "alice").unwrap()],
            None,
            Some("tx1".into()),
            vec![],
        )
        .unwrap();
        let ledger = ledger.apply(&tx1).await.unwrap();

        let snapshot = ledger.snapshot().await.unwrap();
        assert_eq!(
            snapshot.output_created_by.get(&OutputId::new("g").unwrap()),
            Some(&"genesis".to_string())
        );
        assert_eq!(
            snapshot.output_spent_by.get(&OutputId::new("g").unwrap()),
            Some(tx1.id())
        );
        assert!(snapshot.spent_outputs.contains_key(&OutputId::new("g").unwrap()));

        let restored = Ledger::from_snapshot(snapshot).await.unwrap();
        assert_eq!(
            restored.output_created_by(&OutputId::new("g").unwrap()).await.unwrap(),
            Some("genesis".to_string())
        );
        assert_eq!(restored.total_unspent_by_owner("alice").value(), 900);
    }

    #[tokio::test]
    async fn snapshot_round_trips_multi_hop_chain() {
        // "a" is created by tx1, then spent by tx2 — a non-genesis output
        // that is spent by something other than the very next transaction
        // applied to the ledger.
        let ledger = Ledger::with_genesis(vec![Output::open("g", 100).unwrap()])
            .await
            .unwrap();
        let tx1 = Tx::create(
            vec!["g".into()],
            vec![Output::open("a", 95).unwrap()],
            None,
            Some("tx1".into()),
            vec![],
        )
        .unwrap();
        let ledger = ledger.apply(&tx1).await.unwrap();
        let tx2 = Tx::create(
            vec!["a".into()],
            vec![Output::owned_by("b", 90, "alice").unwrap()],
            None,
            Some("tx2".into()),
            vec![],
        )
        .unwrap();
        let ledger = ledger.apply(&tx2).await.unwrap();

        let snapshot = ledger.snapshot().await.unwrap();
        let restored = Ledger::from_snapshot(snapshot).await.unwrap();

        assert_eq!(
            restored.output_created_by(&OutputId::new("a").unwrap()).await.unwrap(),
            Some("tx1".to_string())
        );
        assert_eq!(
            restored.output_spent_by(&OutputId::new("a").unwrap()).await.unwrap(),
            Some(tx2.id().clone())
        );
        assert_eq!(restored.fee_for_tx(tx1.id()).await.unwrap(), Some(5.into()));
        assert_eq!(restored.fee_for_tx(tx2.id()).await.unwrap(), Some(5.into()));
        assert_eq!(restored.total_unspent_by_owner("alice").value(), 90);
    }

    #[tokio::test]
    async fn snapshot_round_trips_coinbase() {
        let ledger = Ledger::in_memory();
        let cb = CoinbaseTx::create(
            vec![Output::owned_by("reward", 50, "miner").unwrap()],
            Some("cb1".into()),
        )
        .unwrap();
        let ledger = ledger.apply_coinbase(&cb).await.unwrap();

        let snapshot = ledger.snapshot().await.unwrap();
        assert_eq!(snapshot.coinbase_amounts.get(cb.id()), Some(&50.into()));

        let restored = Ledger::from_snapshot(snapshot).await.unwrap();
        assert!(restored.is_coinbase(cb.id()).await.unwrap());
        assert_eq!(restored.total_unspent_by_owner("miner").value(), 50);
    }

    #[tokio::test]
    async fn with_clock_governs_time_lock_validation() {
        let clock = Arc::new(crate::clock::FixedClock::new(100));
        let ledger = Ledger::with_genesis(vec![Output::with_id(
            "g",
            100,
            Lock::time_locked(Lock::owner("alice"), 200, clock.as_ref()).unwrap(),
        )
        .unwrap()])
        .await
        .unwrap()
        .with_clock(clock.clone());

        let tx = Tx::create(
            vec!["g".into()],
            vec![Output::open("a", 100).unwrap()],
            Some("alice".into()),
            Some("tx1".into()),
            vec![],
        )
        .unwrap();
        assert!(ledger.apply(&tx).await.is_err());

        clock.set(200);
        assert!(ledger.apply(&tx).await.is_ok());
    }
}
