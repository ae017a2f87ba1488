//! A mutable staging area over an apply-capable ledger, per §4.5.

use std::collections::HashMap;

use crate::errors::LedgerError;
use crate::history::HistoryRepository;
use crate::ids::{OutputId, TxId};
use crate::ledger::Ledger;
use crate::tx::Tx;
use crate::Amount;

/// Tracks not-yet-committed transactions against a base ledger, detecting
/// conflicting spends between pending transactions before they ever reach
/// `apply`.
///
/// Halts on the first failing transaction during [`Mempool::commit`] rather
/// than validating the whole batch up front — both behaviors are
/// conforming per §9; this crate picks halt-and-preserve-remaining because
/// it keeps `commit`'s error the same one `apply` would have raised.
pub struct Mempool<R: HistoryRepository> {
    base: Ledger<R>,
    pending: Vec<TxId>,
    by_id: HashMap<TxId, Tx>,
    claimed_by: HashMap<OutputId, TxId>,
    fees: HashMap<TxId, Amount>,
}

impl<R: HistoryRepository> Mempool<R> {
    /// An empty mempool staged over `base`.
    pub fn new(base: Ledger<R>) -> Self {
        Mempool {
            base,
            pending: Vec::new(),
            by_id: HashMap::new(),
            claimed_by: HashMap::new(),
            fees: HashMap::new(),
        }
    }

    /// Stages `tx`. Rejects a duplicate pending id, whatever error
    /// `base.can_apply(tx)` would raise, and a spend already claimed by
    /// another pending transaction.
    pub async fn add(&mut self, tx: Tx) -> Result<(), LedgerError> {
        if self.by_id.contains_key(tx.id()) {
            return Err(LedgerError::DuplicateTx(tx.id().clone()));
        }
        if let Some(err) = self.base.can_apply(&tx).await {
            return Err(err);
        }
        for spend_id in tx.spends() {
            if let Some(claimant) = self.claimed_by.get(spend_id) {
                if claimant != tx.id() {
                    return Err(LedgerError::OutputAlreadySpent(spend_id.clone()));
                }
            }
        }

        let mut spend_amount = Amount::ZERO;
        for spend_id in tx.spends() {
            let output = self
                .base
                .unspent()
                .find(|(id, _)| *id == spend_id)
                .map(|(_, output)| output)
                .ok_or_else(|| LedgerError::OutputAlreadySpent(spend_id.clone()))?;
            spend_amount = spend_amount
                .checked_add(output.amount())
                .ok_or_else(|| LedgerError::Internal("spend amount overflow".into()))?;
        }
        let output_amount = tx
            .output_amount()
            .ok_or_else(|| LedgerError::Internal("output amount overflow".into()))?;
        let fee = spend_amount
            .checked_sub(output_amount)
            .ok_or_else(|| LedgerError::Internal("fee computation overflow".into()))?;

        for spend_id in tx.spends() {
            self.claimed_by.insert(spend_id.clone(), tx.id().clone());
        }
        self.fees.insert(tx.id().clone(), fee);
        self.pending.push(tx.id().clone());
        self.by_id.insert(tx.id().clone(), tx);
        Ok(())
    }

    /// Removes `tx_id` from staging, releasing its claimed spends. A no-op
    /// if `tx_id` is not pending.
    pub fn remove(&mut self, tx_id: &TxId) {
        let Some(tx) = self.by_id.remove(tx_id) else {
            return;
        };
        self.pending.retain(|id| id != tx_id);
        for spend_id in tx.spends() {
            self.claimed_by.remove(spend_id);
        }
        self.fees.remove(tx_id);
    }

    /// Removes `old_tx_id` then stages `new_tx`. Fails if `old_tx_id` was
    /// not pending. Intended for fee-bump / RBF workflows.
    pub async fn replace(&mut self, old_tx_id: &TxId, new_tx: Tx) -> Result<(), LedgerError> {
        if !self.by_id.contains_key(old_tx_id) {
            return Err(LedgerError::Internal(format!(
                "cannot replace {old_tx_id}: not pending"
            )));
        }
        self.remove(old_tx_id);
        self.add(new_tx).await
    }

    /// Applies every pending transaction to the base ledger in insertion
    /// order, halting on the first failure. On full success, clears the
    /// mempool and returns the count applied. On failure, the transactions
    /// applied before the failing one remain applied to the base ledger;
    /// the failing transaction and everything after it remain pending.
    pub async fn commit(&mut self) -> Result<usize, LedgerError> {
        let order = self.pending.clone();
        let mut applied = 0;
        for tx_id in order {
            let tx = self.by_id.get(&tx_id).expect("pending id always indexed").clone();
            self.base = self.base.apply(&tx).await?;
            self.remove(&tx_id);
            applied += 1;
        }
        Ok(applied)
    }

    /// Removes `tx_id` from staging and applies it to the base ledger
    /// directly, bypassing insertion order.
    pub async fn commit_one(&mut self, tx_id: &TxId) -> Result<(), LedgerError> {
        let tx = self
            .by_id
            .get(tx_id)
            .ok_or_else(|| LedgerError::Internal(format!("{tx_id} is not pending")))?
            .clone();
        self.base = self.base.apply(&tx).await?;
        self.remove(tx_id);
        Ok(())
    }

    /// True if `tx_id` is currently pending.
    pub fn has(&self, tx_id: &TxId) -> bool {
        self.by_id.contains_key(tx_id)
    }

    /// The pending transaction with `tx_id`, if any.
    pub fn get(&self, tx_id: &TxId) -> Option<&Tx> {
        self.by_id.get(tx_id)
    }

    /// All pending transactions, in insertion order.
    pub fn all(&self) -> impl Iterator<Item = &Tx> {
        self.pending.iter().map(|id| &self.by_id[id])
    }

    /// The number of pending transactions.
    pub fn count(&self) -> usize {
        self.pending.len()
    }

    /// The sum of fees across all pending transactions.
    pub fn total_pending_fees(&self) -> Amount {
        Amount::checked_sum(self.fees.values().copied()).unwrap_or(Amount::ZERO)
    }

    /// The fee computed for `tx_id` when it was staged, if pending.
    pub fn fee_for(&self, tx_id: &TxId) -> Option<Amount> {
        self.fees.get(tx_id).copied()
    }

    /// The current base ledger, including whatever `commit`/`commit_one`
    /// have already applied.
    pub fn base(&self) -> &Ledger<R> {
        &self.base
    }

    /// Consumes the mempool, returning its base ledger.
    pub fn into_base(self) -> Ledger<R> {
        self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistory;
    use crate::{Output, Tx};

    async fn genesis_ledger() -> Ledger<InMemoryHistory> {
        Ledger::with_genesis(vec![Output::open("g", 100).unwrap()])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn add_rejects_duplicate_pending_id() {
        let ledger = genesis_ledger().await;
        let mut pool = Mempool::new(ledger);
        let tx = Tx::create(
            vec!["g".into()],
            vec![Output::open("a", 90).unwrap()],
            None,
            Some("tx1".into()),
            vec![],
        )
        .unwrap();
        pool.add(tx.clone()).await.unwrap();
        assert!(matches!(
            pool.add(tx).await,
            Err(LedgerError::DuplicateTx(_))
        ));
    }

    #[tokio::test]
    async fn add_rejects_conflicting_spend() {
        let ledger = genesis_ledger().await;
        let mut pool = Mempool::new(ledger);
        let tx1 = Tx::create(
            vec!["g".into()],
            vec![Output::open("a", 90).unwrap()],
            None,
            Some("tx1".into()),
            vec![],
        )
        .unwrap();
        let tx2 = Tx::create(
            vec!["g".into()],
            vec![Output::open("b", 90).unwrap()],
            None,
            Some("tx2".into()),
            vec![],
        )
        .unwrap();
        pool.add(tx1).await.unwrap();
        assert!(matches!(
            pool.add(tx2).await,
            Err(LedgerError::OutputAlreadySpent(_))
        ));
    }

    #[tokio::test]
    async fn commit_applies_in_order_and_clears_pool() {
        let ledger = genesis_ledger().await;
        let mut pool = Mempool::new(ledger);
        let tx = Tx::create(
            vec!["g".into()],
            vec![Output::open("a", 90).unwrap()],
            None,
            Some("tx1".into()),
            vec![],
        )
        .unwrap();
        pool.add(tx).await.unwrap();
        assert_eq!(pool.commit().await.unwrap(), 1);
        assert_eq!(pool.count(), 0);
        assert!(pool.base().is_tx_applied(&TxId::new("tx1").unwrap()));
    }

    #[tokio::test]
    async fn remove_releases_claimed_spend() {
        let ledger = genesis_ledger().await;
        let mut pool = Mempool::new(ledger);
        let tx = Tx::create(
            vec!["g".into()],
            vec![Output::open("a", 90).unwrap()],
            None,
            Some("tx1".into()),
            vec![],
        )
        .unwrap();
        pool.add(tx).await.unwrap();
        pool.remove(&TxId::new("tx1").unwrap());
        assert_eq!(pool.count(), 0);

        let tx2 = Tx::create(
            vec!["g".into()],
            vec![Output::open("b", 50).unwrap()],
            None,
            Some("tx2".into()),
            vec![],
        )
        .unwrap();
        pool.add(tx2).await.unwrap();
    }
}
