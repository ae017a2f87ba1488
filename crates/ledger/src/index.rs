//! The keyed collection of currently-unspent outputs, with cached aggregates.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::LedgerError;
use crate::ids::OutputId;
use crate::lock::{CanonicalLock, Lock, OutputLock as _};
use crate::output::Output;
use crate::registry::LockRegistry;
use crate::Amount;

/// One entry of [`UnspentIndex::to_canonical`]'s map: an output's amount and
/// lock, keyed externally by its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalOutput {
    /// The output's amount.
    pub amount: Amount,
    /// The output's lock, in canonical form.
    pub lock: CanonicalLock,
}

/// A mapping from [`OutputId`] to [`Output`] with O(1) membership, a cached
/// running total, and owner filtering.
///
/// Clone is cheap (an `Arc` bump); mutating methods fork the backing map via
/// [`Arc::make_mut`] only once another clone is observing it, giving the
/// copy-on-fork behavior the engine's immutability discipline requires
/// without needing a persistent-map dependency.
#[derive(Debug, Clone, Default)]
pub struct UnspentIndex {
    entries: Arc<HashMap<OutputId, Output>>,
    total_amount: Amount,
}

impl UnspentIndex {
    /// An empty index.
    pub fn new() -> Self {
        UnspentIndex::default()
    }

    /// Inserts or overwrites `output`, adjusting the cached total by the net
    /// delta between any previous amount at this id and the new one.
    pub fn add(&mut self, output: Output) {
        let delta = match self.entries.get(output.id()) {
            Some(existing) => output
                .amount()
                .checked_sub(existing.amount())
                .expect("overflow adjusting unspent total on overwrite"),
            None => output.amount(),
        };
        self.total_amount = self
            .total_amount
            .checked_add(delta)
            .expect("overflow adjusting unspent total");
        Arc::make_mut(&mut self.entries).insert(output.id().clone(), output);
    }

    /// Removes `id`; a no-op if absent.
    pub fn remove(&mut self, id: &OutputId) {
        if let Some(removed) = Arc::make_mut(&mut self.entries).remove(id) {
            self.total_amount = self
                .total_amount
                .checked_sub(removed.amount())
                .expect("overflow adjusting unspent total on removal");
        }
    }

    /// True if `id` is currently unspent.
    pub fn contains(&self, id: &OutputId) -> bool {
        self.entries.contains_key(id)
    }

    /// The output at `id`, if unspent.
    pub fn get(&self, id: &OutputId) -> Option<&Output> {
        self.entries.get(id)
    }

    /// The number of currently-unspent outputs.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// The sum of all currently-unspent output amounts, maintained
    /// incrementally and always exact.
    pub fn total_amount(&self) -> Amount {
        self.total_amount
    }

    /// All unspent outputs locked to `name` via an `Owner` lock.
    pub fn owned_by<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Output> + 'a {
        self.entries.values().filter(move |o| match o.lock() {
            Lock::Owner { name: owner } => owner == name,
            _ => false,
        })
    }

    /// The total amount currently unspent and owned by `name`.
    pub fn total_owned_by(&self, name: &str) -> Option<Amount> {
        Amount::checked_sum(self.owned_by(name).map(|o| o.amount()))
    }

    /// Iterates over all `(id, output)` pairs. Order is unspecified but
    /// stable within a single index value.
    pub fn iter(&self) -> impl Iterator<Item = (&OutputId, &Output)> {
        self.entries.iter()
    }

    /// The canonical form of this index: a map from output id to its amount
    /// and canonical lock (§4.3). Ids are the keys, so the map carries no
    /// redundant id field per entry.
    pub fn to_canonical(&self) -> HashMap<OutputId, CanonicalOutput> {
        self.entries
            .iter()
            .map(|(id, output)| {
                (
                    id.clone(),
                    CanonicalOutput {
                        amount: output.amount(),
                        lock: output.lock().to_canonical(),
                    },
                )
            })
            .collect()
    }

    /// Reconstructs an index from its canonical form, resolving each entry's
    /// lock through `registry`. The rebuilt index's cached total is
    /// recomputed from the entries, not trusted from the input.
    pub fn from_canonical(
        form: &HashMap<OutputId, CanonicalOutput>,
        registry: &LockRegistry,
    ) -> Result<Self, LedgerError> {
        let mut index = UnspentIndex::new();
        for (id, entry) in form {
            let lock = registry.from_canonical(&entry.lock)?;
            let output = Output::with_id(id.as_str().to_string(), entry.amount, lock)?;
            index.add(output);
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_round_trip() {
        let mut index = UnspentIndex::new();
        let output = Output::open("a", 100).unwrap();
        index.add(output.clone());
        assert!(index.contains(output.id()));
        assert_eq!(index.count(), 1);
        assert_eq!(index.total_amount().value(), 100);

        index.remove(output.id());
        assert!(!index.contains(output.id()));
        assert_eq!(index.count(), 0);
        assert_eq!(index.total_amount().value(), 0);
    }

    #[test]
    fn remove_absent_is_a_no_op() {
        let mut index = UnspentIndex::new();
        index.remove(&crate::OutputId::new("missing").unwrap());
        assert_eq!(index.count(), 0);
    }

    #[test]
    fn overwrite_adjusts_total_by_net_delta() {
        let mut index = UnspentIndex::new();
        index.add(Output::open("a", 100).unwrap());
        index.add(Output::open("a", 60).unwrap());
        assert_eq!(index.count(), 1);
        assert_eq!(index.total_amount().value(), 60);
    }

    #[test]
    fn owned_by_filters_correctly() {
        let mut index = UnspentIndex::new();
        index.add(Output::owned_by("a", 10, "alice").unwrap());
        index.add(Output::owned_by("b", 20, "bob").unwrap());
        index.add(Output::owned_by("c", 30, "alice").unwrap());

        let alice_total: i64 = index.owned_by("alice").map(|o| o.amount().value()).sum();
        assert_eq!(alice_total, 40);
        assert_eq!(index.total_owned_by("alice").unwrap().value(), 40);
    }

    #[test]
    fn to_canonical_preserves_amount_and_lock_keyed_by_id() {
        let mut index = UnspentIndex::new();
        index.add(Output::owned_by("a", 10, "alice").unwrap());
        index.add(Output::open("b", 20).unwrap());

        let canonical = index.to_canonical();
        assert_eq!(canonical.len(), 2);
        let a = &canonical[&crate::OutputId::new("a").unwrap()];
        assert_eq!(a.amount.value(), 10);
        assert_eq!(a.lock.get("type").unwrap(), "owner");
        let b = &canonical[&crate::OutputId::new("b").unwrap()];
        assert_eq!(b.amount.value(), 20);
        assert_eq!(b.lock.get("type").unwrap(), "none");
    }

    #[test]
    fn from_canonical_round_trips() {
        let mut index = UnspentIndex::new();
        index.add(Output::owned_by("a", 10, "alice").unwrap());
        index.add(Output::open("b", 20).unwrap());

        let canonical = index.to_canonical();
        let registry = crate::registry::LockRegistry::new();
        let restored = UnspentIndex::from_canonical(&canonical, &registry).unwrap();

        assert_eq!(restored.count(), 2);
        assert_eq!(restored.total_amount().value(), 30);
        assert_eq!(
            restored.get(&crate::OutputId::new("a").unwrap()).unwrap(),
            index.get(&crate::OutputId::new("a").unwrap()).unwrap()
        );
    }

    #[test]
    fn clone_is_independent_after_fork() {
        let mut index = UnspentIndex::new();
        index.add(Output::open("a", 10).unwrap());
        let snapshot = index.clone();

        index.add(Output::open("b", 20).unwrap());

        assert_eq!(snapshot.count(), 1);
        assert_eq!(index.count(), 2);
    }
}
