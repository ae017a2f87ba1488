//! Stateless read-only helpers over a ledger's unspent index.
//!
//! None of these touch the history backend or mutate anything; they exist
//! for callers who want summary views without re-deriving them by hand over
//! `Ledger::unspent`.

use crate::history::HistoryRepository;
use crate::ledger::Ledger;
use crate::output::Output;
use crate::Amount;

/// Unspent outputs at or below `threshold` — candidates for consolidation
/// because they cost more to spend later than they're worth individually.
pub fn dust_outputs<R: HistoryRepository>(ledger: &Ledger<R>, threshold: impl Into<Amount>) -> Vec<Output> {
    let threshold = threshold.into();
    ledger
        .unspent()
        .filter(|(_, output)| output.amount().value() <= threshold.value())
        .map(|(_, output)| output.clone())
        .collect()
}

/// For each owner with more than one unspent output, the full set of
/// outputs that owner could consolidate into a single one, sorted
/// largest-first — the same selection order [`Ledger::transfer`] uses.
pub fn consolidation_hints<R: HistoryRepository>(
    ledger: &Ledger<R>,
    owner: &str,
) -> Vec<Output> {
    let mut outputs: Vec<Output> = ledger.unspent_by_owner(owner).cloned().collect();
    outputs.sort_by(|a, b| b.amount().cmp(&a.amount()));
    outputs
}

/// A snapshot of cheap aggregate statistics over a ledger's unspent set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerStatistics {
    /// The number of currently-unspent outputs.
    pub unspent_count: usize,
    /// The total amount currently unspent.
    pub total_unspent: Amount,
    /// The largest single unspent output amount, if any outputs exist.
    pub largest_unspent: Option<Amount>,
    /// The smallest single unspent output amount, if any outputs exist.
    pub smallest_unspent: Option<Amount>,
}

/// Computes [`LedgerStatistics`] over `ledger`'s current unspent set.
pub fn ledger_statistics<R: HistoryRepository>(ledger: &Ledger<R>) -> LedgerStatistics {
    let mut largest: Option<Amount> = None;
    let mut smallest: Option<Amount> = None;
    let mut count = 0;

    for (_, output) in ledger.unspent() {
        count += 1;
        let amount = output.amount();
        largest = Some(largest.map_or(amount, |l| l.max(amount)));
        smallest = Some(smallest.map_or(amount, |s| s.min(amount)));
    }

    LedgerStatistics {
        unspent_count: count,
        total_unspent: ledger.total_unspent_amount(),
        largest_unspent: largest,
        smallest_unspent: smallest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Output;

    async fn ledger_with(outputs: Vec<Output>) -> Ledger<crate::history::InMemoryHistory> {
        Ledger::with_genesis(outputs).await.unwrap()
    }

    #[tokio::test]
    async fn dust_outputs_filters_by_threshold() {
        let ledger = ledger_with(vec![
            Output::open("a", 5).unwrap(),
            Output::open("b", 500).unwrap(),
        ])
        .await;
        let dust = dust_outputs(&ledger, 10);
        assert_eq!(dust.len(), 1);
        assert_eq!(dust[0].id().as_str(), "a");
    }

    #[tokio::test]
    async fn consolidation_hints_sorts_largest_first() {
        let ledger = ledger_with(vec![
            Output::owned_by("a", 10, "alice").unwrap(),
            Output::owned_by("b", 50, "alice").unwrap(),
            Output::owned_by("c", 30, "alice").unwrap(),
        ])
        .await;
        let hints = consolidation_hints(&ledger, "alice");
        let amounts: Vec<i64> = hints.iter().map(|o| o.amount().value()).collect();
        assert_eq!(amounts, vec![50, 30, 10]);
    }

    #[tokio::test]
    async fn ledger_statistics_computes_min_max_count() {
        let ledger = ledger_with(vec![
            Output::open("a", 10).unwrap(),
            Output::open("b", 50).unwrap(),
        ])
        .await;
        let stats = ledger_statistics(&ledger);
        assert_eq!(stats.unspent_count, 2);
        assert_eq!(stats.total_unspent.value(), 60);
        assert_eq!(stats.largest_unspent.unwrap().value(), 50);
        assert_eq!(stats.smallest_unspent.unwrap().value(), 10);
    }
}
