//! The smallest-unit integer amount carried by outputs, fees and aggregates.
//!
//! The ledger never deals in fractional units; every value is an integer
//! count of the smallest denomination, kept inside a signed 63-bit-safe
//! range so that sums across a ledger's full lifetime cannot silently wrap.

use serde::{Deserialize, Serialize};

/// A quantity of value in the ledger's smallest unit.
///
/// `Amount` itself does not forbid zero or negative values — an `Output`
/// enforces strict positivity at construction (see [`crate::Output::open`]),
/// while a fee or a minted total may legitimately be zero.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(i64);

impl Amount {
    /// The zero amount.
    pub const ZERO: Amount = Amount(0);

    /// Returns the raw integer value.
    pub fn value(&self) -> i64 {
        self.0
    }

    /// True if this amount is strictly greater than zero.
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checked addition; `None` on overflow.
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Checked subtraction; `None` on overflow (a negative result is allowed —
    /// callers that must reject negative fees check explicitly).
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Sums an iterator of amounts, returning `None` on overflow.
    pub fn checked_sum<I: IntoIterator<Item = Amount>>(amounts: I) -> Option<Amount> {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |acc, a| acc.checked_add(a))
    }

    pub(crate) fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Amount(value)
    }
}

impl From<Amount> for i64 {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for Amount {
    type Target = i64;

    fn deref(&self) -> &i64 {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_add_overflows_at_i64_max() {
        let max = Amount::from(i64::MAX);
        assert_eq!(max.checked_add(1.into()), None);
    }

    #[test]
    fn checked_sum_empty_is_zero() {
        assert_eq!(
            Amount::checked_sum(Vec::<Amount>::new()),
            Some(Amount::ZERO)
        );
    }

    #[test]
    fn checked_sum_adds_all() {
        let sum = Amount::checked_sum(vec![10.into(), 20.into(), 5.into()]);
        assert_eq!(sum, Some(35.into()));
    }

    #[test]
    fn is_positive() {
        assert!(Amount::from(1).is_positive());
        assert!(!Amount::from(0).is_positive());
        assert!(!Amount::from(-1).is_positive());
    }
}
