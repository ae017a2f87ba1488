//! The output value object: an id, an amount, and the lock guarding it.

use serde::{Deserialize, Serialize};

use crate::errors::LedgerError;
use crate::ids::{self, OutputId};
use crate::lock::Lock;
use crate::Amount;

/// An immutable, value-bearing record that can be consumed at most once.
///
/// Created by genesis, a coinbase, or a regular transaction; destroyed by
/// being consumed as a spend. Amounts are strictly positive (§3, I5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    id: OutputId,
    amount: Amount,
    lock: Lock,
}

impl Output {
    /// Builds an output with an explicit id, rejecting a non-positive amount.
    pub fn with_id(
        id: impl Into<String>,
        amount: impl Into<Amount>,
        lock: Lock,
    ) -> Result<Self, LedgerError> {
        let amount = amount.into();
        if !amount.is_positive() {
            return Err(LedgerError::Internal(format!(
                "output amount must be positive, got {amount}"
            )));
        }
        Ok(Output {
            id: OutputId::new(id)?,
            amount,
            lock,
        })
    }

    /// An unlocked output (anyone may spend) with an explicit id.
    pub fn open(id: impl Into<String>, amount: impl Into<Amount>) -> Result<Self, LedgerError> {
        Output::with_id(id, amount, Lock::None)
    }

    /// An unlocked output with a deterministically generated id.
    pub fn open_generated(amount: impl Into<Amount>) -> Result<Self, LedgerError> {
        let amount = amount.into();
        Output::with_id(ids::derive_output_id(*amount).to_string(), amount, Lock::None)
    }

    /// An `Owner`-locked output with an explicit id.
    pub fn owned_by(
        id: impl Into<String>,
        amount: impl Into<Amount>,
        owner: impl Into<String>,
    ) -> Result<Self, LedgerError> {
        Output::with_id(id, amount, Lock::owner(owner))
    }

    /// An `Owner`-locked output with a deterministically generated id.
    ///
    /// Kept alongside `owned_by` under the name the specification uses for
    /// the "caller supplies only amount and owner" constructor.
    pub fn signed_by(
        amount: impl Into<Amount>,
        owner: impl Into<String>,
    ) -> Result<Self, LedgerError> {
        let amount = amount.into();
        Output::with_id(
            ids::derive_output_id(*amount).to_string(),
            amount,
            Lock::owner(owner),
        )
    }

    /// An output guarded by an arbitrary lock.
    pub fn locked_with(
        id: impl Into<String>,
        amount: impl Into<Amount>,
        lock: Lock,
    ) -> Result<Self, LedgerError> {
        Output::with_id(id, amount, lock)
    }

    /// The output's id.
    pub fn id(&self) -> &OutputId {
        &self.id
    }

    /// The output's amount.
    pub fn amount(&self) -> Amount {
        self.amount
    }

    /// The output's lock.
    pub fn lock(&self) -> &Lock {
        &self.lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_amount_is_rejected() {
        assert!(Output::open("a", 0).is_err());
    }

    #[test]
    fn negative_amount_is_rejected() {
        assert!(Output::open("a", -5).is_err());
    }

    #[test]
    fn owned_by_attaches_owner_lock() {
        let out = Output::owned_by("a", 10, "alice").unwrap();
        assert!(matches!(out.lock(), Lock::Owner { name } if name == "alice"));
    }
}
