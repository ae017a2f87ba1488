//! The single error taxonomy every fallible ledger operation returns through.

use crate::ids::{OutputId, TxId};

/// All failure modes surfaced by this crate.
///
/// Every variant propagates to the caller unchanged — there is no local
/// retry loop anywhere in the engine. `apply`/`apply_coinbase` are
/// all-or-nothing: any of these returned means no state changed.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A transaction or coinbase id collides with one already applied, or
    /// (inside a mempool) already pending.
    #[error("transaction {0} was already applied")]
    DuplicateTx(TxId),

    /// A newly produced output's id collides with an existing unspent output
    /// that is not itself being spent by the same transaction.
    #[error("output id {0} already exists in the unspent set")]
    DuplicateOutputId(OutputId),

    /// A spend references an output id that is missing from the unspent
    /// index — either it was already consumed, or it never existed.
    #[error("output {0} is already spent or does not exist")]
    OutputAlreadySpent(OutputId),

    /// `sum(spent amounts) < sum(output amounts)` for a regular transaction.
    #[error("spent amount {spent} is less than output amount {outputs}")]
    InsufficientSpends {
        /// Sum of the amounts of the resolved spends.
        spent: i64,
        /// Sum of the amounts of the transaction's outputs.
        outputs: i64,
    },

    /// A spent output's lock rejected the applying transaction.
    #[error("authorization failed for output {0}")]
    Authorization(OutputId),

    /// An attempt to seed genesis outputs into a non-empty ledger.
    #[error("genesis outputs can only be added to an empty ledger")]
    GenesisNotAllowed,

    /// The history/store backend failed (connection, constraint,
    /// serialization). The underlying transaction, if any, has already been
    /// rolled back.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// An internal invariant was violated — malformed input that construction
    /// should have rejected, or an arithmetic overflow. Should not occur in
    /// correctly-used code.
    #[error("internal ledger error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub(crate) fn persistence(err: impl std::fmt::Display) -> Self {
        LedgerError::Persistence(err.to_string())
    }
}
