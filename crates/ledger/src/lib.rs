//! A generic UTXO-based ledger for recording value movements.
//!
//! This crate implements a UTXO (Unspent Transaction Output) model inspired by
//! Bitcoin's architecture. The UTXO model provides several key advantages:
//!
//! - **Concurrency Safety**: each output can only be spent once, eliminating race conditions
//! - **Atomic Operations**: a transaction consumes and produces outputs in one step
//! - **Auditability**: complete provenance is preserved and queryable per output
//! - **Simplicity**: balance is the sum of unspent outputs, no running totals to reconcile
//!
//! # Architecture
//!
//! A [`Ledger`] is generic over its history backend:
//! - [`InMemoryHistory`] keeps every provenance record resident in process memory
//! - [`SqliteHistory`] (behind the `sqlite` feature) persists to a relational schema
//!
//! Both implement [`HistoryRepository`]; the engine itself (applying
//! transactions, resolving spends, validating locks) is identical either way.
//! Ownership and more exotic spending conditions are expressed through
//! [`Lock`], a closed set of variants rather than a trait-object registry, so
//! that every lock a ledger can contain is known at compile time; a process-
//! wide [`LockRegistry`] exists only to round-trip custom canonical forms
//! through JSON.
//!
//! # Example
//!
//! ```rust,no_run
//! use ledger::{Ledger, Output};
//!
//! async fn example() {
//!     let ledger = Ledger::with_genesis(vec![
//!         Output::owned_by("g1", 1000, "alice").unwrap(),
//!     ])
//!     .await
//!     .unwrap();
//!
//!     let ledger = ledger.transfer("alice", "bob", 300, 10).await.unwrap();
//!
//!     assert_eq!(ledger.total_unspent_by_owner("bob").value(), 300);
//! }
//! ```

#![deny(missing_docs)]

mod amount;
mod analytics;
mod clock;
mod errors;
mod history;
mod ids;
mod index;
mod ledger;
mod lock;
mod mempool;
mod output;
mod registry;
mod tx;

pub use self::amount::Amount;
pub use self::analytics::{consolidation_hints, dust_outputs, ledger_statistics, LedgerStatistics};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::errors::LedgerError;
pub use self::history::{HistoryRepository, InMemoryHistory, OutputHistory, OutputStatus};
#[cfg(feature = "sqlite")]
pub use self::history::{DatabaseSchema, SqliteHistory};
pub use self::ids::{OutputId, TxId};
pub use self::index::{CanonicalOutput, UnspentIndex};
pub use self::ledger::{Ledger, LedgerSnapshot};
pub use self::lock::{CanonicalLock, HashAlgorithm, Lock, OutputLock};
pub use self::mempool::Mempool;
pub use self::output::Output;
pub use self::registry::{
    from_canonical_global, global_registered_tags, has_global_handler, register_global,
    reset_global, LockFactory, LockRegistry,
};
pub use self::tx::{CoinbaseTx, Tx};
