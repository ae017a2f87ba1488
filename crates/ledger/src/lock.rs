//! The authorization predicate attached to every output.
//!
//! A lock gates consumption of the output it guards. The built-in variants
//! (`None`, `Owner`, `PublicKey`) are always available; the extension
//! variants (`TimeLock`, `Multisig`, `HashLock`) compose further locks and
//! must be registered with a [`crate::LockRegistry`] before deserialization
//! can reconstruct them (construction in code never needs the registry).

use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use sha3::Sha3_256;
use subtle::ConstantTimeEq;

use crate::clock::Clock;
use crate::errors::LedgerError;
use crate::tx::Tx;

/// The JSON-object canonical representation of a lock; always carries a
/// `"type"` field.
pub type CanonicalLock = serde_json::Map<String, serde_json::Value>;

/// The hash algorithms a [`Lock::HashLock`] may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256.
    Sha256,
    /// SHA-512.
    Sha512,
    /// RIPEMD-160.
    Ripemd160,
    /// SHA3-256.
    Sha3_256,
}

impl HashAlgorithm {
    fn digest_hex(self, preimage: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha256 => hex_encode(&Sha256::digest(preimage)),
            HashAlgorithm::Sha512 => hex_encode(&Sha512::digest(preimage)),
            HashAlgorithm::Ripemd160 => hex_encode(&Ripemd160::digest(preimage)),
            HashAlgorithm::Sha3_256 => hex_encode(&Sha3_256::digest(preimage)),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(&mut out, "{b:02x}").expect("writing to a String cannot fail");
    }
    out
}

/// The capability every lock variant implements: a single validation
/// predicate over the applying transaction and the index of the spend it
/// guards. `clock` supplies the current time for locks that need it
/// (time-locks); locks that don't care ignore it.
pub trait OutputLock {
    /// Succeeds iff this lock authorizes `tx` to consume the spend at
    /// `spend_index`.
    fn validate(&self, tx: &Tx, spend_index: usize, clock: &dyn Clock) -> Result<(), LedgerError>;

    /// The canonical, serializable representation of this lock.
    fn to_canonical(&self) -> CanonicalLock;
}

/// A polymorphic authorization predicate for an output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Lock {
    /// Anyone may spend.
    #[serde(rename = "none")]
    None,
    /// Requires the transaction's `signed_by` to equal `name`.
    #[serde(rename = "owner")]
    Owner {
        /// The name that must sign the consuming transaction.
        name: String,
    },
    /// Requires an Ed25519 signature over the transaction id.
    #[serde(rename = "pubkey")]
    PublicKey {
        /// The base64-encoded, 32-byte Ed25519 public key.
        key: String,
    },
    /// Rejects until wall-clock time reaches `unlock_time`, then delegates.
    #[serde(rename = "timelock")]
    TimeLock {
        /// The lock that takes over once unlocked.
        inner: Box<Lock>,
        /// Unix seconds at which this lock starts delegating to `inner`.
        unlock_time: i64,
    },
    /// Requires at least `threshold` of `signers` to appear in the proof.
    #[serde(rename = "multisig")]
    Multisig {
        /// The minimum number of distinct signers required.
        threshold: usize,
        /// The full set of eligible signer names.
        signers: Vec<String>,
    },
    /// Requires a preimage whose hash matches `hash`.
    #[serde(rename = "hashlock")]
    HashLock {
        /// The hex-encoded target hash.
        hash: String,
        /// The algorithm used to hash the preimage.
        algorithm: HashAlgorithm,
        /// An optional further lock the preimage must also satisfy.
        inner: Option<Box<Lock>>,
    },
}

impl Lock {
    /// Shorthand for `Lock::Owner { name }`.
    pub fn owner(name: impl Into<String>) -> Lock {
        Lock::Owner { name: name.into() }
    }

    /// Builds a `PublicKey` lock from a base64-encoded Ed25519 key.
    pub fn public_key(key: impl Into<String>) -> Lock {
        Lock::PublicKey { key: key.into() }
    }

    /// Builds a time-lock, rejecting an `unlock_time` already in the past
    /// according to `clock`. Use [`Lock::already_unlocked`] when restoring
    /// state from persistence, where a past unlock time is legitimate.
    pub fn time_locked(
        inner: Lock,
        unlock_time: i64,
        clock: &dyn Clock,
    ) -> Result<Lock, LedgerError> {
        if unlock_time < clock.now() {
            return Err(LedgerError::Internal(format!(
                "unlock_time {unlock_time} is already in the past"
            )));
        }
        Ok(Lock::TimeLock {
            inner: Box::new(inner),
            unlock_time,
        })
    }

    /// Builds a time-lock without checking `unlock_time` against the clock —
    /// the constructor used when reconstructing a lock from persisted state.
    pub fn already_unlocked(inner: Lock, unlock_time: i64) -> Lock {
        Lock::TimeLock {
            inner: Box::new(inner),
            unlock_time,
        }
    }

    /// Builds a multisig lock, validating `1 <= threshold <= signers.len()`,
    /// non-empty signer names with no duplicates or whitespace-only entries.
    pub fn multisig(
        threshold: usize,
        signers: Vec<String>,
    ) -> Result<Lock, LedgerError> {
        if signers.is_empty() {
            return Err(LedgerError::Internal("multisig signers must not be empty".into()));
        }
        if threshold < 1 || threshold > signers.len() {
            return Err(LedgerError::Internal(format!(
                "multisig threshold {threshold} must be between 1 and {}",
                signers.len()
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for signer in &signers {
            if signer.trim().is_empty() {
                return Err(LedgerError::Internal("multisig signer name must not be blank".into()));
            }
            if !seen.insert(signer) {
                return Err(LedgerError::Internal(format!(
                    "multisig signer {signer:?} is duplicated"
                )));
            }
        }
        Ok(Lock::Multisig { threshold, signers })
    }

    /// Builds a hash-lock from a hex-encoded target hash.
    pub fn hash_locked(
        hash: impl Into<String>,
        algorithm: HashAlgorithm,
        inner: Option<Lock>,
    ) -> Lock {
        Lock::HashLock {
            hash: hash.into(),
            algorithm,
            inner: inner.map(Box::new),
        }
    }
}

fn auth_err(tx: &Tx, spend_index: usize) -> LedgerError {
    match tx.spend_at(spend_index) {
        Some(id) => LedgerError::Authorization(id.clone()),
        None => LedgerError::Internal("spend_index out of range".into()),
    }
}

impl OutputLock for Lock {
    fn validate(&self, tx: &Tx, spend_index: usize, clock: &dyn Clock) -> Result<(), LedgerError> {
        match self {
            Lock::None => Ok(()),
            Lock::Owner { name } => {
                if tx.signed_by() == Some(name.as_str()) {
                    Ok(())
                } else {
                    Err(auth_err(tx, spend_index))
                }
            }
            Lock::PublicKey { key } => {
                validate_public_key(key, tx, spend_index).map_err(|_| auth_err(tx, spend_index))
            }
            Lock::TimeLock { inner, unlock_time } => {
                if clock.now() < *unlock_time {
                    Err(auth_err(tx, spend_index))
                } else {
                    inner.validate(tx, spend_index, clock)
                }
            }
            Lock::Multisig { threshold, signers } => {
                validate_multisig(*threshold, signers, tx, spend_index)
                    .map_err(|_| auth_err(tx, spend_index))
            }
            Lock::HashLock {
                hash,
                algorithm,
                inner,
            } => {
                let proof = tx.proof_at(spend_index).ok_or_else(|| auth_err(tx, spend_index))?;
                let digest = algorithm.digest_hex(proof.as_bytes());
                if digest.as_bytes().ct_eq(hash.as_bytes()).into() {
                    match inner {
                        Some(inner) => inner.validate(tx, spend_index, clock),
                        None => Ok(()),
                    }
                } else {
                    Err(auth_err(tx, spend_index))
                }
            }
        }
    }

    fn to_canonical(&self) -> CanonicalLock {
        let value = serde_json::to_value(self).expect("Lock serialization cannot fail");
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!("Lock always serializes to an object due to #[serde(tag = \"type\")]"),
        }
    }
}

fn validate_public_key(key: &str, tx: &Tx, spend_index: usize) -> Result<(), ()> {
    let key_bytes = base64::engine::general_purpose::STANDARD
        .decode(key)
        .map_err(|_| ())?;
    let key_bytes: [u8; 32] = key_bytes.try_into().map_err(|_| ())?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| ())?;

    let proof = tx.proof_at(spend_index).ok_or(())?;
    let sig_bytes = base64::engine::general_purpose::STANDARD
        .decode(proof)
        .map_err(|_| ())?;
    let sig_bytes: [u8; 64] = sig_bytes.try_into().map_err(|_| ())?;
    let signature = Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify(tx.id().as_str().as_bytes(), &signature)
        .map_err(|_| ())
}

fn validate_multisig(
    threshold: usize,
    signers: &[String],
    tx: &Tx,
    spend_index: usize,
) -> Result<(), ()> {
    let proof = tx.proof_at(spend_index).ok_or(())?;
    let mut provided = std::collections::HashSet::new();
    for name in proof.split(',') {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        if !signers.iter().any(|s| s == name) {
            return Err(());
        }
        provided.insert(name);
    }
    if provided.len() >= threshold {
        Ok(())
    } else {
        Err(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::Output;

    fn tx_with_proof(signed_by: Option<&str>, proof: &str) -> Tx {
        Tx::create(
            vec!["spend".into()],
            vec![Output::open("out", 10).unwrap()],
            signed_by.map(|s| s.to_string()),
            Some("tx1".into()),
            vec![proof.to_string()],
        )
        .unwrap()
    }

    #[test]
    fn none_lock_always_validates() {
        let tx = tx_with_proof(None, "");
        assert!(Lock::None.validate(&tx, 0, &SystemClock).is_ok());
    }

    #[test]
    fn owner_lock_requires_matching_signer() {
        let tx = tx_with_proof(Some("alice"), "");
        assert!(Lock::owner("alice").validate(&tx, 0, &SystemClock).is_ok());
        assert!(Lock::owner("bob").validate(&tx, 0, &SystemClock).is_err());
    }

    #[test]
    fn multisig_trims_whitespace_in_proof() {
        let lock = Lock::multisig(2, vec!["alice".into(), "bob".into(), "carol".into()]).unwrap();
        let tx = tx_with_proof(None, " alice ,  bob ");
        assert!(lock.validate(&tx, 0, &SystemClock).is_ok());
    }

    #[test]
    fn multisig_rejects_below_threshold() {
        let lock = Lock::multisig(2, vec!["alice".into(), "bob".into()]).unwrap();
        let tx = tx_with_proof(None, "alice");
        assert!(lock.validate(&tx, 0, &SystemClock).is_err());
    }

    #[test]
    fn multisig_constructor_rejects_bad_threshold() {
        assert!(Lock::multisig(0, vec!["alice".into()]).is_err());
        assert!(Lock::multisig(2, vec!["alice".into()]).is_err());
    }

    #[test]
    fn multisig_constructor_rejects_duplicate_signers() {
        assert!(Lock::multisig(1, vec!["alice".into(), "alice".into()]).is_err());
    }

    #[test]
    fn hashlock_validates_matching_preimage() {
        let hash = hex_encode(&Sha256::digest(b"secret"));
        let lock = Lock::hash_locked(hash, HashAlgorithm::Sha256, None);
        let tx = tx_with_proof(None, "secret");
        assert!(lock.validate(&tx, 0, &SystemClock).is_ok());
    }

    #[test]
    fn hashlock_rejects_wrong_preimage() {
        let hash = hex_encode(&Sha256::digest(b"secret"));
        let lock = Lock::hash_locked(hash, HashAlgorithm::Sha256, None);
        let tx = tx_with_proof(None, "wrong");
        assert!(lock.validate(&tx, 0, &SystemClock).is_err());
    }

    #[test]
    fn hashlock_delegates_to_inner() {
        let hash = hex_encode(&Sha256::digest(b"secret"));
        let lock = Lock::hash_locked(hash, HashAlgorithm::Sha256, Some(Lock::owner("alice")));
        let tx = tx_with_proof(Some("bob"), "secret");
        assert!(lock.validate(&tx, 0, &SystemClock).is_err());
    }

    #[test]
    fn time_lock_constructor_rejects_past_time() {
        let clock = crate::clock::FixedClock::new(1_000);
        assert!(Lock::time_locked(Lock::None, 500, &clock).is_err());
    }

    #[test]
    fn time_lock_already_unlocked_bypasses_check() {
        let lock = Lock::already_unlocked(Lock::None, 500);
        let clock = crate::clock::FixedClock::new(1_000);
        let tx = tx_with_proof(None, "");
        assert!(lock.validate(&tx, 0, &clock).is_ok());
    }

    #[test]
    fn time_lock_rejects_before_unlock() {
        let clock = crate::clock::FixedClock::new(500);
        let lock = Lock::time_locked(Lock::owner("alice"), 1_000, &clock).unwrap();
        let tx = tx_with_proof(Some("alice"), "");
        assert!(lock.validate(&tx, 0, &clock).is_err());
        clock.set(1_000);
        assert!(lock.validate(&tx, 0, &clock).is_ok());
    }

    #[test]
    fn to_canonical_round_trips_through_serde() {
        let lock = Lock::owner("alice");
        let canonical = lock.to_canonical();
        assert_eq!(canonical.get("type").unwrap(), "owner");
        let restored: Lock = serde_json::from_value(serde_json::Value::Object(canonical)).unwrap();
        assert_eq!(restored, lock);
    }
}
