//! Identifier newtypes and the deterministic content-hash id scheme.
//!
//! Both identifiers are plain strings under the hood, but are kept as
//! distinct types so a caller can't accidentally pass a transaction id where
//! an output id is expected.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::LedgerError;

/// Identifies an [`Output`](crate::Output), unique for its entire lifetime
/// within a ledger — a spent output's id is never reused.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OutputId(String);

/// Identifies a [`Tx`](crate::Tx) or coinbase, unique across both.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxId(String);

impl OutputId {
    /// Wraps a non-empty string as an `OutputId`.
    pub fn new(value: impl Into<String>) -> Result<Self, LedgerError> {
        let value = value.into();
        if value.is_empty() {
            return Err(LedgerError::Internal(
                "output id must not be empty".into(),
            ));
        }
        Ok(OutputId(value))
    }

    /// Borrows the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OutputId {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        OutputId::new(value)
    }
}

impl From<OutputId> for String {
    fn from(value: OutputId) -> Self {
        value.0
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const TX_ID_MAX_LEN: usize = 64;

fn is_valid_tx_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

impl TxId {
    /// Validates and wraps a transaction id.
    ///
    /// Must be non-empty, at most 64 characters, and restricted to
    /// `[A-Za-z0-9_-]`.
    pub fn new(value: impl Into<String>) -> Result<Self, LedgerError> {
        let value = value.into();
        if value.is_empty() || value.len() > TX_ID_MAX_LEN {
            return Err(LedgerError::Internal(format!(
                "tx id must be 1..={TX_ID_MAX_LEN} characters, got {}",
                value.len()
            )));
        }
        if !value.chars().all(is_valid_tx_id_char) {
            return Err(LedgerError::Internal(format!(
                "tx id {value:?} contains characters outside [A-Za-z0-9_-]"
            )));
        }
        Ok(TxId(value))
    }

    /// Borrows the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TxId {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TxId::new(value)
    }
}

impl From<TxId> for String {
    fn from(value: TxId) -> Self {
        value.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `lowercase-hex(SHA-256(input))[..32]`, the truncation used by every
/// deterministic id in §6 of the specification.
fn truncated_hex_digest(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    let hex = hex_encode(&digest);
    hex[..32].to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(&mut out, "{b:02x}").expect("writing to a String cannot fail");
    }
    out
}

/// `join("|", for each o: o.id + ":" + amount)`, as specified in §6.
pub(crate) fn serialize_outputs_for_hash(outputs: &[(String, i64)]) -> String {
    outputs
        .iter()
        .map(|(id, amount)| format!("{id}:{amount}"))
        .collect::<Vec<_>>()
        .join("|")
}

/// Computes a deterministic transaction id from its spends and outputs.
pub(crate) fn derive_tx_id(spend_ids: &[String], outputs: &[(String, i64)]) -> TxId {
    let input = format!(
        "{}||{}",
        spend_ids.join("|"),
        serialize_outputs_for_hash(outputs)
    );
    TxId(truncated_hex_digest(input.as_bytes()))
}

/// Computes a deterministic coinbase id from its outputs.
pub(crate) fn derive_coinbase_id(outputs: &[(String, i64)]) -> TxId {
    TxId(truncated_hex_digest(
        serialize_outputs_for_hash(outputs).as_bytes(),
    ))
}

/// Computes a deterministic output id from an amount and 16 random bytes.
pub(crate) fn derive_output_id(amount: i64) -> OutputId {
    let mut random = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut random);
    let input = format!("{amount}|{}", hex_encode(&random));
    OutputId(truncated_hex_digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_id_rejects_empty() {
        assert!(TxId::new("").is_err());
    }

    #[test]
    fn tx_id_rejects_too_long() {
        assert!(TxId::new("a".repeat(65)).is_err());
    }

    #[test]
    fn tx_id_rejects_invalid_chars() {
        assert!(TxId::new("tx id!").is_err());
    }

    #[test]
    fn tx_id_accepts_allowed_charset() {
        assert!(TxId::new("tx-1_ABC99").is_ok());
    }

    #[test]
    fn derive_tx_id_is_deterministic() {
        let spends = vec!["a".to_string()];
        let outputs = vec![("b".to_string(), 10i64)];
        assert_eq!(
            derive_tx_id(&spends, &outputs),
            derive_tx_id(&spends, &outputs)
        );
    }

    #[test]
    fn derive_coinbase_id_is_deterministic() {
        let outputs = vec![("reward".to_string(), 100i64)];
        assert_eq!(
            derive_coinbase_id(&outputs),
            derive_coinbase_id(&outputs)
        );
    }

    #[test]
    fn derive_output_id_varies_by_randomness() {
        // Same amount, different calls: extremely unlikely to collide.
        assert_ne!(derive_output_id(100), derive_output_id(100));
    }
}
