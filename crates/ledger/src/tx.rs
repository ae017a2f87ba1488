//! Transaction and coinbase records.

use serde::{Deserialize, Serialize};

use crate::errors::LedgerError;
use crate::ids::{self, OutputId, TxId};
use crate::output::Output;

/// A regular transaction: consumes `spends`, produces `outputs`.
///
/// At least one spend and one output are required; spend ids and output ids
/// must each be unique within the transaction (the same id may legally
/// appear as both a spend and a freshly produced output — see §4.1 step 5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tx {
    id: TxId,
    spends: Vec<OutputId>,
    outputs: Vec<Output>,
    signed_by: Option<String>,
    #[serde(default)]
    proofs: Vec<String>,
}

impl Tx {
    /// Builds a transaction, auto-generating `id` from the content hash of
    /// `spends`/`outputs` (§6) when `id` is `None`.
    pub fn create(
        spends: Vec<String>,
        outputs: Vec<Output>,
        signed_by: Option<String>,
        id: Option<String>,
        proofs: Vec<String>,
    ) -> Result<Self, LedgerError> {
        if spends.is_empty() {
            return Err(LedgerError::Internal("a transaction needs at least one spend".into()));
        }
        if outputs.is_empty() {
            return Err(LedgerError::Internal("a transaction needs at least one output".into()));
        }

        let spends = spends
            .into_iter()
            .map(OutputId::new)
            .collect::<Result<Vec<_>, _>>()?;

        if !has_unique_elements(&spends) {
            return Err(LedgerError::Internal("duplicate spend id within transaction".into()));
        }
        if !has_unique_elements(outputs.iter().map(|o| o.id())) {
            return Err(LedgerError::Internal("duplicate output id within transaction".into()));
        }

        let id = match id {
            Some(id) => TxId::new(id)?,
            None => {
                let spend_strs: Vec<String> = spends.iter().map(|s| s.as_str().to_string()).collect();
                let output_pairs: Vec<(String, i64)> = outputs
                    .iter()
                    .map(|o| (o.id().as_str().to_string(), o.amount().value()))
                    .collect();
                ids::derive_tx_id(&spend_strs, &output_pairs)
            }
        };

        Ok(Tx {
            id,
            spends,
            outputs,
            signed_by,
            proofs,
        })
    }

    /// The transaction's id.
    pub fn id(&self) -> &TxId {
        &self.id
    }

    /// The outputs this transaction consumes.
    pub fn spends(&self) -> &[OutputId] {
        &self.spends
    }

    /// The outputs this transaction produces.
    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// The account name this transaction claims to be signed by, if any.
    pub fn signed_by(&self) -> Option<&str> {
        self.signed_by.as_deref()
    }

    /// The supplied proofs, indexed by spend position.
    pub fn proofs(&self) -> &[String] {
        &self.proofs
    }

    /// Reconstructs a transaction from already-validated parts, skipping
    /// `create`'s checks. Used only to replay provenance captured in a
    /// snapshot back into a fresh history store, where the data was already
    /// validated the first time it was applied.
    pub(crate) fn from_parts(
        id: TxId,
        spends: Vec<OutputId>,
        outputs: Vec<Output>,
        signed_by: Option<String>,
        proofs: Vec<String>,
    ) -> Self {
        Tx {
            id,
            spends,
            outputs,
            signed_by,
            proofs,
        }
    }

    pub(crate) fn spend_at(&self, index: usize) -> Option<&OutputId> {
        self.spends.get(index)
    }

    pub(crate) fn proof_at(&self, index: usize) -> Option<&str> {
        self.proofs.get(index).map(|s| s.as_str())
    }

    /// The sum of this transaction's output amounts.
    pub fn output_amount(&self) -> Option<crate::Amount> {
        crate::Amount::checked_sum(self.outputs.iter().map(|o| o.amount()))
    }
}

/// A coinbase: mints value with no spends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinbaseTx {
    id: TxId,
    outputs: Vec<Output>,
}

impl CoinbaseTx {
    /// Builds a coinbase, auto-generating `id` from the content hash of
    /// `outputs` (§6) when `id` is `None`. Rejects empty outputs.
    pub fn create(outputs: Vec<Output>, id: Option<String>) -> Result<Self, LedgerError> {
        if outputs.is_empty() {
            return Err(LedgerError::Internal("a coinbase needs at least one output".into()));
        }
        if !has_unique_elements(outputs.iter().map(|o| o.id())) {
            return Err(LedgerError::Internal("duplicate output id within coinbase".into()));
        }

        let id = match id {
            Some(id) => TxId::new(id)?,
            None => {
                let output_pairs: Vec<(String, i64)> = outputs
                    .iter()
                    .map(|o| (o.id().as_str().to_string(), o.amount().value()))
                    .collect();
                ids::derive_coinbase_id(&output_pairs)
            }
        };

        Ok(CoinbaseTx { id, outputs })
    }

    /// Reconstructs a coinbase from already-validated parts, skipping
    /// `create`'s checks. See [`Tx::from_parts`].
    pub(crate) fn from_parts(id: TxId, outputs: Vec<Output>) -> Self {
        CoinbaseTx { id, outputs }
    }

    /// The coinbase's id.
    pub fn id(&self) -> &TxId {
        &self.id
    }

    /// The outputs this coinbase mints.
    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// The total amount minted by this coinbase.
    pub fn minted_amount(&self) -> Option<crate::Amount> {
        crate::Amount::checked_sum(self.outputs.iter().map(|o| o.amount()))
    }
}

fn has_unique_elements<T, I>(iter: I) -> bool
where
    T: Eq + std::hash::Hash,
    I: IntoIterator<Item = T>,
{
    let mut seen = std::collections::HashSet::new();
    iter.into_iter().all(|item| seen.insert(item))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_empty_spends() {
        let outputs = vec![Output::open("a", 10).unwrap()];
        assert!(Tx::create(vec![], outputs, None, None, vec![]).is_err());
    }

    #[test]
    fn create_rejects_empty_outputs() {
        assert!(Tx::create(vec!["a".into()], vec![], None, None, vec![]).is_err());
    }

    #[test]
    fn create_rejects_duplicate_spend_ids() {
        let outputs = vec![Output::open("b", 10).unwrap()];
        assert!(Tx::create(vec!["a".into(), "a".into()], outputs, None, None, vec![]).is_err());
    }

    #[test]
    fn create_rejects_duplicate_output_ids() {
        let outputs = vec![Output::open("b", 10).unwrap(), Output::open("b", 5).unwrap()];
        assert!(Tx::create(vec!["a".into()], outputs, None, None, vec![]).is_err());
    }

    #[test]
    fn auto_id_is_deterministic_given_equal_inputs() {
        let outputs_a = vec![Output::open("b", 10).unwrap()];
        let outputs_b = vec![Output::open("b", 10).unwrap()];
        let tx_a = Tx::create(vec!["a".into()], outputs_a, None, None, vec![]).unwrap();
        let tx_b = Tx::create(vec!["a".into()], outputs_b, None, None, vec![]).unwrap();
        assert_eq!(tx_a.id(), tx_b.id());
    }

    #[test]
    fn coinbase_rejects_empty_outputs() {
        assert!(CoinbaseTx::create(vec![], None).is_err());
    }
}
