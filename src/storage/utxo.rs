//! Unspent output records
//!
//! A transaction's outputs bundled with their creation height. Spending an
//! output clears its slot; a record with no slots left is pruned.

use serde::{Deserialize, Serialize};

use crate::crypto::Hash;
use crate::validation::{Amount, Transaction, TxOutput};

/// Outputs of one transaction that are still spendable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutputs {
    pub tx_hash: Hash,
    /// Height of the block that created the outputs
    pub height: u64,
    pub is_coinbase: bool,
    pub is_coinstake: bool,
    /// `None` marks a spent (or never spendable) output
    pub outputs: Vec<Option<TxOutput>>,
}

impl UnspentOutputs {
    /// Record for a freshly confirmed transaction. Unspendable outputs and
    /// the empty marker output of a coinstake are never stored as spendable.
    pub fn from_transaction(tx: &Transaction, height: u64) -> Self {
        let outputs = tx
            .outputs
            .iter()
            .map(|output| {
                if output.script_pubkey.is_unspendable() || output.is_empty() {
                    None
                } else {
                    Some(output.clone())
                }
            })
            .collect();

        Self {
            tx_hash: tx.hash(),
            height,
            is_coinbase: tx.is_coinbase(),
            is_coinstake: tx.is_coinstake(),
            outputs,
        }
    }

    pub fn output(&self, index: u32) -> Option<&TxOutput> {
        self.outputs.get(index as usize).and_then(Option::as_ref)
    }

    pub fn is_available(&self, index: u32) -> bool {
        self.output(index).is_some()
    }

    /// Mark an output spent, returning it if it was available
    pub fn spend(&mut self, index: u32) -> Option<TxOutput> {
        self.outputs.get_mut(index as usize).and_then(Option::take)
    }

    pub fn is_fully_spent(&self) -> bool {
        self.outputs.iter().all(Option::is_none)
    }

    pub fn unspent_count(&self) -> usize {
        self.outputs.iter().filter(|output| output.is_some()).count()
    }

    /// Whether spends of these outputs wait for maturity
    pub fn is_reward(&self) -> bool {
        self.is_coinbase || self.is_coinstake
    }

    pub fn unspent_value(&self) -> Amount {
        self.outputs
            .iter()
            .flatten()
            .map(|output| output.amount)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_bytes;
    use crate::validation::Script;

    fn pay(amount: Amount) -> TxOutput {
        TxOutput::new(amount, Script::pay_to_pubkey_hash(&hash_bytes(b"owner")))
    }

    #[test]
    fn test_spend_and_prune() {
        let tx = Transaction::coinbase(1, vec![pay(100), pay(200)]);
        let mut record = UnspentOutputs::from_transaction(&tx, 1);
        assert!(record.is_coinbase);
        assert_eq!(record.unspent_count(), 2);
        assert_eq!(record.unspent_value(), 300);

        assert_eq!(record.spend(0).map(|output| output.amount), Some(100));
        assert!(record.spend(0).is_none());
        assert!(!record.is_fully_spent());

        record.spend(1);
        assert!(record.is_fully_spent());
    }

    #[test]
    fn test_unspendable_outputs_are_not_stored() {
        let tx = Transaction::coinbase(1, vec![TxOutput::new(0, Script::op_return(b"data")), pay(5)]);
        let record = UnspentOutputs::from_transaction(&tx, 1);
        assert!(!record.is_available(0));
        assert!(record.is_available(1));
        assert!(!record.is_available(7));
    }
}
