//! Transient UTXO overlay
//!
//! A `CoinView` is loaded from the backing store for one block (or one
//! mempool candidate), mutated while the block is validated, and either
//! committed through `changes()` or dropped. It is never shared between
//! validations.
//!
//! Only real spends touch the view. A change marker never debits anything
//! and is skipped by every iteration here.

use std::collections::{HashMap, HashSet};

use crate::consensus::{Block, ConsensusError};
use crate::crypto::Hash;
use crate::storage::UnspentOutputs;
use crate::validation::{checked_sum, Amount, OutPoint, Transaction, TxOutput};

/// Records to write back after a block connects
#[derive(Debug, Default, Clone)]
pub struct CoinChanges {
    pub updated: Vec<UnspentOutputs>,
    /// Records whose outputs are all spent
    pub removed: Vec<Hash>,
}

#[derive(Debug, Default, Clone)]
pub struct CoinView {
    records: HashMap<Hash, UnspentOutputs>,
    dirty: HashSet<Hash>,
    pruned: HashSet<Hash>,
}

impl CoinView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transaction ids a block needs: every real prevout plus the block's
    /// own transactions (for the overwrite check)
    pub fn ids_for(block: &Block) -> Vec<Hash> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for tx in &block.transactions {
            for prevout in tx.prevouts() {
                if seen.insert(prevout.hash) {
                    ids.push(prevout.hash);
                }
            }
        }
        for tx in &block.transactions {
            let hash = tx.hash();
            if seen.insert(hash) {
                ids.push(hash);
            }
        }
        ids
    }

    /// Load records fetched from the store; fully spent records are ignored
    pub fn set<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = UnspentOutputs>,
    {
        for record in records {
            if !record.is_fully_spent() {
                self.records.insert(record.tx_hash, record);
            }
        }
    }

    pub fn access(&self, tx_hash: &Hash) -> Option<&UnspentOutputs> {
        self.records.get(tx_hash)
    }

    pub fn output(&self, outpoint: &OutPoint) -> Option<&TxOutput> {
        self.records
            .get(&outpoint.hash)
            .and_then(|record| record.output(outpoint.index))
    }

    /// True iff every real input resolves to an unspent output
    pub fn have_inputs(&self, tx: &Transaction) -> bool {
        self.first_missing(tx).is_none()
    }

    /// First real input that does not resolve, if any
    pub fn first_missing(&self, tx: &Transaction) -> Option<OutPoint> {
        tx.prevouts()
            .find(|prevout| self.output(prevout).is_none())
            .copied()
    }

    /// Sum of the values spent by real inputs
    pub fn value_in(&self, tx: &Transaction) -> Result<Amount, ConsensusError> {
        let mut values = Vec::with_capacity(tx.inputs.len());
        for prevout in tx.prevouts() {
            let output = self
                .output(prevout)
                .ok_or(ConsensusError::MissingOrSpentInput(*prevout))?;
            values.push(output.amount);
        }
        checked_sum(values).ok_or(ConsensusError::InputValuesOutOfRange)
    }

    /// Spend the real inputs of `tx` and add its outputs at `height`
    pub fn update(&mut self, tx: &Transaction, height: u64) -> Result<(), ConsensusError> {
        if !tx.is_coinbase() {
            for prevout in tx.prevouts() {
                let record = self
                    .records
                    .get_mut(&prevout.hash)
                    .ok_or(ConsensusError::MissingOrSpentInput(*prevout))?;
                record
                    .spend(prevout.index)
                    .ok_or(ConsensusError::MissingOrSpentInput(*prevout))?;

                if record.is_fully_spent() {
                    self.records.remove(&prevout.hash);
                    self.dirty.remove(&prevout.hash);
                    self.pruned.insert(prevout.hash);
                } else {
                    self.dirty.insert(prevout.hash);
                }
            }
        }

        let record = UnspentOutputs::from_transaction(tx, height);
        if !record.is_fully_spent() {
            let hash = record.tx_hash;
            self.pruned.remove(&hash);
            self.dirty.insert(hash);
            self.records.insert(hash, record);
        }
        Ok(())
    }

    /// Everything touched since loading
    pub fn changes(&self) -> CoinChanges {
        let mut updated: Vec<UnspentOutputs> = self
            .dirty
            .iter()
            .filter_map(|hash| self.records.get(hash).cloned())
            .collect();
        updated.sort_by_key(|record| record.tx_hash);

        let mut removed: Vec<Hash> = self.pruned.iter().copied().collect();
        removed.sort();

        CoinChanges { updated, removed }
    }

    /// Every record currently in the view
    pub fn records(&self) -> impl Iterator<Item = &UnspentOutputs> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash_bytes, PrivateKey};
    use crate::validation::{Script, TxInput};

    fn pay(amount: Amount) -> TxOutput {
        TxOutput::new(amount, Script::pay_to_pubkey_hash(&hash_bytes(b"owner")))
    }

    fn funded_view() -> (CoinView, Transaction) {
        let funding = Transaction::coinbase(1, vec![pay(100), pay(50)]);
        let mut view = CoinView::new();
        view.update(&funding, 1).unwrap();
        (view, funding)
    }

    #[test]
    fn test_change_marker_is_ignored() {
        let (mut view, funding) = funded_view();
        let key = PrivateKey::generate().public_key();
        let tx = Transaction::new(
            vec![
                TxInput::spend(OutPoint::new(funding.hash(), 0), key),
                TxInput::ChangeMarker { output_index: 1 },
            ],
            vec![pay(60), pay(39)],
        );

        assert!(view.have_inputs(&tx));
        assert_eq!(view.value_in(&tx).unwrap(), 100);

        view.update(&tx, 2).unwrap();
        assert!(view.output(&OutPoint::new(funding.hash(), 0)).is_none());
        assert!(view.output(&OutPoint::new(funding.hash(), 1)).is_some());
        assert!(view.output(&OutPoint::new(tx.hash(), 1)).is_some());
    }

    #[test]
    fn test_missing_input() {
        let (mut view, _) = funded_view();
        let missing = OutPoint::new(hash_bytes(b"nowhere"), 0);
        let tx = Transaction::new(
            vec![TxInput::spend(missing, PrivateKey::generate().public_key())],
            vec![pay(1)],
        );
        assert!(!view.have_inputs(&tx));
        assert_eq!(view.first_missing(&tx), Some(missing));
        assert_eq!(
            view.update(&tx, 2).unwrap_err().code(),
            "bad-txns-inputs-missingorspent"
        );
    }

    #[test]
    fn test_fully_spent_record_is_pruned() {
        let (mut view, funding) = funded_view();
        let key = PrivateKey::generate().public_key();
        let tx = Transaction::new(
            vec![
                TxInput::spend(OutPoint::new(funding.hash(), 0), key.clone()),
                TxInput::spend(OutPoint::new(funding.hash(), 1), key),
            ],
            vec![pay(149)],
        );
        view.update(&tx, 2).unwrap();

        assert!(view.access(&funding.hash()).is_none());
        let changes = view.changes();
        assert_eq!(changes.removed, vec![funding.hash()]);
        assert_eq!(changes.updated.len(), 1);
        assert_eq!(changes.updated[0].tx_hash, tx.hash());
    }

    #[test]
    fn test_double_spend_within_view() {
        let (mut view, funding) = funded_view();
        let key = PrivateKey::generate().public_key();
        let spend = |amount| {
            Transaction::new(
                vec![TxInput::spend(OutPoint::new(funding.hash(), 0), key.clone())],
                vec![pay(amount)],
            )
        };
        view.update(&spend(90), 2).unwrap();
        assert!(view.update(&spend(80), 2).is_err());
    }
}
