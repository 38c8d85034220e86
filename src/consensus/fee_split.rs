//! Fee-split arithmetic
//!
//! Shared by the block-fee rule, the mempool fee check, the transaction
//! builder and the block assembler so every party computes the same
//! numbers.
//!
//! The fee a transaction owes is a rate applied to the value it transfers
//! to others. Outputs paying back to one of the transaction's own input
//! scripts, and the output its change marker designates, are change and do
//! not count.

use std::collections::BTreeSet;

use crate::crypto::Hash;
use crate::validation::{apply_rate, Amount, Script, Transaction, TxOutput};

/// Indices of the outputs treated as change
pub fn change_outputs(tx: &Transaction, input_scripts: &[Script]) -> BTreeSet<usize> {
    let mut change: BTreeSet<usize> = tx
        .outputs
        .iter()
        .enumerate()
        .filter(|(_, output)| input_scripts.contains(&output.script_pubkey))
        .map(|(index, _)| index)
        .collect();

    if let Some(index) = tx.change_marker() {
        if (index as usize) < tx.outputs.len() {
            change.insert(index as usize);
        }
    }
    change
}

/// Value leaving the sender: all outputs except change
pub fn transferred_value(tx: &Transaction, input_scripts: &[Script]) -> Amount {
    let change = change_outputs(tx, input_scripts);
    tx.outputs
        .iter()
        .enumerate()
        .filter(|(index, _)| !change.contains(index))
        .map(|(_, output)| output.amount)
        .fold(0, Amount::saturating_add)
}

/// Fee a transaction owes at `rate`
pub fn expected_fee(tx: &Transaction, input_scripts: &[Script], rate: f64) -> Amount {
    apply_rate(transferred_value(tx, input_scripts), rate)
}

/// Minimum a block must pay its fee recipients given the summed expected fees
pub fn required_fee_share(total_expected: Amount, share: f64) -> Amount {
    apply_rate(total_expected, share)
}

/// Outputs of a reward transaction that pay one of the active recipients
pub fn find_fee_outputs<'a>(tx: &'a Transaction, recipients: &[Hash]) -> Vec<(usize, &'a TxOutput)> {
    tx.outputs
        .iter()
        .enumerate()
        .filter(|(_, output)| {
            output
                .script_pubkey
                .destination()
                .is_some_and(|destination| recipients.contains(&destination))
        })
        .collect()
}
