//! Context-free transaction checks

use std::collections::HashSet;

use crate::consensus::ConsensusError;
use crate::constants::{MAX_BLOCK_SIZE, MAX_COINBASE_SCRIPT_SIZE, MIN_COINBASE_SCRIPT_SIZE};
use crate::validation::{money_range, Amount, Transaction, TxInput};

/// Structural checks that need neither the chain nor the coin view
pub fn check_transaction(tx: &Transaction) -> Result<(), ConsensusError> {
    if tx.inputs.is_empty() {
        return Err(ConsensusError::NoInputs);
    }
    if tx.outputs.is_empty() {
        return Err(ConsensusError::NoOutputs);
    }
    if tx.serialized_size() > MAX_BLOCK_SIZE {
        return Err(ConsensusError::Oversize);
    }

    let mut total: Amount = 0;
    for output in &tx.outputs {
        if output.amount < 0 {
            return Err(ConsensusError::NegativeOutput);
        }
        if !money_range(output.amount) {
            return Err(ConsensusError::OutputTooLarge);
        }
        total = total
            .checked_add(output.amount)
            .filter(|sum| money_range(*sum))
            .ok_or(ConsensusError::OutputTotalTooLarge)?;
    }

    let mut seen = HashSet::new();
    for prevout in tx.prevouts() {
        if !seen.insert(*prevout) {
            return Err(ConsensusError::DuplicateInputs);
        }
    }

    if tx.is_coinbase() {
        if let TxInput::Coinbase { extra, .. } = &tx.inputs[0] {
            let script_len = 8 + extra.len();
            if !(MIN_COINBASE_SCRIPT_SIZE..=MAX_COINBASE_SCRIPT_SIZE).contains(&script_len) {
                return Err(ConsensusError::BadCoinbaseLength);
            }
        }
        return Ok(());
    }

    if tx
        .inputs
        .iter()
        .any(|input| matches!(input, TxInput::Coinbase { .. }))
    {
        return Err(ConsensusError::NullPrevout);
    }

    check_change_marker(tx)
}

/// At most one marker, pointing at an existing output
fn check_change_marker(tx: &Transaction) -> Result<(), ConsensusError> {
    let markers: Vec<u32> = tx
        .inputs
        .iter()
        .filter_map(|input| match input {
            TxInput::ChangeMarker { output_index } => Some(*output_index),
            _ => None,
        })
        .collect();

    match markers.as_slice() {
        [] => Ok(()),
        [index] if (*index as usize) < tx.outputs.len() && tx.real_inputs().next().is_some() => {
            Ok(())
        }
        _ => Err(ConsensusError::BadChangeMarker),
    }
}
