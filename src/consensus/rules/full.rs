//! Full-validation rules that need the coin view but not script execution

use std::collections::HashSet;
use tracing::debug;

use crate::consensus::{ConsensusError, ConsensusParams, RuleContext};
use crate::storage::{CoinStore, CoinView, StoreError};
use crate::validation::check_transaction;

/// Fetch every coin the block touches, then warm the cache for the next block
pub(super) async fn load_coin_view(
    ctx: &mut RuleContext<'_>,
    store: &dyn CoinStore,
) -> Result<(), ConsensusError> {
    let ids = CoinView::ids_for(ctx.block);
    let response = store.fetch_coins(&ids).await?;
    if response.block_hash != ctx.tip.hash {
        return Err(StoreError::TipMismatch {
            expected: ctx.tip.hash,
            actual: response.block_hash,
        }
        .into());
    }

    ctx.view.set(response.records.into_iter().flatten());
    debug!(height = ctx.height, requested = ids.len(), loaded = ctx.view.len(), "coin view loaded");

    if let Some(next) = ctx.next_block {
        store.prefetch(CoinView::ids_for(next));
    }
    Ok(())
}

pub(super) fn merkle_root(ctx: &mut RuleContext<'_>) -> Result<(), ConsensusError> {
    let (root, mutated) = ctx.block.compute_merkle_root();
    if root != ctx.block.header.merkle_root {
        return Err(ConsensusError::BadMerkleRoot);
    }
    if mutated {
        return Err(ConsensusError::DuplicateTransaction);
    }
    Ok(())
}

pub(super) fn check_coinbase(ctx: &mut RuleContext<'_>) -> Result<(), ConsensusError> {
    let transactions = &ctx.block.transactions;
    if !transactions.first().is_some_and(|tx| tx.is_coinbase()) {
        return Err(ConsensusError::MissingCoinbase);
    }
    if transactions.iter().skip(1).any(|tx| tx.is_coinbase()) {
        return Err(ConsensusError::MultipleCoinbase);
    }
    Ok(())
}

pub(super) fn check_pow_transactions(ctx: &mut RuleContext<'_>) -> Result<(), ConsensusError> {
    for tx in &ctx.block.transactions {
        if tx.is_coinstake() {
            return Err(ConsensusError::CoinstakeInPowBlock);
        }
        check_transaction(tx)?;
    }
    Ok(())
}

/// Coinbase pays nothing, the second transaction is the only coinstake
pub(super) fn check_pos_transactions(ctx: &mut RuleContext<'_>) -> Result<(), ConsensusError> {
    let transactions = &ctx.block.transactions;
    if !transactions.get(1).is_some_and(|tx| tx.is_coinstake()) {
        return Err(ConsensusError::MissingCoinstake);
    }
    if transactions.iter().skip(2).any(|tx| tx.is_coinstake()) {
        return Err(ConsensusError::MultipleCoinstake);
    }
    if transactions[0].total_output_value() != Some(0) {
        return Err(ConsensusError::BadCoinbasePosAmount);
    }
    for tx in transactions {
        check_transaction(tx)?;
    }
    Ok(())
}

/// The staker signs the header hash with the key its coinstake pays to
pub(super) fn pos_block_signature(ctx: &mut RuleContext<'_>) -> Result<(), ConsensusError> {
    let block = ctx.block;
    let signature = block.signature.as_ref().ok_or(ConsensusError::BadBlockSignature)?;
    let staker = block
        .coinstake()
        .and_then(|coinstake| coinstake.outputs.get(1))
        .and_then(|output| output.script_pubkey.destination())
        .ok_or(ConsensusError::BadBlockSignature)?;

    if signature.public_key.pubkey_hash() != staker
        || !signature.public_key.verify(&block.hash(), &signature.signature)
    {
        return Err(ConsensusError::BadBlockSignature);
    }
    Ok(())
}

pub(super) fn sig_op_budget(
    ctx: &mut RuleContext<'_>,
    params: &ConsensusParams,
) -> Result<(), ConsensusError> {
    let count: usize = ctx.block.transactions.iter().map(|tx| tx.sig_op_count()).sum();
    if count > params.max_block_sigops {
        return Err(ConsensusError::BadBlockSigOps {
            count,
            limit: params.max_block_sigops,
        });
    }
    Ok(())
}

/// Rejects repeated ids inside the block and ids that would overwrite
/// unspent coins (BIP30)
pub(super) fn duplicate_transactions(ctx: &mut RuleContext<'_>) -> Result<(), ConsensusError> {
    let mut seen = HashSet::with_capacity(ctx.block.transactions.len());
    for tx in &ctx.block.transactions {
        let hash = tx.hash();
        if !seen.insert(hash) {
            return Err(ConsensusError::DuplicateTransaction);
        }
        if ctx.view.access(&hash).is_some() {
            return Err(ConsensusError::Bip30(hash));
        }
    }
    Ok(())
}
