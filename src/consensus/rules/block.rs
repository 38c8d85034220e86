use crate::consensus::{ConsensusError, ConsensusParams, RuleContext};
use crate::validation::TxInput;

/// Lock times are judged against the tip's median time past
pub(super) fn transaction_locktime(ctx: &mut RuleContext<'_>) -> Result<(), ConsensusError> {
    let cutoff_time = ctx.tip.median_time_past;
    for tx in &ctx.block.transactions {
        if !tx.is_final(ctx.height, cutoff_time) {
            return Err(ConsensusError::NonFinalTransaction(tx.hash()));
        }
    }
    Ok(())
}

pub(super) fn coinbase_height(ctx: &mut RuleContext<'_>) -> Result<(), ConsensusError> {
    let coinbase = ctx.block.coinbase().ok_or(ConsensusError::MissingCoinbase)?;
    match &coinbase.inputs[0] {
        TxInput::Coinbase { height, .. } if *height == ctx.height => Ok(()),
        TxInput::Coinbase { height, .. } => Err(ConsensusError::BadCoinbaseHeight {
            expected: ctx.height,
            actual: *height,
        }),
        _ => Err(ConsensusError::MissingCoinbase),
    }
}

pub(super) fn block_size(
    ctx: &mut RuleContext<'_>,
    params: &ConsensusParams,
) -> Result<(), ConsensusError> {
    if ctx.block.transactions.is_empty() || ctx.block.serialized_size() > params.max_block_size {
        return Err(ConsensusError::BadBlockLength);
    }
    Ok(())
}
