//! Rules that place the header against the chain tip

use tracing::debug;

use crate::consensus::{next_bits, ConsensusError, ConsensusParams, RuleContext};

pub(super) fn checkpoints(
    ctx: &mut RuleContext<'_>,
    params: &ConsensusParams,
) -> Result<(), ConsensusError> {
    if let Some(expected) = params.checkpoints.get(&ctx.height) {
        let hash = ctx.block.hash();
        if hash != *expected {
            return Err(ConsensusError::CheckpointMismatch {
                height: ctx.height,
                hash,
            });
        }
    }
    Ok(())
}

/// Blocks buried under a checkpoint or the assume-valid height are trusted
pub(super) fn assume_valid(
    ctx: &mut RuleContext<'_>,
    params: &ConsensusParams,
) -> Result<(), ConsensusError> {
    let covered_by_assume_valid =
        params.assume_valid_height > 0 && ctx.height <= params.assume_valid_height;
    let covered_by_checkpoint = params
        .last_checkpoint_height()
        .is_some_and(|last| last > 0 && ctx.height <= last);

    if covered_by_assume_valid || covered_by_checkpoint {
        debug!(height = ctx.height, "skipping full validation for trusted block");
        ctx.skip_validation = true;
    }
    Ok(())
}

pub(super) fn header_time(
    ctx: &mut RuleContext<'_>,
    params: &ConsensusParams,
) -> Result<(), ConsensusError> {
    let time = ctx.block.header.timestamp;
    if time <= ctx.tip.median_time_past {
        return Err(ConsensusError::TimeTooOld {
            time,
            median_time_past: ctx.tip.median_time_past,
        });
    }
    if time > ctx.adjusted_time.saturating_add(params.max_future_block_time) {
        return Err(ConsensusError::TimeTooNew {
            time,
            now: ctx.adjusted_time,
        });
    }
    Ok(())
}

pub(super) fn header_difficulty(
    ctx: &mut RuleContext<'_>,
    params: &ConsensusParams,
) -> Result<(), ConsensusError> {
    let tip = ctx.tip;
    let expected = next_bits(
        params,
        tip.height,
        tip.bits,
        tip.timestamp,
        tip.period_start_time,
    );
    let actual = ctx.block.header.bits;
    if actual != expected {
        return Err(ConsensusError::BadDifficultyBits { expected, actual });
    }
    Ok(())
}
