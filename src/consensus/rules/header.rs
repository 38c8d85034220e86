use crate::consensus::{
    block_work, check_proof_of_work, compact_to_target, ConsensusError, ConsensusParams,
    ProfileKind, RuleContext,
};

const MIN_BLOCK_VERSION: u32 = 1;

pub(super) fn check_version(ctx: &mut RuleContext<'_>) -> Result<(), ConsensusError> {
    let version = ctx.block.header.version;
    if version < MIN_BLOCK_VERSION {
        return Err(ConsensusError::BadVersion(version));
    }
    Ok(())
}

/// Proof-of-work blocks must meet their target. Stake blocks are not mined
/// but still carry valid difficulty bits so chain work accumulates.
pub(super) fn check_work(
    ctx: &mut RuleContext<'_>,
    params: &ConsensusParams,
) -> Result<(), ConsensusError> {
    let header = &ctx.block.header;
    match params.profile_at(ctx.height) {
        ProfileKind::ProofOfWork => {
            if !check_proof_of_work(&ctx.block.hash(), header.bits) {
                return Err(ConsensusError::HighHash);
            }
        }
        ProfileKind::ProofOfStake => {
            if compact_to_target(header.bits) == [0u8; 32] {
                return Err(ConsensusError::HighHash);
            }
        }
    }
    ctx.chain_work = ctx.tip.chain_work.saturating_add(block_work(header.bits));
    Ok(())
}
