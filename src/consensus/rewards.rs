//! Block reward schedule
//!
//! Proof-of-work blocks pay a subsidy that halves every `halving_interval`
//! blocks. Proof-of-stake blocks pay a flat reward. The subsidy is the only
//! value a block may create.

use crate::consensus::{ConsensusParams, ProfileKind};
use crate::validation::Amount;

/// Issuance allowed for the block at `height`
pub fn block_subsidy(params: &ConsensusParams, height: u64) -> Amount {
    if height == 0 {
        return 0;
    }
    match params.profile_at(height) {
        ProfileKind::ProofOfStake => params.pos_reward,
        ProfileKind::ProofOfWork => {
            let halvings = height / params.halving_interval;
            if halvings >= 64 {
                0
            } else {
                params.initial_subsidy >> halvings
            }
        }
    }
}

/// Total issued by the subsidy schedule after a given number of blocks.
/// Used for testing and verification only.
pub fn total_issued(params: &ConsensusParams, num_blocks: u64) -> Amount {
    (1..=num_blocks)
        .map(|height| block_subsidy(params, height))
        .fold(0, Amount::saturating_add)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_MONEY;

    #[test]
    fn test_genesis_has_no_reward() {
        assert_eq!(block_subsidy(&ConsensusParams::mainnet(), 0), 0);
    }

    #[test]
    fn test_subsidy_halves() {
        let params = ConsensusParams::mainnet();
        let first = block_subsidy(&params, 1);
        assert_eq!(first, params.initial_subsidy);
        assert_eq!(block_subsidy(&params, params.halving_interval), first / 2);
        assert_eq!(block_subsidy(&params, params.halving_interval * 64), 0);
    }

    #[test]
    fn test_pos_reward_after_last_pow_block() {
        let params = ConsensusParams::regtest();
        assert_eq!(block_subsidy(&params, params.last_pow_height + 1), params.pos_reward);
    }

    #[test]
    fn test_supply_never_exceeds_money_range() {
        let mut params = ConsensusParams::mainnet();
        params.halving_interval = 10;
        params.last_pow_height = u64::MAX;
        assert!(total_issued(&params, 1_000) <= MAX_MONEY);
    }
}
