//! Consensus rule engine
//!
//! Runs the profile for a block's height in order and stops at the first
//! failing rule. Nothing is written anywhere: the caller commits the
//! context's coin view only after `validate` succeeds.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::consensus::{
    ConsensusError, ConsensusParams, ConsensusProfile, ProfileKind, RuleContext,
};
use crate::storage::CoinStore;

pub struct ConsensusRuleEngine {
    params: Arc<ConsensusParams>,
    proof_of_work: ConsensusProfile,
    proof_of_stake: ConsensusProfile,
}

impl ConsensusRuleEngine {
    pub fn new(params: Arc<ConsensusParams>) -> Self {
        Self {
            params,
            proof_of_work: ConsensusProfile::proof_of_work(),
            proof_of_stake: ConsensusProfile::proof_of_stake(),
        }
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn profile_for(&self, height: u64) -> &ConsensusProfile {
        match self.params.profile_at(height) {
            ProfileKind::ProofOfWork => &self.proof_of_work,
            ProfileKind::ProofOfStake => &self.proof_of_stake,
        }
    }

    pub async fn validate(
        &self,
        ctx: &mut RuleContext<'_>,
        store: &dyn CoinStore,
    ) -> Result<(), ConsensusError> {
        let profile = self.profile_for(ctx.height);
        let block_hash = ctx.block.hash();

        for rule in profile.rules() {
            if ctx.skip_validation && rule.skippable() {
                trace!(?rule, height = ctx.height, "rule skipped");
                continue;
            }
            trace!(?rule, height = ctx.height, "running rule");

            if let Err(error) = rule.run(ctx, &self.params, store).await {
                warn!(
                    height = ctx.height,
                    block = %block_hash.short(),
                    ?rule,
                    code = error.code(),
                    %error,
                    "block rejected"
                );
                return Err(error);
            }
        }

        debug!(
            height = ctx.height,
            block = %block_hash.short(),
            profile = ?profile.kind(),
            skipped = ctx.skip_validation,
            "block passed consensus rules"
        );
        Ok(())
    }
}
