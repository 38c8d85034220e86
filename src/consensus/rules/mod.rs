//! Consensus rules
//!
//! Each rule is one ordered check against a `RuleContext`. A profile is the
//! fixed list of rules for proof-of-work or proof-of-stake blocks, sorted by
//! phase. Rules never run out of phase order.

mod block;
mod coinview;
mod contextual;
mod fee;
mod full;
mod header;

use crate::consensus::{ConsensusError, ConsensusParams, ProfileKind, RuleContext};
use crate::storage::CoinStore;

/// Pipeline phase, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RulePhase {
    /// Header alone, no chain context
    Header,
    /// Depends on the chain tip
    ContextualHeader,
    /// Block contents against the tip, no coins
    ContextualBlock,
    /// Needs the coin view
    FullValidation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    CheckVersion,
    CheckWork,
    Checkpoints,
    AssumeValid,
    HeaderTime,
    HeaderDifficulty,
    TransactionLocktime,
    CoinbaseHeight,
    BlockSize,
    LoadCoinView,
    MerkleRoot,
    CheckCoinbase,
    CheckPowTransactions,
    CheckPosTransactions,
    PosBlockSignature,
    SigOpBudget,
    DuplicateTransactions,
    CoinView,
    FundsPreservation,
    BlockFee,
}

impl Rule {
    pub fn phase(&self) -> RulePhase {
        use Rule::*;
        match self {
            CheckVersion | CheckWork => RulePhase::Header,
            Checkpoints | AssumeValid | HeaderTime | HeaderDifficulty => RulePhase::ContextualHeader,
            TransactionLocktime | CoinbaseHeight | BlockSize => RulePhase::ContextualBlock,
            LoadCoinView | MerkleRoot | CheckCoinbase | CheckPowTransactions
            | CheckPosTransactions | PosBlockSignature | SigOpBudget | DuplicateTransactions
            | CoinView | FundsPreservation | BlockFee => RulePhase::FullValidation,
        }
    }

    /// Rules whose whole body is bypassed for trusted blocks. `CoinView`
    /// trims its own work instead because the UTXO update must still happen.
    pub fn skippable(&self) -> bool {
        use Rule::*;
        matches!(
            self,
            MerkleRoot
                | CheckPowTransactions
                | CheckPosTransactions
                | PosBlockSignature
                | SigOpBudget
                | DuplicateTransactions
                | FundsPreservation
                | BlockFee
        )
    }

    pub async fn run(
        &self,
        ctx: &mut RuleContext<'_>,
        params: &ConsensusParams,
        store: &dyn CoinStore,
    ) -> Result<(), ConsensusError> {
        match self {
            Rule::CheckVersion => header::check_version(ctx),
            Rule::CheckWork => header::check_work(ctx, params),
            Rule::Checkpoints => contextual::checkpoints(ctx, params),
            Rule::AssumeValid => contextual::assume_valid(ctx, params),
            Rule::HeaderTime => contextual::header_time(ctx, params),
            Rule::HeaderDifficulty => contextual::header_difficulty(ctx, params),
            Rule::TransactionLocktime => block::transaction_locktime(ctx),
            Rule::CoinbaseHeight => block::coinbase_height(ctx),
            Rule::BlockSize => block::block_size(ctx, params),
            Rule::LoadCoinView => full::load_coin_view(ctx, store).await,
            Rule::MerkleRoot => full::merkle_root(ctx),
            Rule::CheckCoinbase => full::check_coinbase(ctx),
            Rule::CheckPowTransactions => full::check_pow_transactions(ctx),
            Rule::CheckPosTransactions => full::check_pos_transactions(ctx),
            Rule::PosBlockSignature => full::pos_block_signature(ctx),
            Rule::SigOpBudget => full::sig_op_budget(ctx, params),
            Rule::DuplicateTransactions => full::duplicate_transactions(ctx),
            Rule::CoinView => coinview::coin_view(ctx, params).await,
            Rule::FundsPreservation => fee::funds_preservation(ctx, params),
            Rule::BlockFee => fee::block_fee(ctx, params),
        }
    }
}

/// Ordered rule list for one kind of block
#[derive(Debug, Clone)]
pub struct ConsensusProfile {
    kind: ProfileKind,
    rules: Vec<Rule>,
}

impl ConsensusProfile {
    pub fn proof_of_work() -> Self {
        use Rule::*;
        Self::new(
            ProfileKind::ProofOfWork,
            vec![
                CheckVersion,
                CheckWork,
                Checkpoints,
                AssumeValid,
                HeaderTime,
                HeaderDifficulty,
                TransactionLocktime,
                CoinbaseHeight,
                BlockSize,
                LoadCoinView,
                MerkleRoot,
                CheckCoinbase,
                CheckPowTransactions,
                SigOpBudget,
                DuplicateTransactions,
                CoinView,
                FundsPreservation,
                BlockFee,
            ],
        )
    }

    pub fn proof_of_stake() -> Self {
        use Rule::*;
        Self::new(
            ProfileKind::ProofOfStake,
            vec![
                CheckVersion,
                CheckWork,
                Checkpoints,
                AssumeValid,
                HeaderTime,
                HeaderDifficulty,
                TransactionLocktime,
                CoinbaseHeight,
                BlockSize,
                LoadCoinView,
                MerkleRoot,
                CheckCoinbase,
                CheckPosTransactions,
                PosBlockSignature,
                SigOpBudget,
                DuplicateTransactions,
                CoinView,
                FundsPreservation,
                BlockFee,
            ],
        )
    }

    fn new(kind: ProfileKind, rules: Vec<Rule>) -> Self {
        debug_assert!(
            rules.windows(2).all(|pair| pair[0].phase() <= pair[1].phase()),
            "rules out of phase order"
        );
        Self { kind, rules }
    }

    pub fn kind(&self) -> ProfileKind {
        self.kind
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_are_phase_ordered() {
        for profile in [ConsensusProfile::proof_of_work(), ConsensusProfile::proof_of_stake()] {
            assert!(profile
                .rules()
                .windows(2)
                .all(|pair| pair[0].phase() <= pair[1].phase()));
        }
    }

    #[test]
    fn test_fee_rules_run_last() {
        let profile = ConsensusProfile::proof_of_work();
        let rules = profile.rules();
        assert_eq!(rules[rules.len() - 2], Rule::FundsPreservation);
        assert_eq!(rules[rules.len() - 1], Rule::BlockFee);
        let coin_view = rules.iter().position(|rule| *rule == Rule::CoinView);
        let load = rules.iter().position(|rule| *rule == Rule::LoadCoinView);
        assert!(load < coin_view);
    }

    #[test]
    fn test_pos_profile_checks_signature() {
        let profile = ConsensusProfile::proof_of_stake();
        assert_eq!(profile.kind(), ProfileKind::ProofOfStake);
        assert!(profile.rules().contains(&Rule::PosBlockSignature));
        assert!(!ConsensusProfile::proof_of_work()
            .rules()
            .contains(&Rule::PosBlockSignature));
    }
}
