//! Consensus parameters
//!
//! Everything peers must agree on to stay on the same chain. Parameters are
//! fixed per network at startup; nothing here is read from configuration
//! files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::{COIN, MAX_BLOCK_SIGOPS, MAX_BLOCK_SIZE};
use crate::consensus::{Block, BlockHeader};
use crate::crypto::{hash_bytes, Hash};
use crate::validation::{Amount, Script, Transaction, TxInput, TxOutput};

/// Chain the node follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Regtest,
}

/// Which consensus profile validates a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileKind {
    ProofOfWork,
    ProofOfStake,
}

#[derive(Debug, Clone)]
pub struct ConsensusParams {
    pub network: Network,
    /// Easiest allowed difficulty (compact)
    pub pow_limit_bits: u32,
    /// Blocks per difficulty period
    pub retarget_interval: u64,
    /// Target seconds between blocks
    pub target_spacing: u64,
    pub initial_subsidy: Amount,
    pub halving_interval: u64,
    /// Flat reward of a proof-of-stake block
    pub pos_reward: Amount,
    /// Blocks up to and including this height are proof-of-work
    pub last_pow_height: u64,
    /// Confirmations before coinbase and coinstake outputs can be spent
    pub coinbase_maturity: u64,
    pub max_block_size: usize,
    pub max_block_sigops: usize,
    /// Seconds a block timestamp may run ahead of the adjusted clock
    pub max_future_block_time: u64,
    pub checkpoints: BTreeMap<u64, Hash>,
    /// Blocks at or below this height skip expensive validation (0 disables)
    pub assume_valid_height: u64,
    /// Fraction of transferred value owed as fee
    pub tx_fee_rate: f64,
    /// Fraction of the expected fees owed to the fee recipients
    pub fee_split_share: f64,
    /// Rotation of fee-recipient pubkey hashes
    pub fee_recipients: Vec<Vec<Hash>>,
    /// Blocks each recipient set stays active
    pub rotation_interval: u64,
    pub genesis: Block,
}

impl ConsensusParams {
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Mainnet => Self::mainnet(),
            Network::Regtest => Self::regtest(),
        }
    }

    pub fn mainnet() -> Self {
        let genesis = build_genesis(1_700_000_000, 0x1d00ffff, b"splitfee mainnet genesis");
        let mut checkpoints = BTreeMap::new();
        checkpoints.insert(0, genesis.hash());

        Self {
            network: Network::Mainnet,
            pow_limit_bits: 0x1d00ffff,
            retarget_interval: 2016,
            target_spacing: 600,
            initial_subsidy: 50 * COIN,
            halving_interval: 210_000,
            pos_reward: COIN,
            last_pow_height: 12_500,
            coinbase_maturity: 100,
            max_block_size: MAX_BLOCK_SIZE,
            max_block_sigops: MAX_BLOCK_SIGOPS,
            max_future_block_time: 2 * 60 * 60,
            checkpoints,
            assume_valid_height: 0,
            tx_fee_rate: 0.001,
            fee_split_share: 0.5,
            fee_recipients: recipient_rotation("mainnet", 4),
            rotation_interval: 10_000,
            genesis,
        }
    }

    /// Local testing network: trivial proof of work, short maturity
    pub fn regtest() -> Self {
        let genesis = build_genesis(1_700_000_000, 0x207fffff, b"splitfee regtest genesis");

        Self {
            network: Network::Regtest,
            pow_limit_bits: 0x207fffff,
            retarget_interval: 2016,
            target_spacing: 600,
            initial_subsidy: 50 * COIN,
            halving_interval: 150,
            pos_reward: COIN,
            last_pow_height: 1000,
            coinbase_maturity: 1,
            max_block_size: MAX_BLOCK_SIZE,
            max_block_sigops: MAX_BLOCK_SIGOPS,
            max_future_block_time: 2 * 60 * 60,
            checkpoints: BTreeMap::new(),
            assume_valid_height: 0,
            tx_fee_rate: 0.001,
            fee_split_share: 0.5,
            fee_recipients: recipient_rotation("regtest", 2),
            rotation_interval: 100,
            genesis,
        }
    }

    /// Fee recipients active at `height`
    pub fn fee_recipients_at(&self, height: u64) -> &[Hash] {
        if self.fee_recipients.is_empty() {
            return &[];
        }
        let interval = self.rotation_interval.max(1);
        let slot = (height / interval) as usize % self.fee_recipients.len();
        &self.fee_recipients[slot]
    }

    pub fn profile_at(&self, height: u64) -> ProfileKind {
        if height <= self.last_pow_height {
            ProfileKind::ProofOfWork
        } else {
            ProfileKind::ProofOfStake
        }
    }

    /// Highest checkpointed height, if any
    pub fn last_checkpoint_height(&self) -> Option<u64> {
        self.checkpoints.keys().next_back().copied()
    }
}

/// One recipient per slot, derived from a network label
fn recipient_rotation(label: &str, slots: usize) -> Vec<Vec<Hash>> {
    (0..slots)
        .map(|slot| vec![hash_bytes(format!("{label}-fee-recipient-{slot}").as_bytes())])
        .collect()
}

/// Genesis carries a single unspendable output; it issues nothing.
fn build_genesis(timestamp: u64, bits: u32, message: &[u8]) -> Block {
    let coinbase = Transaction::new(
        vec![TxInput::Coinbase {
            height: 0,
            extra: message.to_vec(),
        }],
        vec![TxOutput::new(0, Script::op_return(&hash_bytes(message).0))],
    );

    let mut block = Block::new(
        BlockHeader::new(1, Hash::zero(), Hash::zero(), timestamp, bits, 0),
        vec![coinbase],
    );
    block.update_merkle_root();
    block
}
