//! Per-validation scratch state

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::consensus::{block_work, Block};
use crate::crypto::Hash;
use crate::storage::CoinView;
use crate::validation::{Amount, Script};

/// Summary of the block a new block must extend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    pub hash: Hash,
    pub height: u64,
    pub timestamp: u64,
    pub bits: u32,
    /// Median timestamp of the last blocks up to and including the tip
    pub median_time_past: u64,
    /// Timestamp of the first block of the current difficulty period
    pub period_start_time: u64,
    pub chain_work: u128,
}

impl ChainTip {
    pub fn genesis(block: &Block) -> Self {
        Self {
            hash: block.hash(),
            height: 0,
            timestamp: block.header.timestamp,
            bits: block.header.bits,
            median_time_past: block.header.timestamp,
            period_start_time: block.header.timestamp,
            chain_work: block_work(block.header.bits),
        }
    }
}

/// State threaded through one run of the rule pipeline.
///
/// Built for exactly one block and dropped afterwards; the view it owns is
/// the only copy of the block's UTXO changes until they are committed.
pub struct RuleContext<'a> {
    pub block: &'a Block,
    /// Block expected to follow, used only to warm the coin cache
    pub next_block: Option<&'a Block>,
    pub height: u64,
    pub tip: &'a ChainTip,
    /// Network-adjusted clock, seconds since the epoch
    pub adjusted_time: u64,
    pub view: CoinView,
    /// Real input value per transaction
    pub total_in: HashMap<Hash, Amount>,
    /// Locking scripts of each transaction's real inputs
    pub input_scripts: HashMap<Hash, Vec<Script>>,
    /// Set for checkpoint or assume-valid covered blocks
    pub skip_validation: bool,
    pub chain_work: u128,
    /// Fees paid by non-reward transactions
    pub block_fees: Amount,
}

impl<'a> RuleContext<'a> {
    pub fn new(block: &'a Block, tip: &'a ChainTip, adjusted_time: u64) -> Self {
        Self {
            block,
            next_block: None,
            height: tip.height + 1,
            tip,
            adjusted_time,
            view: CoinView::new(),
            total_in: HashMap::new(),
            input_scripts: HashMap::new(),
            skip_validation: false,
            chain_work: tip.chain_work,
            block_fees: 0,
        }
    }

    pub fn with_next_block(mut self, next: Option<&'a Block>) -> Self {
        self.next_block = next;
        self
    }

    pub fn input_scripts_of(&self, tx_hash: &Hash) -> &[Script] {
        self.input_scripts
            .get(tx_hash)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
