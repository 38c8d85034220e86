//! Proof-of-work nonce search

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::consensus::{check_proof_of_work, Block};

/// Mining result
#[derive(Debug)]
pub enum MiningResult {
    /// Found a nonce meeting the block's target
    Success(Block),
    /// Stopped through the stop signal
    Interrupted,
    /// Every nonce in the search range failed
    Exhausted,
}

/// Block miner
#[derive(Clone, Default)]
pub struct Miner {
    stop_signal: Arc<AtomicBool>,
}

impl Miner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a stop signal handle
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }

    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.stop_signal.store(false, Ordering::SeqCst);
    }

    /// Search nonces until the header hash meets its own `bits`
    pub fn mine_block(&self, block: Block) -> MiningResult {
        self.mine_range(block, u64::MAX)
    }

    /// Search at most `max_attempts` nonces from the block's current one
    pub fn mine_range(&self, mut block: Block, max_attempts: u64) -> MiningResult {
        let start = block.header.nonce;
        for attempt in 0..max_attempts {
            if self.stop_signal.load(Ordering::SeqCst) {
                debug!(attempts = attempt, "mining interrupted");
                return MiningResult::Interrupted;
            }

            let hash = block.hash();
            if check_proof_of_work(&hash, block.header.bits) {
                info!(block = %hash.short(), nonce = block.header.nonce, attempts = attempt + 1, "mined block");
                return MiningResult::Success(block);
            }
            block.header.nonce = start.wrapping_add(attempt + 1);
        }
        MiningResult::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{BlockHeader, ConsensusParams};
    use crate::crypto::Hash;

    fn block_with_bits(bits: u32) -> Block {
        Block::new(BlockHeader::new(1, Hash::zero(), Hash::zero(), 0, bits, 0), vec![])
    }

    #[test]
    fn test_mines_easy_target() {
        let bits = ConsensusParams::regtest().pow_limit_bits;
        match Miner::new().mine_block(block_with_bits(bits)) {
            MiningResult::Success(block) => assert!(check_proof_of_work(&block.hash(), bits)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_stop_signal_interrupts() {
        let miner = Miner::new();
        let signal = miner.stop_signal();
        assert!(!signal.load(Ordering::SeqCst));

        miner.stop();
        assert!(signal.load(Ordering::SeqCst));
        assert!(matches!(
            miner.mine_block(block_with_bits(0x1d00ffff)),
            MiningResult::Interrupted
        ));

        miner.reset();
        assert!(!signal.load(Ordering::SeqCst));
    }

    #[test]
    fn test_range_exhausted() {
        // a mainnet target is out of reach in a handful of attempts
        let result = Miner::new().mine_range(block_with_bits(0x1d00ffff), 4);
        assert!(matches!(result, MiningResult::Exhausted));
    }
}
