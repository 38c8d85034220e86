//! Chain state management
//!
//! Tracks the active tip and connects blocks on top of it. A block is
//! validated against a fresh coin view; only when every rule passes are the
//! view's changes written to the backing store and the tip advanced.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::info;

use crate::constants::MEDIAN_TIME_SPAN;
use crate::consensus::{Block, ChainTip, ConsensusError, ConsensusParams, ConsensusRuleEngine, RuleContext};
use crate::crypto::Hash;
use crate::storage::{CoinStore, CoinView, StoreError};

#[derive(Debug, Error)]
pub enum ChainStateError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    /// The store's tip marker has no matching saved tip summary
    #[error("cannot resume from stored tip {0}")]
    UnknownTip(Hash),
}

/// What a node needs besides the coin set to resume at its tip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipState {
    pub tip: ChainTip,
    /// Timestamps of the most recent blocks, oldest first
    pub recent_times: Vec<u64>,
}

impl TipState {
    fn genesis(genesis: &Block) -> Self {
        let tip = ChainTip::genesis(genesis);
        Self {
            recent_times: vec![tip.timestamp],
            tip,
        }
    }
}

/// Active chain on top of a coin store
pub struct ChainState {
    engine: ConsensusRuleEngine,
    store: Arc<dyn CoinStore>,
    tip: ChainTip,
    /// Timestamps of the most recent blocks, oldest first
    recent_times: VecDeque<u64>,
}

impl ChainState {
    /// Open the chain, writing genesis into an empty store and resuming
    /// from the saved tip summary otherwise
    pub async fn open(
        params: Arc<ConsensusParams>,
        store: Arc<dyn CoinStore>,
    ) -> Result<Self, ChainStateError> {
        let genesis = &params.genesis;
        let genesis_hash = genesis.hash();
        let stored = store.tip_hash().await?;

        let state = if stored.is_zero() {
            let mut view = CoinView::new();
            for tx in &genesis.transactions {
                view.update(tx, 0)?;
            }
            store.put(view.changes().updated, genesis_hash).await?;
            info!(genesis = %genesis_hash, network = ?params.network, "initialized chain state");
            TipState::genesis(genesis)
        } else {
            match store.tip_state().await? {
                Some(state) if state.tip.hash == stored => {
                    info!(height = state.tip.height, tip = %stored.short(), "resuming chain state");
                    state
                }
                _ if stored == genesis_hash => TipState::genesis(genesis),
                _ => return Err(ChainStateError::UnknownTip(stored)),
            }
        };

        let mut recent_times: VecDeque<u64> = state.recent_times.into_iter().collect();
        while recent_times.len() > MEDIAN_TIME_SPAN {
            recent_times.pop_front();
        }

        Ok(Self {
            engine: ConsensusRuleEngine::new(params),
            store,
            tip: state.tip,
            recent_times,
        })
    }

    pub fn tip(&self) -> &ChainTip {
        &self.tip
    }

    pub fn height(&self) -> u64 {
        self.tip.height
    }

    pub fn params(&self) -> &ConsensusParams {
        self.engine.params()
    }

    pub fn store(&self) -> Arc<dyn CoinStore> {
        Arc::clone(&self.store)
    }

    /// Connect a block using the local clock
    pub async fn connect_block(
        &mut self,
        block: &Block,
        next: Option<&Block>,
    ) -> Result<ChainTip, ConsensusError> {
        self.connect_block_at(block, next, unix_now()).await
    }

    /// Connect a block judged against `adjusted_time`
    pub async fn connect_block_at(
        &mut self,
        block: &Block,
        next: Option<&Block>,
        adjusted_time: u64,
    ) -> Result<ChainTip, ConsensusError> {
        if block.header.prev_hash != self.tip.hash {
            return Err(ConsensusError::BadPrevBlock(block.header.prev_hash));
        }

        let mut ctx = RuleContext::new(block, &self.tip, adjusted_time).with_next_block(next);
        self.engine.validate(&mut ctx, self.store.as_ref()).await?;

        let height = ctx.height;
        let chain_work = ctx.chain_work;
        let fees = ctx.block_fees;
        let changes = ctx.view.changes();
        drop(ctx);

        let hash = block.hash();
        self.store.delete(&changes.removed).await?;
        self.store.put(changes.updated, hash).await?;
        self.advance(block, height, chain_work);
        self.store.set_tip_state(&self.tip_state()).await?;

        info!(
            height,
            block = %hash.short(),
            transactions = block.transactions.len(),
            fees,
            "connected block"
        );
        Ok(self.tip.clone())
    }

    /// Connect consecutive blocks, warming the store for each successor
    /// while its predecessor is validated
    pub async fn connect_blocks(&mut self, blocks: &[Block]) -> Result<ChainTip, ConsensusError> {
        let now = unix_now();
        for (index, block) in blocks.iter().enumerate() {
            self.connect_block_at(block, blocks.get(index + 1), now).await?;
        }
        Ok(self.tip.clone())
    }

    pub fn tip_state(&self) -> TipState {
        TipState {
            tip: self.tip.clone(),
            recent_times: self.recent_times.iter().copied().collect(),
        }
    }

    fn advance(&mut self, block: &Block, height: u64, chain_work: u128) {
        let timestamp = block.header.timestamp;
        self.recent_times.push_back(timestamp);
        while self.recent_times.len() > MEDIAN_TIME_SPAN {
            self.recent_times.pop_front();
        }

        let period_start_time = if height % self.params().retarget_interval == 0 {
            timestamp
        } else {
            self.tip.period_start_time
        };

        self.tip = ChainTip {
            hash: block.hash(),
            height,
            timestamp,
            bits: block.header.bits,
            median_time_past: median(&self.recent_times),
            period_start_time,
            chain_work,
        };
    }
}

fn median(times: &VecDeque<u64>) -> u64 {
    let mut sorted: Vec<u64> = times.iter().copied().collect();
    sorted.sort_unstable();
    sorted.get(sorted.len() / 2).copied().unwrap_or(0)
}

/// Seconds since the unix epoch
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
