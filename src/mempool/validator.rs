//! Mempool admission
//!
//! A candidate moves through
//! `PreChecked -> ViewLoaded -> ConflictChecked -> FeeChecked -> Accepted`,
//! or stops in `Rejected`. Everything from the existence check to the size
//! trim runs under the pool's write guard, so concurrent submissions are
//! serialized at the point of mutation while read-only queries share the
//! read guard.

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::constants::ROUNDING_TOLERANCE;
use crate::consensus::{expected_fee, Block, ChainTip, ConsensusError, ConsensusParams};
use crate::crypto::Hash;
use crate::mempool::{
    load_view, MempoolEntry, MempoolError, MempoolPersistence, MempoolSettings, PersistenceError,
    TransactionBroadcaster, TxMempool,
};
use crate::storage::{unix_now, CoinStore, CoinView};
use crate::validation::{check_transaction, verify_input, Amount, ScriptError, Script, Transaction};

/// At most this many pooled transactions may be evicted by one replacement
pub const MAX_REPLACEMENT_EVICTIONS: usize = 100;

/// Where a candidate stood when it was rejected.
///
/// Each variant names the check that was running: `PreChecked` covers the
/// context-free checks, `ViewLoaded` input resolution, `ConflictChecked`
/// double spends and replacement, `FeeChecked` fees, package limits and
/// scripts, and `Accepted` the final insertion and trim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationState {
    PreChecked,
    ViewLoaded,
    ConflictChecked,
    FeeChecked,
    Accepted,
    Rejected,
}

/// A transaction the pool refused. Never fatal to the node.
#[derive(Debug, Error)]
#[error("transaction {tx_hash} rejected at {stage:?}: {error}")]
pub struct Rejection {
    pub tx_hash: Hash,
    pub stage: ValidationState,
    #[source]
    pub error: MempoolError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MempoolInfo {
    pub count: usize,
    pub bytes: usize,
    pub max_bytes: usize,
    pub min_relay_fee_per_kb: Amount,
}

/// Inputs resolved against the candidate's coin view
struct ResolvedInputs {
    scripts: Vec<Script>,
    value_in: Amount,
    priority: f64,
}

type ScriptCheck = (usize, JoinHandle<Result<(), ScriptError>>);

pub struct MempoolValidator {
    pool: RwLock<TxMempool>,
    params: Arc<ConsensusParams>,
    store: Arc<dyn CoinStore>,
    settings: MempoolSettings,
    tip: RwLock<ChainTip>,
    broadcaster: Option<Arc<dyn TransactionBroadcaster>>,
}

impl MempoolValidator {
    pub fn new(
        params: Arc<ConsensusParams>,
        store: Arc<dyn CoinStore>,
        settings: MempoolSettings,
        tip: ChainTip,
    ) -> Self {
        Self {
            pool: RwLock::new(TxMempool::new()),
            params,
            store,
            settings,
            tip: RwLock::new(tip),
            broadcaster: None,
        }
    }

    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn TransactionBroadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn settings(&self) -> &MempoolSettings {
        &self.settings
    }

    pub async fn contains(&self, hash: &Hash) -> bool {
        self.pool.read().await.contains(hash)
    }

    pub async fn get(&self, hash: &Hash) -> Option<MempoolEntry> {
        self.pool.read().await.get(hash).cloned()
    }

    pub async fn len(&self) -> usize {
        self.pool.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pool.read().await.is_empty()
    }

    pub async fn info(&self) -> MempoolInfo {
        let pool = self.pool.read().await;
        MempoolInfo {
            count: pool.len(),
            bytes: pool.total_size(),
            max_bytes: self.settings.max_size_bytes,
            min_relay_fee_per_kb: self.settings.min_relay_fee_per_kb,
        }
    }

    /// Pooled entries in block order: parents first, best fee rate first
    pub async fn candidates(&self) -> Vec<MempoolEntry> {
        let pool = self.pool.read().await;
        pool.block_candidates().into_iter().cloned().collect()
    }

    /// Remove a transaction and its descendants, returning how many left
    pub async fn remove(&self, hash: &Hash) -> usize {
        self.pool.write().await.remove_recursive(hash).len()
    }

    /// Drop what a newly connected block confirmed or invalidated and move
    /// to its tip
    pub async fn block_connected(&self, block: &Block, tip: ChainTip) {
        let removed = self.pool.write().await.remove_for_block(block);
        *self.tip.write().await = tip;
        debug!(removed, "mempool updated for connected block");
    }

    pub async fn accept_to_memory_pool(&self, tx: Transaction) -> Result<Hash, Rejection> {
        self.accept_with_time(tx, unix_now()).await
    }

    /// Admit `tx` as if it arrived at `time`
    pub async fn accept_with_time(&self, tx: Transaction, time: u64) -> Result<Hash, Rejection> {
        let tx_hash = tx.hash();
        let mut stage = ValidationState::PreChecked;

        if let Err(error) = self.admit(&tx, tx_hash, time, &mut stage).await {
            debug!(tx = %tx_hash.short(), ?stage, %error, "transaction rejected");
            return Err(Rejection {
                tx_hash,
                stage,
                error,
            });
        }

        if let Some(broadcaster) = &self.broadcaster {
            if let Err(error) = broadcaster.broadcast(&tx).await {
                warn!(tx = %tx_hash.short(), %error, "failed to relay accepted transaction");
            }
        }
        Ok(tx_hash)
    }

    /// Submit a batch, one result per transaction in order
    pub async fn accept_many(&self, txs: Vec<Transaction>) -> Vec<Result<Hash, Rejection>> {
        let mut results = Vec::with_capacity(txs.len());
        for tx in txs {
            results.push(self.accept_to_memory_pool(tx).await);
        }
        results
    }

    pub async fn save_to(&self, persistence: &dyn MempoolPersistence) -> Result<usize, PersistenceError> {
        let snapshot = self.pool.read().await.snapshot();
        persistence.save(&snapshot).await?;
        Ok(snapshot.len())
    }

    /// Re-admit a saved pool, keeping each transaction's original time.
    /// Returns the number accepted.
    pub async fn load_persisted(
        &self,
        persistence: &dyn MempoolPersistence,
    ) -> Result<usize, PersistenceError> {
        let saved = persistence.load().await?;
        let total = saved.len();
        let mut accepted = 0;
        for entry in saved {
            match self.accept_with_time(entry.tx, entry.time).await {
                Ok(_) => accepted += 1,
                Err(rejection) => debug!(%rejection, "dropped persisted transaction"),
            }
        }
        info!(accepted, total, "loaded persisted mempool");
        Ok(accepted)
    }

    async fn admit(
        &self,
        tx: &Transaction,
        tx_hash: Hash,
        time: u64,
        stage: &mut ValidationState,
    ) -> Result<(), MempoolError> {
        if tx.is_reward() {
            return Err(MempoolError::RewardTransaction);
        }
        check_transaction(tx)?;

        let tip = self.tip.read().await.clone();
        let height = tip.height + 1;
        if !tx.is_final(height, tip.median_time_past) {
            return Err(MempoolError::NonFinal);
        }

        let mut pool = self.pool.write().await;
        if pool.contains(&tx_hash) {
            return Err(MempoolError::AlreadyKnown(tx_hash));
        }

        *stage = ValidationState::ViewLoaded;
        let view = load_view(&pool, self.store.as_ref(), tx, height).await?;
        let inputs = self.resolve_inputs(&view, tx, height)?;
        let value_out = tx
            .total_output_value()
            .ok_or(ConsensusError::OutputTotalTooLarge)?;
        if inputs.value_in < value_out {
            return Err(ConsensusError::InBelowOut {
                value_in: inputs.value_in,
                value_out,
            }
            .into());
        }
        let fee = inputs.value_in - value_out;
        let size = tx.serialized_size();

        *stage = ValidationState::ConflictChecked;
        let replaced = self.check_conflicts(&pool, tx, fee, size)?;

        *stage = ValidationState::FeeChecked;
        let expected = expected_fee(tx, &inputs.scripts, self.params.tx_fee_rate);
        if fee < expected - ROUNDING_TOLERANCE {
            return Err(MempoolError::InsufficientFee { fee, expected });
        }
        let minimum = self.settings.min_relay_fee(size);
        if fee < minimum {
            return Err(MempoolError::MinRelayFee { fee, minimum });
        }
        self.check_package_limits(&pool, tx, size, &replaced)?;
        verify_scripts(&view, tx, tx_hash).await?;

        *stage = ValidationState::Accepted;
        for root in &replaced {
            let evicted = pool.remove_recursive(root);
            debug!(replaced = %root.short(), evicted = evicted.len(), "replaced pooled transaction");
        }
        let ancestors = pool.calculate_ancestors(tx);
        let entry = MempoolEntry::new(tx.clone(), fee, time, tip.height, inputs.priority);
        pool.add_unchecked(entry, &ancestors);

        let expired = pool.expire(time.saturating_sub(self.settings.expiry_secs()));
        let trimmed = pool.trim_to_size(self.settings.max_size_bytes);
        if expired > 0 || !trimmed.is_empty() {
            debug!(expired, trimmed = trimmed.len(), "mempool limited");
        }
        if !pool.contains(&tx_hash) {
            return Err(MempoolError::PoolFull);
        }

        debug!(tx = %tx_hash.short(), fee, size, pooled = pool.len(), "accepted transaction");
        Ok(())
    }

    fn resolve_inputs(
        &self,
        view: &CoinView,
        tx: &Transaction,
        height: u64,
    ) -> Result<ResolvedInputs, MempoolError> {
        if let Some(missing) = view.first_missing(tx) {
            return Err(MempoolError::MissingInputs(missing));
        }

        let mut scripts = Vec::new();
        let mut weighted: f64 = 0.0;
        for prevout in tx.prevouts() {
            let record = view
                .access(&prevout.hash)
                .ok_or(MempoolError::MissingInputs(*prevout))?;
            let age = height.saturating_sub(record.height);
            if record.is_reward() && age < self.params.coinbase_maturity {
                return Err(MempoolError::PrematureSpend(*prevout));
            }
            let output = record
                .output(prevout.index)
                .ok_or(MempoolError::MissingInputs(*prevout))?;
            weighted += output.amount as f64 * age as f64;
            scripts.push(output.script_pubkey.clone());
        }

        let value_in = view.value_in(tx)?;
        let size = tx.serialized_size().max(1);
        Ok(ResolvedInputs {
            scripts,
            value_in,
            priority: weighted / size as f64,
        })
    }

    /// Returns the pooled transactions the candidate replaces
    fn check_conflicts(
        &self,
        pool: &TxMempool,
        tx: &Transaction,
        fee: Amount,
        size: usize,
    ) -> Result<Vec<Hash>, MempoolError> {
        let conflicts = pool.conflicts_of(tx);
        if conflicts.is_empty() {
            return Ok(Vec::new());
        }

        for (outpoint, existing) in &conflicts {
            let signals = pool
                .get(existing)
                .is_some_and(MempoolEntry::signals_replacement);
            if !signals {
                return Err(MempoolError::Conflict {
                    outpoint: *outpoint,
                    existing: *existing,
                });
            }
        }

        let roots: Vec<Hash> = conflicts
            .iter()
            .map(|(_, existing)| *existing)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let mut evicted: HashSet<Hash> = HashSet::new();
        for root in &roots {
            evicted.insert(*root);
            evicted.extend(pool.calculate_descendants(root));
        }
        if evicted.len() > MAX_REPLACEMENT_EVICTIONS {
            return Err(MempoolError::ReplacementRejected(format!(
                "would evict {} transactions",
                evicted.len()
            )));
        }
        if pool.calculate_ancestors(tx).iter().any(|hash| evicted.contains(hash)) {
            return Err(MempoolError::ReplacementRejected(
                "spends an output of a transaction it replaces".to_string(),
            ));
        }

        let evicted_fees: Amount = evicted
            .iter()
            .filter_map(|hash| pool.get(hash))
            .map(|entry| entry.fee)
            .sum();
        let required = evicted_fees.saturating_add(self.settings.min_relay_fee(size));
        if fee <= required {
            return Err(MempoolError::ReplacementRejected(format!(
                "fee {fee} does not exceed {required}"
            )));
        }
        Ok(roots)
    }

    fn check_package_limits(
        &self,
        pool: &TxMempool,
        tx: &Transaction,
        size: usize,
        replaced: &[Hash],
    ) -> Result<(), MempoolError> {
        let ancestors = pool.calculate_ancestors(tx);
        let count = ancestors.len() + 1;
        let limit = self.settings.ancestor_limit;
        if count > limit {
            return Err(MempoolError::TooManyAncestors { count, limit });
        }

        let package_size: usize = size
            + ancestors
                .iter()
                .filter_map(|hash| pool.get(hash))
                .map(|entry| entry.size)
                .sum::<usize>();
        if package_size > self.settings.ancestor_size_limit_kb * 1000 {
            return Err(MempoolError::TooManyAncestors { count, limit });
        }

        for ancestor in ancestors.iter().filter(|hash| !replaced.contains(hash)) {
            if let Some(entry) = pool.get(ancestor) {
                if entry.descendant_count + 1 > self.settings.descendant_limit {
                    return Err(MempoolError::TooManyDescendants { ancestor: *ancestor });
                }
            }
        }
        Ok(())
    }
}

/// Verify every real input on blocking workers, all launched before any
/// is awaited
async fn verify_scripts(view: &CoinView, tx: &Transaction, tx_hash: Hash) -> Result<(), MempoolError> {
    let signing_hash = tx.signing_hash();
    let mut checks: Vec<ScriptCheck> = Vec::new();

    for (index, input) in tx.inputs.iter().enumerate() {
        let Some(prevout) = input.prevout() else {
            continue;
        };
        let locking_script = view
            .output(prevout)
            .map(|output| output.script_pubkey.clone())
            .ok_or(MempoolError::MissingInputs(*prevout))?;
        let input = input.clone();
        let handle = task::spawn_blocking(move || verify_input(&signing_hash, &input, &locking_script));
        checks.push((index, handle));
    }

    for (input, handle) in checks {
        let outcome = handle.await.unwrap_or(Err(ScriptError::Aborted));
        if let Err(reason) = outcome {
            return Err(ConsensusError::ScriptVerify {
                tx: tx_hash,
                input,
                reason,
            }
            .into());
        }
    }
    Ok(())
}
