//! Backing coin store
//!
//! The durable UTXO set is reached only through point lookups by
//! transaction hash plus a single tip marker. `CachedCoinStore` wraps any
//! store with a read-through cache that can be warmed ahead of time.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::crypto::Hash;
use crate::storage::{TipState, UnspentOutputs};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("store tip {actual} does not match chain tip {expected}")]
    TipMismatch { expected: Hash, actual: Hash },
    #[error("corrupt entry: {0}")]
    Corrupt(String),
}

/// Result of a batched lookup
#[derive(Debug, Clone, Default)]
pub struct FetchCoinsResponse {
    /// One slot per requested id, in request order
    pub records: Vec<Option<UnspentOutputs>>,
    /// Tip the records are consistent with
    pub block_hash: Hash,
}

#[async_trait]
pub trait CoinStore: Send + Sync {
    async fn fetch_coins(&self, ids: &[Hash]) -> Result<FetchCoinsResponse, StoreError>;

    /// Upsert records and move the tip marker
    async fn put(&self, records: Vec<UnspentOutputs>, new_tip: Hash) -> Result<(), StoreError>;

    async fn delete(&self, ids: &[Hash]) -> Result<(), StoreError>;

    async fn tip_hash(&self) -> Result<Hash, StoreError>;

    async fn set_tip_hash(&self, tip: Hash) -> Result<(), StoreError>;

    /// Chain tip summary saved after the last connected block
    async fn tip_state(&self) -> Result<Option<TipState>, StoreError>;

    async fn set_tip_state(&self, state: &TipState) -> Result<(), StoreError>;

    /// Warm caches for ids needed soon. Fire and forget.
    fn prefetch(&self, _ids: Vec<Hash>) {}
}

/// In-memory store used by tests and throwaway nodes
#[derive(Debug, Default)]
pub struct MemoryCoinStore {
    records: RwLock<HashMap<Hash, UnspentOutputs>>,
    tip: RwLock<Hash>,
    tip_state: RwLock<Option<TipState>>,
}

impl MemoryCoinStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CoinStore for MemoryCoinStore {
    async fn fetch_coins(&self, ids: &[Hash]) -> Result<FetchCoinsResponse, StoreError> {
        let records = self.records.read().await;
        Ok(FetchCoinsResponse {
            records: ids.iter().map(|id| records.get(id).cloned()).collect(),
            block_hash: *self.tip.read().await,
        })
    }

    async fn put(&self, new_records: Vec<UnspentOutputs>, new_tip: Hash) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        for record in new_records {
            if record.is_fully_spent() {
                records.remove(&record.tx_hash);
            } else {
                records.insert(record.tx_hash, record);
            }
        }
        *self.tip.write().await = new_tip;
        Ok(())
    }

    async fn delete(&self, ids: &[Hash]) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        for id in ids {
            records.remove(id);
        }
        Ok(())
    }

    async fn tip_hash(&self) -> Result<Hash, StoreError> {
        Ok(*self.tip.read().await)
    }

    async fn set_tip_hash(&self, tip: Hash) -> Result<(), StoreError> {
        *self.tip.write().await = tip;
        Ok(())
    }

    async fn tip_state(&self) -> Result<Option<TipState>, StoreError> {
        Ok(self.tip_state.read().await.clone())
    }

    async fn set_tip_state(&self, state: &TipState) -> Result<(), StoreError> {
        *self.tip_state.write().await = Some(state.clone());
        Ok(())
    }
}

/// Read-through cache in front of another store.
///
/// Writes hold the cache guard until the inner store has applied them and
/// bump `generation` on both sides of the inner write. A lookup or prefetch
/// that read the inner store before a write drops its results instead of
/// caching records the write made stale.
pub struct CachedCoinStore {
    inner: Arc<dyn CoinStore>,
    cache: Arc<RwLock<HashMap<Hash, UnspentOutputs>>>,
    generation: Arc<AtomicU64>,
    capacity: usize,
}

impl CachedCoinStore {
    pub fn new(inner: Arc<dyn CoinStore>, capacity: usize) -> Self {
        Self {
            inner,
            cache: Arc::new(RwLock::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
            capacity,
        }
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_cached(&self, id: &Hash) -> bool {
        self.cache.read().await.contains_key(id)
    }

    fn insert_bounded(
        cache: &mut HashMap<Hash, UnspentOutputs>,
        records: impl IntoIterator<Item = UnspentOutputs>,
        capacity: usize,
    ) {
        for record in records {
            if cache.len() >= capacity && !cache.contains_key(&record.tx_hash) {
                let Some(victim) = cache.keys().next().copied() else {
                    break;
                };
                cache.remove(&victim);
            }
            cache.entry(record.tx_hash).or_insert(record);
        }
    }
}

#[async_trait]
impl CoinStore for CachedCoinStore {
    async fn fetch_coins(&self, ids: &[Hash]) -> Result<FetchCoinsResponse, StoreError> {
        let mut records: Vec<Option<UnspentOutputs>> = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        {
            let cache = self.cache.read().await;
            for (slot, id) in ids.iter().enumerate() {
                match cache.get(id) {
                    Some(record) => records.push(Some(record.clone())),
                    None => {
                        records.push(None);
                        missing.push((slot, *id));
                    }
                }
            }
        }

        if missing.is_empty() {
            return Ok(FetchCoinsResponse {
                records,
                block_hash: self.inner.tip_hash().await?,
            });
        }

        let started = self.generation.load(Ordering::Acquire);
        let missing_ids: Vec<Hash> = missing.iter().map(|(_, id)| *id).collect();
        let fetched = self.inner.fetch_coins(&missing_ids).await?;

        let mut found = Vec::new();
        for ((slot, _), record) in missing.into_iter().zip(fetched.records) {
            if let Some(record) = record {
                found.push(record.clone());
                records[slot] = Some(record);
            }
        }

        let mut cache = self.cache.write().await;
        if self.generation.load(Ordering::Acquire) == started {
            Self::insert_bounded(&mut cache, found, self.capacity);
        }

        Ok(FetchCoinsResponse {
            records,
            block_hash: fetched.block_hash,
        })
    }

    async fn put(&self, records: Vec<UnspentOutputs>, new_tip: Hash) -> Result<(), StoreError> {
        // Readers wait on the guard until the inner store holds the new records
        let mut cache = self.cache.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        let result = self.inner.put(records.clone(), new_tip).await;
        for record in records {
            if result.is_err() || record.is_fully_spent() {
                cache.remove(&record.tx_hash);
            } else {
                cache.insert(record.tx_hash, record);
            }
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        result
    }

    async fn delete(&self, ids: &[Hash]) -> Result<(), StoreError> {
        let mut cache = self.cache.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        let result = self.inner.delete(ids).await;
        for id in ids {
            cache.remove(id);
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        result
    }

    async fn tip_hash(&self) -> Result<Hash, StoreError> {
        self.inner.tip_hash().await
    }

    async fn set_tip_hash(&self, tip: Hash) -> Result<(), StoreError> {
        self.inner.set_tip_hash(tip).await
    }

    async fn tip_state(&self) -> Result<Option<TipState>, StoreError> {
        self.inner.tip_state().await
    }

    async fn set_tip_state(&self, state: &TipState) -> Result<(), StoreError> {
        self.inner.set_tip_state(state).await
    }

    fn prefetch(&self, ids: Vec<Hash>) {
        if ids.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let inner = Arc::clone(&self.inner);
        let cache = Arc::clone(&self.cache);
        let generation = Arc::clone(&self.generation);
        let capacity = self.capacity;
        let started = generation.load(Ordering::Acquire);

        runtime.spawn(async move {
            let wanted: Vec<Hash> = {
                let cache = cache.read().await;
                ids.into_iter().filter(|id| !cache.contains_key(id)).collect()
            };
            if wanted.is_empty() {
                return;
            }

            match inner.fetch_coins(&wanted).await {
                Ok(response) => {
                    let mut cache = cache.write().await;
                    if generation.load(Ordering::Acquire) != started {
                        debug!(ids = wanted.len(), "discarding stale coin prefetch");
                        return;
                    }
                    let found: Vec<UnspentOutputs> = response.records.into_iter().flatten().collect();
                    debug!(requested = wanted.len(), found = found.len(), "coin prefetch complete");
                    Self::insert_bounded(&mut cache, found, capacity);
                }
                Err(e) => warn!(error = %e, "coin prefetch failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_bytes;
    use crate::validation::{Script, Transaction, TxOutput};
    use std::time::Duration;

    /// Memory store whose writes take a while to land
    struct SlowWriteStore {
        inner: MemoryCoinStore,
        delay: Duration,
    }

    #[async_trait]
    impl CoinStore for SlowWriteStore {
        async fn fetch_coins(&self, ids: &[Hash]) -> Result<FetchCoinsResponse, StoreError> {
            self.inner.fetch_coins(ids).await
        }

        async fn put(&self, records: Vec<UnspentOutputs>, new_tip: Hash) -> Result<(), StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.put(records, new_tip).await
        }

        async fn delete(&self, ids: &[Hash]) -> Result<(), StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.delete(ids).await
        }

        async fn tip_hash(&self) -> Result<Hash, StoreError> {
            self.inner.tip_hash().await
        }

        async fn set_tip_hash(&self, tip: Hash) -> Result<(), StoreError> {
            self.inner.set_tip_hash(tip).await
        }

        async fn tip_state(&self) -> Result<Option<TipState>, StoreError> {
            self.inner.tip_state().await
        }

        async fn set_tip_state(&self, state: &TipState) -> Result<(), StoreError> {
            self.inner.set_tip_state(state).await
        }
    }

    async fn slow_cached_store(records: Vec<UnspentOutputs>) -> Arc<CachedCoinStore> {
        let inner = MemoryCoinStore::new();
        inner.put(records, Hash::zero()).await.unwrap();
        let slow = SlowWriteStore {
            inner,
            delay: Duration::from_millis(50),
        };
        Arc::new(CachedCoinStore::new(Arc::new(slow), 16))
    }

    fn record(seed: &[u8]) -> UnspentOutputs {
        let tx = Transaction::coinbase(
            1,
            vec![TxOutput::new(10, Script::pay_to_pubkey_hash(&hash_bytes(seed)))],
        );
        UnspentOutputs::from_transaction(&tx, 1)
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryCoinStore::new();
        let a = record(b"a");
        let tip = hash_bytes(b"tip");
        store.put(vec![a.clone()], tip).await.unwrap();

        let response = store.fetch_coins(&[a.tx_hash, hash_bytes(b"missing")]).await.unwrap();
        assert_eq!(response.records, vec![Some(a.clone()), None]);
        assert_eq!(response.block_hash, tip);

        store.delete(&[a.tx_hash]).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_cached_store_reads_through() {
        let inner = Arc::new(MemoryCoinStore::new());
        let a = record(b"a");
        inner.put(vec![a.clone()], Hash::zero()).await.unwrap();

        let cached = CachedCoinStore::new(inner, 16);
        assert!(!cached.is_cached(&a.tx_hash).await);
        let response = cached.fetch_coins(&[a.tx_hash]).await.unwrap();
        assert_eq!(response.records, vec![Some(a.clone())]);
        assert!(cached.is_cached(&a.tx_hash).await);
    }

    #[tokio::test]
    async fn test_prefetch_warms_cache() {
        let inner = Arc::new(MemoryCoinStore::new());
        let a = record(b"a");
        inner.put(vec![a.clone()], Hash::zero()).await.unwrap();

        let cached = CachedCoinStore::new(inner, 16);
        cached.prefetch(vec![a.tx_hash, hash_bytes(b"missing")]);

        for _ in 0..50 {
            if cached.is_cached(&a.tx_hash).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(cached.is_cached(&a.tx_hash).await);
        assert_eq!(cached.cached_len().await, 1);
    }

    #[tokio::test]
    async fn test_cache_is_bounded() {
        let inner = Arc::new(MemoryCoinStore::new());
        let records: Vec<UnspentOutputs> = (0u8..5).map(|i| record(&[i])).collect();
        inner.put(records.clone(), Hash::zero()).await.unwrap();

        let cached = CachedCoinStore::new(inner, 2);
        let ids: Vec<Hash> = records.iter().map(|r| r.tx_hash).collect();
        let response = cached.fetch_coins(&ids).await.unwrap();
        assert!(response.records.iter().all(Option::is_some));
        assert!(cached.cached_len().await <= 2);
    }

    #[tokio::test]
    async fn test_lookup_during_slow_delete_does_not_revive_record() {
        let a = record(b"a");
        let cached = slow_cached_store(vec![a.clone()]).await;

        let deleting = {
            let cached = Arc::clone(&cached);
            let id = a.tx_hash;
            tokio::spawn(async move { cached.delete(&[id]).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let during = cached.fetch_coins(&[a.tx_hash]).await.unwrap();
        deleting.await.unwrap().unwrap();

        assert!(during.records[0].is_none());
        assert!(!cached.is_cached(&a.tx_hash).await);
        let after = cached.fetch_coins(&[a.tx_hash]).await.unwrap();
        assert!(after.records[0].is_none());
    }

    #[tokio::test]
    async fn test_lookup_during_slow_put_sees_spend() {
        let a = record(b"a");
        let cached = slow_cached_store(vec![a.clone()]).await;
        assert!(cached.fetch_coins(&[a.tx_hash]).await.unwrap().records[0].is_some());

        let mut spent = a.clone();
        spent.spend(0);
        assert!(spent.is_fully_spent());
        let tip = hash_bytes(b"next");

        let writing = {
            let cached = Arc::clone(&cached);
            tokio::spawn(async move { cached.put(vec![spent], tip).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let during = cached.fetch_coins(&[a.tx_hash]).await.unwrap();
        writing.await.unwrap().unwrap();

        assert!(during.records[0].is_none());
        assert_eq!(during.block_hash, tip);
        assert!(!cached.is_cached(&a.tx_hash).await);
    }
}
