//! Database persistence layer using Sled
//!
//! Unspent output records live in the `coins` tree keyed by transaction
//! hash, bincode encoded. The tip marker and the chain tip summary live in
//! `meta`.

use async_trait::async_trait;
use sled::{Batch, Db, Tree};
use std::path::Path;

use crate::crypto::Hash;
use crate::storage::{CoinStore, FetchCoinsResponse, StoreError, TipState, UnspentOutputs};

const TIP_KEY: &str = "tip_hash";
const TIP_STATE_KEY: &str = "tip_state";

/// Sled-backed coin store
#[derive(Debug, Clone)]
pub struct SledCoinStore {
    db: Db,
    coins: Tree,
    meta: Tree,
}

impl SledCoinStore {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let coins = db.open_tree("coins")?;
        let meta = db.open_tree("meta")?;
        Ok(Self { db, coins, meta })
    }

    /// Temporary database removed on drop
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        let coins = db.open_tree("coins")?;
        let meta = db.open_tree("meta")?;
        Ok(Self { db, coins, meta })
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    fn read_tip(&self) -> Result<Hash, StoreError> {
        match self.meta.get(TIP_KEY)? {
            Some(bytes) => {
                let array: [u8; 32] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt(format!("tip marker has {} bytes", bytes.len())))?;
                Ok(Hash(array))
            }
            None => Ok(Hash::zero()),
        }
    }
}

#[async_trait]
impl CoinStore for SledCoinStore {
    async fn fetch_coins(&self, ids: &[Hash]) -> Result<FetchCoinsResponse, StoreError> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let record = match self.coins.get(id.0)? {
                Some(bytes) => Some(bincode::deserialize::<UnspentOutputs>(&bytes)?),
                None => None,
            };
            records.push(record);
        }
        Ok(FetchCoinsResponse {
            records,
            block_hash: self.read_tip()?,
        })
    }

    async fn put(&self, records: Vec<UnspentOutputs>, new_tip: Hash) -> Result<(), StoreError> {
        let mut batch = Batch::default();
        for record in &records {
            if record.is_fully_spent() {
                batch.remove(&record.tx_hash.0[..]);
            } else {
                batch.insert(&record.tx_hash.0[..], bincode::serialize(record)?);
            }
        }
        self.coins.apply_batch(batch)?;
        self.meta.insert(TIP_KEY, &new_tip.0[..])?;
        self.db.flush()?;
        Ok(())
    }

    async fn delete(&self, ids: &[Hash]) -> Result<(), StoreError> {
        let mut batch = Batch::default();
        for id in ids {
            batch.remove(&id.0[..]);
        }
        self.coins.apply_batch(batch)?;
        Ok(())
    }

    async fn tip_hash(&self) -> Result<Hash, StoreError> {
        self.read_tip()
    }

    async fn set_tip_hash(&self, tip: Hash) -> Result<(), StoreError> {
        self.meta.insert(TIP_KEY, &tip.0[..])?;
        self.db.flush()?;
        Ok(())
    }

    async fn tip_state(&self) -> Result<Option<TipState>, StoreError> {
        match self.meta.get(TIP_STATE_KEY)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set_tip_state(&self, state: &TipState) -> Result<(), StoreError> {
        self.meta.insert(TIP_STATE_KEY, bincode::serialize(state)?)?;
        self.db.flush()?;
        Ok(())
    }
}
