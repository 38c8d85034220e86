//! Mempool snapshot across restarts

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::validation::{Amount, Transaction};

/// A pooled transaction as written to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedTx {
    pub tx: Transaction,
    /// Declared fee when the transaction was accepted
    pub fee: Amount,
    /// Unix time the transaction entered the pool
    pub time: u64,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

#[async_trait]
pub trait MempoolPersistence: Send + Sync {
    async fn save(&self, txs: &[PersistedTx]) -> Result<(), PersistenceError>;
    async fn load(&self) -> Result<Vec<PersistedTx>, PersistenceError>;
}

/// Single bincode file, replaced atomically on save
#[derive(Debug, Clone)]
pub struct FileMempoolPersistence {
    path: PathBuf,
}

impl FileMempoolPersistence {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MempoolPersistence for FileMempoolPersistence {
    async fn save(&self, txs: &[PersistedTx]) -> Result<(), PersistenceError> {
        let bytes = bincode::serialize(txs)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!(transactions = txs.len(), bytes = bytes.len(), path = %self.path.display(), "saved mempool");
        Ok(())
    }

    async fn load(&self) -> Result<Vec<PersistedTx>, PersistenceError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };
        Ok(bincode::deserialize(&bytes)?)
    }
}
