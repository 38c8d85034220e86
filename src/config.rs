//! Node configuration
//!
//! Loaded from an optional JSON file; every field has a default so a
//! partial file (or none at all) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::consensus::Network;
use crate::mempool::MempoolSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("coin cache capacity must be positive")]
    ZeroCacheCapacity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub network: Network,
    /// Directory holding the coin database, the mempool snapshot and the
    /// mining wallet
    pub data_dir: PathBuf,
    /// `tracing` filter directive; `RUST_LOG` takes precedence
    pub log_filter: String,
    /// Records kept in the read-through coin cache
    pub coin_cache_capacity: usize,
    pub mempool: MempoolSettings,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            network: Network::default(),
            data_dir: PathBuf::from("./data"),
            log_filter: "info".to_string(),
            coin_cache_capacity: 100_000,
            mempool: MempoolSettings::default(),
        }
    }
}

impl NodeSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Settings from `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coin_cache_capacity == 0 {
            return Err(ConfigError::ZeroCacheCapacity);
        }
        Ok(())
    }

    pub fn coins_path(&self) -> PathBuf {
        self.data_dir.join("coins")
    }

    pub fn mempool_path(&self) -> PathBuf {
        self.data_dir.join("mempool.dat")
    }

    /// Keys the mining reward is paid to
    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join("wallet.dat")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = NodeSettings::from_json(r#"{"network":"regtest","mempool":{"expiry_hours":1}}"#).unwrap();
        assert_eq!(settings.network, Network::Regtest);
        assert_eq!(settings.mempool.expiry_hours, 1);
        assert_eq!(settings.mempool.ancestor_limit, MempoolSettings::default().ancestor_limit);
        assert_eq!(settings.log_filter, "info");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(&path, r#"{"data_dir":"/tmp/splitfee","coin_cache_capacity":10}"#).unwrap();

        let settings = NodeSettings::load_or_default(Some(&path)).unwrap();
        assert_eq!(settings.coins_path(), PathBuf::from("/tmp/splitfee/coins"));
        assert_eq!(settings.wallet_path(), PathBuf::from("/tmp/splitfee/wallet.dat"));
        assert_eq!(settings.coin_cache_capacity, 10);
    }

    #[test]
    fn test_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(matches!(
            NodeSettings::load_or_default(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{").unwrap();
        assert!(matches!(NodeSettings::load(&broken), Err(ConfigError::Parse { .. })));

        let zero = NodeSettings {
            coin_cache_capacity: 0,
            ..NodeSettings::default()
        };
        assert!(matches!(zero.validate(), Err(ConfigError::ZeroCacheCapacity)));
    }
}
