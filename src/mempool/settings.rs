use serde::{Deserialize, Serialize};

use crate::validation::Amount;

/// Mempool policy limits. Policy only: none of these are consensus rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolSettings {
    pub max_size_bytes: usize,
    pub expiry_hours: u64,
    /// Minimum fee per 1000 bytes
    pub min_relay_fee_per_kb: Amount,
    /// Maximum in-pool ancestors, counting the transaction itself
    pub ancestor_limit: usize,
    pub ancestor_size_limit_kb: usize,
    pub descendant_limit: usize,
    /// Save the pool on shutdown and reload it on start
    pub persist: bool,
}

impl Default for MempoolSettings {
    fn default() -> Self {
        Self {
            max_size_bytes: 300 * 1_000_000,
            expiry_hours: 336,
            min_relay_fee_per_kb: 1000,
            ancestor_limit: 25,
            ancestor_size_limit_kb: 101,
            descendant_limit: 25,
            persist: true,
        }
    }
}

impl MempoolSettings {
    /// Minimum relay fee for a transaction of `size` bytes
    pub fn min_relay_fee(&self, size: usize) -> Amount {
        self.min_relay_fee_per_kb.saturating_mul(size as Amount) / 1000
    }

    pub fn expiry_secs(&self) -> u64 {
        self.expiry_hours * 60 * 60
    }
}
