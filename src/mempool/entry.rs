use crate::crypto::Hash;
use crate::validation::{Amount, Transaction};

/// A pooled transaction with its fee and package accounting.
///
/// Ancestor and descendant totals include the entry itself.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub tx_hash: Hash,
    pub fee: Amount,
    /// Unix time the transaction entered the pool
    pub time: u64,
    /// Chain height when it entered the pool
    pub entry_height: u64,
    pub size: usize,
    /// Coin-age priority: sum(value * confirmations) / size
    pub priority: f64,
    pub ancestor_count: usize,
    pub ancestor_size: usize,
    pub ancestor_fees: Amount,
    pub descendant_count: usize,
    pub descendant_size: usize,
    pub descendant_fees: Amount,
}

impl MempoolEntry {
    pub fn new(tx: Transaction, fee: Amount, time: u64, entry_height: u64, priority: f64) -> Self {
        let tx_hash = tx.hash();
        let size = tx.serialized_size();
        Self {
            tx,
            tx_hash,
            fee,
            time,
            entry_height,
            size,
            priority,
            ancestor_count: 1,
            ancestor_size: size,
            ancestor_fees: fee,
            descendant_count: 1,
            descendant_size: size,
            descendant_fees: fee,
        }
    }

    /// Fee per 1000 bytes
    pub fn fee_rate(&self) -> Amount {
        per_kb(self.fee, self.size)
    }

    /// Fee rate of the entry together with everything that spends it
    pub fn descendant_fee_rate(&self) -> Amount {
        per_kb(self.descendant_fees, self.descendant_size)
    }

    pub fn signals_replacement(&self) -> bool {
        self.tx.signals_replacement()
    }
}

fn per_kb(fee: Amount, size: usize) -> Amount {
    if size == 0 {
        return Amount::MAX;
    }
    ((fee as i128 * 1000) / size as i128) as Amount
}
