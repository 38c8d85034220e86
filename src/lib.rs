//! Fee-split full node core library
//!
//! A UTXO ledger with a protocol-level fee split: a fraction of every
//! transaction fee must be paid to a rotating set of designated addresses,
//! enforced by the consensus rule pipeline rather than by policy.

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod mempool;
pub mod mining;
pub mod storage;
pub mod validation;
pub mod wallet;

/// Protocol constants - HARD-CODED, NEVER CONFIGURABLE
pub mod constants {
    use crate::validation::Amount;

    /// Smallest units per coin (8 decimal places)
    pub const COIN: Amount = 100_000_000;

    /// Upper bound of any single amount or sum of amounts
    pub const MAX_MONEY: Amount = 21_000_000 * COIN;

    /// Maximum serialized block size in bytes
    pub const MAX_BLOCK_SIZE: usize = 1_000_000;

    /// Maximum signature operations per block
    pub const MAX_BLOCK_SIGOPS: usize = 20_000;

    /// Maximum size of the coinbase extra data (including the encoded height)
    pub const MAX_COINBASE_SCRIPT_SIZE: usize = 100;

    /// Minimum size of the coinbase extra data (including the encoded height)
    pub const MIN_COINBASE_SCRIPT_SIZE: usize = 2;

    /// Sequence number of a final input
    pub const SEQUENCE_FINAL: u32 = 0xFFFF_FFFF;

    /// Inputs below this sequence signal opt-in replacement
    pub const SEQUENCE_RBF_THRESHOLD: u32 = SEQUENCE_FINAL - 1;

    /// Lock times below this are block heights, above are unix timestamps
    pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

    /// Tolerance when fee arithmetic crosses from floating point back to units
    pub const ROUNDING_TOLERANCE: Amount = 1;

    /// Number of randomized trials in coin selection
    pub const MAX_SELECTION_TRIALS: usize = 1000;

    /// Number of blocks used for median time past
    pub const MEDIAN_TIME_SPAN: usize = 11;
}
