//! Consensus errors
//!
//! Every variant is fatal to the block (or transaction) being validated.
//! `code()` returns the stable reject code peers exchange.

use thiserror::Error;

use crate::crypto::Hash;
use crate::storage::StoreError;
use crate::validation::{Amount, OutPoint, ScriptError};

#[derive(Debug, Error)]
pub enum ConsensusError {
    // header
    #[error("previous block {0} is not the current tip")]
    BadPrevBlock(Hash),
    #[error("block version {0} is below the minimum")]
    BadVersion(u32),
    #[error("proof of work failed")]
    HighHash,
    #[error("block {hash} does not match checkpoint at height {height}")]
    CheckpointMismatch { height: u64, hash: Hash },
    #[error("block timestamp {time} is not after median time past {median_time_past}")]
    TimeTooOld { time: u64, median_time_past: u64 },
    #[error("block timestamp {time} is too far in the future (now {now})")]
    TimeTooNew { time: u64, now: u64 },
    #[error("incorrect difficulty bits: expected {expected:#010x}, got {actual:#010x}")]
    BadDifficultyBits { expected: u32, actual: u32 },

    // contextual block
    #[error("transaction {0} is not final")]
    NonFinalTransaction(Hash),
    #[error("coinbase height {actual} does not match block height {expected}")]
    BadCoinbaseHeight { expected: u64, actual: u64 },
    #[error("block size limits failed")]
    BadBlockLength,

    // full validation
    #[error("merkle root mismatch")]
    BadMerkleRoot,
    #[error("duplicate transaction")]
    DuplicateTransaction,
    #[error("first transaction is not a coinbase")]
    MissingCoinbase,
    #[error("more than one coinbase")]
    MultipleCoinbase,
    #[error("second transaction is not a coinstake")]
    MissingCoinstake,
    #[error("more than one coinstake")]
    MultipleCoinstake,
    #[error("coinstake in a proof-of-work block")]
    CoinstakeInPowBlock,
    #[error("coinbase of a proof-of-stake block must not pay value")]
    BadCoinbasePosAmount,
    #[error("bad block signature")]
    BadBlockSignature,
    #[error("block sig-op count {count} exceeds {limit}")]
    BadBlockSigOps { count: usize, limit: usize },
    #[error("transaction {0} overwrites an existing unspent transaction")]
    Bip30(Hash),
    #[error("inputs missing or spent: {0:?}")]
    MissingOrSpentInput(OutPoint),
    #[error("premature spend of coinbase or coinstake output {outpoint:?} at depth {depth}")]
    PrematureCoinbaseSpend { outpoint: OutPoint, depth: u64 },
    #[error("input values out of range")]
    InputValuesOutOfRange,
    #[error("value in {value_in} below value out {value_out}")]
    InBelowOut { value_in: Amount, value_out: Amount },
    #[error("fee {fee} out of range (required {required})")]
    FeeOutOfRange { fee: Amount, required: Amount },
    #[error("coinbase pays {actual}, limit {limit}")]
    BadCoinbaseAmount { actual: Amount, limit: Amount },
    #[error("coinstake pays {actual}, limit {limit}")]
    BadCoinstakeAmount { actual: Amount, limit: Amount },
    #[error("script verification failed for input {input} of {tx}: {reason}")]
    ScriptVerify {
        tx: Hash,
        input: usize,
        reason: ScriptError,
    },
    #[error("expected exactly one fee output, found {found}")]
    BadFeeOutput { found: usize },
    #[error("funds not preserved: in {total_in} + subsidy {subsidy} != out {total_out}")]
    FundsNotPreserved {
        total_in: Amount,
        subsidy: Amount,
        total_out: Amount,
    },

    // transaction structure
    #[error("transaction has no inputs")]
    NoInputs,
    #[error("transaction has no outputs")]
    NoOutputs,
    #[error("transaction is oversize")]
    Oversize,
    #[error("negative output value")]
    NegativeOutput,
    #[error("output value too large")]
    OutputTooLarge,
    #[error("total output value too large")]
    OutputTotalTooLarge,
    #[error("duplicate inputs")]
    DuplicateInputs,
    #[error("coinbase script length out of range")]
    BadCoinbaseLength,
    #[error("null prevout in a non-coinbase transaction")]
    NullPrevout,
    #[error("invalid change marker")]
    BadChangeMarker,

    #[error("coin store failure: {0}")]
    Store(#[from] StoreError),
}

impl ConsensusError {
    /// Reject code
    pub fn code(&self) -> &'static str {
        use ConsensusError::*;
        match self {
            BadPrevBlock(_) => "bad-prevblk",
            BadVersion(_) => "bad-version",
            HighHash => "high-hash",
            CheckpointMismatch { .. } => "checkpoint-mismatch",
            TimeTooOld { .. } => "time-too-old",
            TimeTooNew { .. } => "time-too-new",
            BadDifficultyBits { .. } => "bad-diffbits",
            NonFinalTransaction(_) => "bad-txns-nonfinal",
            BadCoinbaseHeight { .. } => "bad-cb-height",
            BadBlockLength => "bad-blk-length",
            BadMerkleRoot => "bad-txnmrklroot",
            DuplicateTransaction => "bad-txns-duplicate",
            MissingCoinbase => "bad-cb-missing",
            MultipleCoinbase => "bad-cb-multiple",
            MissingCoinstake => "bad-cs-missing",
            MultipleCoinstake => "bad-cs-multiple",
            CoinstakeInPowBlock => "bad-pow-coinstake",
            BadCoinbasePosAmount => "bad-cb-pos-amount",
            BadBlockSignature => "bad-blk-signature",
            BadBlockSigOps { .. } => "bad-blk-sigops",
            Bip30(_) => "bad-txns-BIP30",
            MissingOrSpentInput(_) => "bad-txns-inputs-missingorspent",
            PrematureCoinbaseSpend { .. } => "bad-txns-premature-spend-of-coinbase",
            InputValuesOutOfRange => "bad-txns-inputvalues-outofrange",
            InBelowOut { .. } => "bad-txns-in-belowout",
            FeeOutOfRange { .. } => "bad-txns-fee-outofrange",
            BadCoinbaseAmount { .. } => "bad-cb-amount",
            BadCoinstakeAmount { .. } => "bad-cs-amount",
            ScriptVerify { .. } => "mandatory-script-verify-flag-failed",
            BadFeeOutput { .. } => "bad-blk-feeoutput",
            FundsNotPreserved { .. } => "bad-blk-funds-not-preserved",
            NoInputs => "bad-txns-vin-empty",
            NoOutputs => "bad-txns-vout-empty",
            Oversize => "bad-txns-oversize",
            NegativeOutput => "bad-txns-vout-negative",
            OutputTooLarge => "bad-txns-vout-toolarge",
            OutputTotalTooLarge => "bad-txns-txouttotal-toolarge",
            DuplicateInputs => "bad-txns-inputs-duplicate",
            BadCoinbaseLength => "bad-cb-length",
            NullPrevout => "bad-txns-prevout-null",
            BadChangeMarker => "bad-txns-changemarker",
            Store(_) => "store-error",
        }
    }
}
