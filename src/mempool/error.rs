//! Mempool errors
//!
//! All of these reject one transaction and leave the node running.

use thiserror::Error;

use crate::consensus::ConsensusError;
use crate::crypto::Hash;
use crate::storage::StoreError;
use crate::validation::{Amount, OutPoint};

#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("transaction {0} already in the pool")]
    AlreadyKnown(Hash),
    #[error("missing input {0:?}")]
    MissingInputs(OutPoint),
    #[error("input {outpoint:?} already spent by pooled transaction {existing}")]
    Conflict { outpoint: OutPoint, existing: Hash },
    #[error("replacement rejected: {0}")]
    ReplacementRejected(String),
    #[error("fee {fee} below expected {expected}")]
    InsufficientFee { fee: Amount, expected: Amount },
    #[error("fee {fee} below minimum relay fee {minimum}")]
    MinRelayFee { fee: Amount, minimum: Amount },
    #[error("too many unconfirmed ancestors ({count}, limit {limit})")]
    TooManyAncestors { count: usize, limit: usize },
    #[error("too many unconfirmed descendants for ancestor {ancestor}")]
    TooManyDescendants { ancestor: Hash },
    #[error("mempool full")]
    PoolFull,
    #[error("transaction is not final")]
    NonFinal,
    #[error("premature spend of immature output {0:?}")]
    PrematureSpend(OutPoint),
    #[error("coinbase and coinstake transactions are only valid in blocks")]
    RewardTransaction,
    #[error("invalid transaction: {0}")]
    Invalid(#[from] ConsensusError),
    #[error("coin store failure: {0}")]
    Store(#[from] StoreError),
}

impl MempoolError {
    /// Missing inputs usually mean the parent has not arrived yet
    pub fn is_orphan(&self) -> bool {
        matches!(self, MempoolError::MissingInputs(_))
    }
}
