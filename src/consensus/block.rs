//! Block structure
//!
//! Proof-of-work blocks carry a coinbase that pays the reward. Proof-of-stake
//! blocks carry a zero-value coinbase followed by a coinstake that pays it,
//! and are signed by the staker's key.

use serde::{Deserialize, Serialize};

use crate::crypto::{compute_merkle_root, hash_bytes, Hash, PublicKey, SchnorrSignature};
use crate::validation::Transaction;

/// Block header containing all metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// Protocol version
    pub version: u32,
    /// Hash of the previous block
    pub prev_hash: Hash,
    /// Merkle root of all transactions
    pub merkle_root: Hash,
    /// Block timestamp (seconds since Unix epoch)
    pub timestamp: u64,
    /// Difficulty target (compact representation)
    pub bits: u32,
    /// Nonce used for PoW
    pub nonce: u64,
}

impl BlockHeader {
    pub fn new(
        version: u32,
        prev_hash: Hash,
        merkle_root: Hash,
        timestamp: u64,
        bits: u32,
        nonce: u64,
    ) -> Self {
        Self {
            version,
            prev_hash,
            merkle_root,
            timestamp,
            bits,
            nonce,
        }
    }

    /// Serialize the header for hashing
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(88);
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.prev_hash.0);
        bytes.extend_from_slice(&self.merkle_root.0);
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.bits.to_le_bytes());
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    pub fn hash(&self) -> Hash {
        hash_bytes(&self.to_bytes())
    }
}

/// Staker signature over the header hash of a proof-of-stake block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockSignature {
    pub public_key: PublicKey,
    pub signature: SchnorrSignature,
}

/// A complete block containing header and transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    /// Present on proof-of-stake blocks only
    pub signature: Option<BlockSignature>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
            signature: None,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn is_genesis(&self) -> bool {
        self.header.prev_hash == Hash::zero()
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    pub fn coinstake(&self) -> Option<&Transaction> {
        self.transactions.get(1).filter(|tx| tx.is_coinstake())
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.coinstake().is_some()
    }

    /// The transaction that pays the block reward and the fee split
    pub fn reward_transaction(&self) -> Option<&Transaction> {
        if self.is_proof_of_stake() {
            self.coinstake()
        } else {
            self.coinbase()
        }
    }

    /// Merkle root over transaction ids and whether the tree is mutated
    pub fn compute_merkle_root(&self) -> (Hash, bool) {
        let ids: Vec<Hash> = self.transactions.iter().map(Transaction::hash).collect();
        compute_merkle_root(&ids)
    }

    /// Recompute and store the merkle root after editing transactions
    pub fn update_merkle_root(&mut self) {
        self.header.merkle_root = self.compute_merkle_root().0;
    }

    pub fn serialized_size(&self) -> usize {
        bincode::serialized_size(self)
            .map(|size| size as usize)
            .unwrap_or(usize::MAX)
    }
}
