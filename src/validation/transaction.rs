//! Transaction structure
//!
//! UTXO-based transactions with Schnorr signatures. Inputs are a tagged
//! union: a coinbase input, a real spend of a prior output, or the
//! synthetic change marker that designates the transaction's own change
//! output. On the wire the coinbase and change marker both use the all-zero
//! prior hash; in memory they are distinct variants so no code path has to
//! re-derive "is this the sentinel" from values.

use serde::{Deserialize, Serialize};

use crate::constants::{LOCKTIME_THRESHOLD, SEQUENCE_FINAL, SEQUENCE_RBF_THRESHOLD};
use crate::crypto::{hash_bytes, Hash, PublicKey, SchnorrSignature};
use crate::validation::{checked_sum, Amount, Script};

/// Reference to a transaction output: (transaction hash, output index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: Hash, index: u32) -> Self {
        Self { hash, index }
    }

    /// The coinbase prevout: zero hash, maximum index
    pub fn null() -> Self {
        Self {
            hash: Hash::zero(),
            index: u32::MAX,
        }
    }
}

/// A transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxInput {
    /// The single input of a reward-paying coinbase
    Coinbase {
        /// Height of the block the coinbase belongs to
        height: u64,
        /// Arbitrary miner data
        extra: Vec<u8>,
    },
    /// Spend of a prior unspent output
    Spend {
        prevout: OutPoint,
        /// Signature over the transaction's signing hash
        signature: SchnorrSignature,
        /// Key whose hash the spent output pays to
        public_key: PublicKey,
        sequence: u32,
    },
    /// Designates `output_index` as this transaction's change output.
    /// Carries no value and never debits a prior output.
    ChangeMarker { output_index: u32 },
}

impl TxInput {
    /// Unsigned spend of `prevout` by `public_key`
    pub fn spend(prevout: OutPoint, public_key: PublicKey) -> Self {
        TxInput::Spend {
            prevout,
            signature: SchnorrSignature::empty(),
            public_key,
            sequence: SEQUENCE_FINAL,
        }
    }

    pub fn is_real(&self) -> bool {
        matches!(self, TxInput::Spend { .. })
    }

    /// The outpoint debited by this input, real spends only
    pub fn prevout(&self) -> Option<&OutPoint> {
        match self {
            TxInput::Spend { prevout, .. } => Some(prevout),
            _ => None,
        }
    }

    pub fn sequence(&self) -> u32 {
        match self {
            TxInput::Spend { sequence, .. } => *sequence,
            _ => SEQUENCE_FINAL,
        }
    }

    /// Coinbase script bytes as they appear on the wire: height, then extra data
    fn coinbase_script(height: u64, extra: &[u8]) -> Vec<u8> {
        let mut script = Vec::with_capacity(8 + extra.len());
        script.extend_from_slice(&height.to_le_bytes());
        script.extend_from_slice(extra);
        script
    }
}

/// A transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount in smallest units
    pub amount: Amount,
    /// Locking script
    pub script_pubkey: Script,
}

impl TxOutput {
    pub fn new(amount: Amount, script_pubkey: Script) -> Self {
        Self {
            amount,
            script_pubkey,
        }
    }

    /// The zero-value, empty-script output that opens a coinstake
    pub fn empty() -> Self {
        Self {
            amount: 0,
            script_pubkey: Script::empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.amount == 0 && self.script_pubkey.is_empty()
    }
}

/// A complete transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Block height or timestamp before which the transaction is not final
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: 1,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// Create a coinbase for the block at `height`
    pub fn coinbase(height: u64, outputs: Vec<TxOutput>) -> Self {
        Self::new(
            vec![TxInput::Coinbase {
                height,
                extra: Vec::new(),
            }],
            outputs,
        )
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && matches!(self.inputs[0], TxInput::Coinbase { .. })
    }

    /// A coinstake spends real inputs and opens with an empty output
    pub fn is_coinstake(&self) -> bool {
        !self.is_coinbase()
            && self.inputs.iter().any(TxInput::is_real)
            && self.outputs.len() >= 2
            && self.outputs[0].is_empty()
    }

    /// Coinbase or coinstake
    pub fn is_reward(&self) -> bool {
        self.is_coinbase() || self.is_coinstake()
    }

    /// Iterate real spends only, skipping coinbase and change-marker inputs
    pub fn real_inputs(&self) -> impl Iterator<Item = &TxInput> {
        self.inputs.iter().filter(|input| input.is_real())
    }

    /// Outpoints debited by this transaction
    pub fn prevouts(&self) -> impl Iterator<Item = &OutPoint> {
        self.inputs.iter().filter_map(TxInput::prevout)
    }

    /// Index of the output designated as change, if the transaction has a marker
    pub fn change_marker(&self) -> Option<u32> {
        self.inputs.iter().find_map(|input| match input {
            TxInput::ChangeMarker { output_index } => Some(*output_index),
            _ => None,
        })
    }

    /// Transaction id
    pub fn hash(&self) -> Hash {
        hash_bytes(&self.to_bytes_for_signing())
    }

    /// Hash committed to by input signatures (signatures excluded, so it
    /// equals the transaction id)
    pub fn signing_hash(&self) -> Hash {
        self.hash()
    }

    /// Serialize for hashing and signing
    fn to_bytes_for_signing(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        bytes.extend_from_slice(&self.version.to_le_bytes());

        bytes.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            match input {
                TxInput::Coinbase { height, extra } => {
                    let script = TxInput::coinbase_script(*height, extra);
                    let null = OutPoint::null();
                    bytes.extend_from_slice(&null.hash.0);
                    bytes.extend_from_slice(&null.index.to_le_bytes());
                    bytes.extend_from_slice(&(script.len() as u32).to_le_bytes());
                    bytes.extend_from_slice(&script);
                    bytes.extend_from_slice(&SEQUENCE_FINAL.to_le_bytes());
                }
                TxInput::Spend {
                    prevout, sequence, ..
                } => {
                    bytes.extend_from_slice(&prevout.hash.0);
                    bytes.extend_from_slice(&prevout.index.to_le_bytes());
                    bytes.extend_from_slice(&0u32.to_le_bytes());
                    bytes.extend_from_slice(&sequence.to_le_bytes());
                }
                TxInput::ChangeMarker { output_index } => {
                    bytes.extend_from_slice(&Hash::zero().0);
                    bytes.extend_from_slice(&output_index.to_le_bytes());
                    bytes.extend_from_slice(&0u32.to_le_bytes());
                    bytes.extend_from_slice(&SEQUENCE_FINAL.to_le_bytes());
                }
            }
        }

        bytes.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            bytes.extend_from_slice(&output.amount.to_le_bytes());
            bytes.extend_from_slice(&(output.script_pubkey.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&output.script_pubkey.0);
        }

        bytes.extend_from_slice(&self.lock_time.to_le_bytes());

        bytes
    }

    /// Serialized size in bytes (signatures included)
    pub fn serialized_size(&self) -> usize {
        bincode::serialized_size(self).map(|size| size as usize).unwrap_or(usize::MAX)
    }

    /// Sum of output values, `None` when outside the money range
    pub fn total_output_value(&self) -> Option<Amount> {
        checked_sum(self.outputs.iter().map(|output| output.amount))
    }

    /// Legacy sig-op count: one per real input plus the output scripts
    pub fn sig_op_count(&self) -> usize {
        let outputs: usize = self
            .outputs
            .iter()
            .map(|output| output.script_pubkey.sig_op_count())
            .sum();
        self.real_inputs().count() + outputs
    }

    /// True when any real input opts in to replacement
    pub fn signals_replacement(&self) -> bool {
        self.real_inputs()
            .any(|input| input.sequence() < SEQUENCE_RBF_THRESHOLD)
    }

    /// Lock-time finality at a block height and time
    pub fn is_final(&self, height: u64, block_time: u64) -> bool {
        if self.lock_time == 0 {
            return true;
        }
        let cutoff = if self.lock_time < LOCKTIME_THRESHOLD {
            height
        } else {
            block_time
        };
        if (self.lock_time as u64) < cutoff {
            return true;
        }
        self.inputs
            .iter()
            .all(|input| input.sequence() == SEQUENCE_FINAL)
    }
}
