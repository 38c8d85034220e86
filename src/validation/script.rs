//! Locking scripts
//!
//! Only the templates this chain relays are understood: pay-to-pubkey-hash,
//! provably unspendable data carriers and the empty script of a coinstake
//! marker output.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{Hash, PublicKey, SchnorrSignature};
use crate::validation::TxInput;

pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

/// Sig-ops charged for a bare multisig opcode
const MULTISIG_SIGOPS: usize = 20;

const P2PKH_LEN: usize = 37;

/// Raw locking script bytes
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn empty() -> Self {
        Script(Vec::new())
    }

    /// `OP_DUP OP_HASH <32 bytes> OP_EQUALVERIFY OP_CHECKSIG`
    pub fn pay_to_pubkey_hash(destination: &Hash) -> Self {
        let mut bytes = Vec::with_capacity(P2PKH_LEN);
        bytes.push(OP_DUP);
        bytes.push(OP_HASH);
        bytes.push(32);
        bytes.extend_from_slice(&destination.0);
        bytes.push(OP_EQUALVERIFY);
        bytes.push(OP_CHECKSIG);
        Script(bytes)
    }

    /// Unspendable data carrier
    pub fn op_return(data: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(data.len() + 2);
        bytes.push(OP_RETURN);
        bytes.push(data.len() as u8);
        bytes.extend_from_slice(data);
        Script(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_unspendable(&self) -> bool {
        self.0.first() == Some(&OP_RETURN)
    }

    pub fn is_pay_to_pubkey_hash(&self) -> bool {
        self.0.len() == P2PKH_LEN
            && self.0[0] == OP_DUP
            && self.0[1] == OP_HASH
            && self.0[2] == 32
            && self.0[35] == OP_EQUALVERIFY
            && self.0[36] == OP_CHECKSIG
    }

    /// The pubkey hash a pay-to-pubkey-hash script pays to
    pub fn destination(&self) -> Option<Hash> {
        if !self.is_pay_to_pubkey_hash() {
            return None;
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&self.0[3..35]);
        Some(Hash(hash))
    }

    /// Legacy (inaccurate) sig-op count: every checksig counts one,
    /// every multisig counts the maximum.
    pub fn sig_op_count(&self) -> usize {
        let mut count = 0;
        let mut i = 0;
        while i < self.0.len() {
            let op = self.0[i];
            match op {
                // direct pushes: skip the pushed bytes
                0x01..=0x4b => {
                    i += op as usize;
                }
                OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
                OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => count += MULTISIG_SIGOPS,
                _ => {}
            }
            i += 1;
        }
        count
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", hex::encode(&self.0))
    }
}

/// Why an input failed to satisfy its locking script
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("input is not a spend")]
    NotASpend,
    #[error("locking script is not spendable")]
    UnspendableScript,
    #[error("public key does not match locking script destination")]
    PubkeyMismatch,
    #[error("signature verification failed")]
    BadSignature,
    #[error("verification task did not complete")]
    Aborted,
}

/// Verify one real input against the script of the output it spends.
///
/// CPU-bound and free of I/O so it can run on a blocking worker.
pub fn verify_input(signing_hash: &Hash, input: &TxInput, locking_script: &Script) -> Result<(), ScriptError> {
    let (signature, public_key): (&SchnorrSignature, &PublicKey) = match input {
        TxInput::Spend {
            signature,
            public_key,
            ..
        } => (signature, public_key),
        _ => return Err(ScriptError::NotASpend),
    };

    let destination = locking_script.destination().ok_or(ScriptError::UnspendableScript)?;
    if public_key.pubkey_hash() != destination {
        return Err(ScriptError::PubkeyMismatch);
    }
    if !public_key.verify(signing_hash, signature) {
        return Err(ScriptError::BadSignature);
    }
    Ok(())
}
