//! Wallet implementation
//!
//! Handles key generation, coin tracking, and transaction signing.
//! The wallet does NOT affect consensus - bugs here cannot affect supply.

use rand::Rng;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

use crate::consensus::ConsensusParams;
use crate::crypto::{Hash, PrivateKey, PublicKey, SchnorrSignature};
use crate::storage::CoinView;
use crate::validation::{Amount, OutPoint, Script, Transaction, TxInput};
use crate::wallet::{SpendableCoin, TransactionBuilder};

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("not enough funds: short by {shortfall}")]
    NotEnoughFunds { shortfall: Amount },
    #[error("no recipients")]
    NoRecipients,
    #[error("invalid amount")]
    InvalidAmount,
    #[error("fee did not converge (last estimate {0})")]
    FeeNotConverged(Amount),
    #[error("coin script has no destination")]
    UnsupportedScript,
    #[error("no key for destination {0}")]
    MissingKey(Hash),
    #[error("invalid private key")]
    InvalidKey,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// A wallet key pair
#[derive(Debug, Clone)]
pub struct KeyPair {
    private_key: PrivateKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let private_key = PrivateKey::generate();
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }

    pub fn from_private_key_bytes(bytes: &[u8; 32]) -> Result<Self, WalletError> {
        let private_key = PrivateKey::from_bytes(bytes).map_err(|_| WalletError::InvalidKey)?;
        let public_key = private_key.public_key();
        Ok(Self {
            private_key,
            public_key,
        })
    }

    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.private_key.to_bytes()
    }

    /// Destination that outputs pay to
    pub fn pubkey_hash(&self) -> Hash {
        self.public_key.pubkey_hash()
    }

    /// Locking script paying this key
    pub fn script(&self) -> Script {
        Script::pay_to_pubkey_hash(&self.pubkey_hash())
    }

    pub fn sign(&self, message: &Hash) -> SchnorrSignature {
        self.private_key.sign(message)
    }
}

/// A simple wallet
#[derive(Debug, Default)]
pub struct Wallet {
    /// Wallet keys (pubkey_hash -> keypair)
    keys: HashMap<Hash, KeyPair>,
}

impl Wallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new key and add it to the wallet
    pub fn generate_key(&mut self) -> &KeyPair {
        self.insert(KeyPair::generate())
    }

    pub fn import_key(&mut self, bytes: &[u8; 32]) -> Result<&KeyPair, WalletError> {
        let keypair = KeyPair::from_private_key_bytes(bytes)?;
        Ok(self.insert(keypair))
    }

    fn insert(&mut self, keypair: KeyPair) -> &KeyPair {
        self.keys.entry(keypair.pubkey_hash()).or_insert(keypair)
    }

    pub fn key_for(&self, pubkey_hash: &Hash) -> Option<&KeyPair> {
        self.keys.get(pubkey_hash)
    }

    pub fn pubkey_hashes(&self) -> Vec<Hash> {
        self.keys.keys().copied().collect()
    }

    /// Whether `script` pays one of our keys
    pub fn owns(&self, script: &Script) -> bool {
        script
            .destination()
            .is_some_and(|destination| self.keys.contains_key(&destination))
    }

    /// Coins in `view` paying our keys that are spendable in the block
    /// after `tip_height`. Immature coinbase and coinstake outputs are left
    /// out.
    pub fn spendable_coins(&self, view: &CoinView, tip_height: u64, params: &ConsensusParams) -> Vec<SpendableCoin> {
        let next_height = tip_height + 1;
        let mut coins: Vec<SpendableCoin> = view
            .records()
            .filter(|record| {
                !record.is_reward() || next_height.saturating_sub(record.height) >= params.coinbase_maturity
            })
            .flat_map(|record| {
                let confirmations = next_height.saturating_sub(record.height);
                record
                    .outputs
                    .iter()
                    .enumerate()
                    .filter_map(move |(index, output)| {
                        output.as_ref().map(|output| SpendableCoin {
                            outpoint: OutPoint::new(record.tx_hash, index as u32),
                            output: output.clone(),
                            confirmations,
                        })
                    })
            })
            .filter(|coin| self.owns(coin.script()))
            .collect();
        coins.sort_by_key(|coin| coin.outpoint);
        coins
    }

    pub fn balance(&self, coins: &[SpendableCoin]) -> Amount {
        coins.iter().map(SpendableCoin::value).sum()
    }

    /// Pay `amount` to `recipient` from `coins`, returning change to the
    /// first selected coin's script
    pub fn create_transaction<R>(
        &self,
        coins: &[SpendableCoin],
        recipient: &Hash,
        amount: Amount,
        params: &ConsensusParams,
        min_relay_fee_per_kb: Amount,
        rng: &mut R,
    ) -> Result<Transaction, WalletError>
    where
        R: Rng + ?Sized,
    {
        TransactionBuilder::new(params)
            .pay(Script::pay_to_pubkey_hash(recipient), amount)
            .min_relay_fee_per_kb(min_relay_fee_per_kb)
            .build(coins, self, rng)
    }

    /// Sign every real input with the key it names
    pub fn sign_inputs(&self, tx: &mut Transaction) -> Result<(), WalletError> {
        let signing_hash = tx.signing_hash();
        for input in &mut tx.inputs {
            if let TxInput::Spend {
                signature,
                public_key,
                ..
            } = input
            {
                let pubkey_hash = public_key.pubkey_hash();
                let key = self
                    .keys
                    .get(&pubkey_hash)
                    .ok_or(WalletError::MissingKey(pubkey_hash))?;
                *signature = key.sign(&signing_hash);
            }
        }
        Ok(())
    }

    /// Save the private keys to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), WalletError> {
        let secrets: Vec<[u8; 32]> = self.keys.values().map(KeyPair::private_key_bytes).collect();
        let bytes = bincode::serialize(&secrets)?;
        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        let secrets: Vec<[u8; 32]> = bincode::deserialize(&bytes)?;

        let mut wallet = Self::new();
        for secret in &secrets {
            wallet.import_key(secret)?;
        }
        Ok(wallet)
    }

    /// Load the wallet at `path`, saving one with a fresh key if it is
    /// absent or holds no keys
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        let path = path.as_ref();
        let mut wallet = if path.exists() { Self::load(path)? } else { Self::new() };
        if wallet.keys.is_empty() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            wallet.generate_key();
            wallet.save(path)?;
        }
        Ok(wallet)
    }

    /// Script paying the key with the lowest hash, stable across reloads
    pub fn primary_script(&self) -> Option<Script> {
        self.keys
            .iter()
            .min_by_key(|(pubkey_hash, _)| **pubkey_hash)
            .map(|(_, key)| key.script())
    }
}
