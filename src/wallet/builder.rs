//! Transaction builder
//!
//! The only producer of change markers: a `ChangeMarker` input is emitted
//! exactly when a change output is, and always points at it.

use rand::Rng;
use tracing::debug;

use crate::consensus::{expected_fee, ConsensusParams};
use crate::validation::{checked_sum, Amount, Script, Transaction, TxInput, TxOutput};
use crate::wallet::{select_coins, SpendableCoin, Wallet, WalletError};

/// Size-dependent fee rounds before giving up on converging
const MAX_FEE_ROUNDS: usize = 4;

#[derive(Debug, Clone)]
pub struct TransactionBuilder<'a> {
    params: &'a ConsensusParams,
    recipients: Vec<TxOutput>,
    change_script: Option<Script>,
    stake_script: Option<Script>,
    min_relay_fee_per_kb: Amount,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(params: &'a ConsensusParams) -> Self {
        Self {
            params,
            recipients: Vec::new(),
            change_script: None,
            stake_script: None,
            min_relay_fee_per_kb: 0,
        }
    }

    pub fn pay(mut self, script: Script, amount: Amount) -> Self {
        self.recipients.push(TxOutput::new(amount, script));
        self
    }

    /// Where change goes; defaults to the script of the first selected coin
    pub fn change_to(mut self, script: Script) -> Self {
        self.change_script = Some(script);
        self
    }

    /// Coins paying this script are selected individually
    pub fn stake_script(mut self, script: Script) -> Self {
        self.stake_script = Some(script);
        self
    }

    pub fn min_relay_fee_per_kb(mut self, fee: Amount) -> Self {
        self.min_relay_fee_per_kb = fee;
        self
    }

    /// Fee the finished transaction will declare
    pub fn fee_for(&self, tx: &Transaction) -> Amount {
        let owed = expected_fee(tx, &[], self.params.tx_fee_rate);
        let relay = self.min_relay_fee_per_kb.saturating_mul(tx.serialized_size() as Amount) / 1000;
        owed.saturating_add(relay)
    }

    /// Select coins, add change and sign every real input
    pub fn build<R>(&self, coins: &[SpendableCoin], wallet: &Wallet, rng: &mut R) -> Result<Transaction, WalletError>
    where
        R: Rng + ?Sized,
    {
        if self.recipients.is_empty() {
            return Err(WalletError::NoRecipients);
        }
        if self.recipients.iter().any(|output| output.amount <= 0) {
            return Err(WalletError::InvalidAmount);
        }
        let sent = checked_sum(self.recipients.iter().map(|output| output.amount))
            .ok_or(WalletError::InvalidAmount)?;

        let mut fee = self.fee_for(&Transaction::new(Vec::new(), self.recipients.clone()));
        for _ in 0..MAX_FEE_ROUNDS {
            let target = sent.saturating_add(fee);
            let selected = select_coins(coins, target, self.stake_script.as_ref(), rng).ok_or_else(|| {
                let available = coins.iter().map(SpendableCoin::value).fold(0, Amount::saturating_add);
                WalletError::NotEnoughFunds {
                    shortfall: target.saturating_sub(available).max(1),
                }
            })?;

            let mut tx = self.assemble(&selected, wallet, sent, fee)?;
            let required = self.fee_for(&tx);
            if fee < required {
                fee = required;
                continue;
            }

            wallet.sign_inputs(&mut tx)?;
            debug!(
                inputs = selected.len(),
                outputs = tx.outputs.len(),
                fee,
                change = tx.change_marker().is_some(),
                "built transaction"
            );
            return Ok(tx);
        }
        Err(WalletError::FeeNotConverged(fee))
    }

    fn assemble(
        &self,
        selected: &[SpendableCoin],
        wallet: &Wallet,
        sent: Amount,
        fee: Amount,
    ) -> Result<Transaction, WalletError> {
        let total = checked_sum(selected.iter().map(SpendableCoin::value)).ok_or(WalletError::InvalidAmount)?;
        let change = total - sent - fee;

        let mut inputs: Vec<TxInput> = Vec::with_capacity(selected.len() + 1);
        for coin in selected {
            let destination = coin
                .script()
                .destination()
                .ok_or(WalletError::UnsupportedScript)?;
            let key = wallet
                .key_for(&destination)
                .ok_or(WalletError::MissingKey(destination))?;
            inputs.push(TxInput::spend(coin.outpoint, key.public_key.clone()));
        }

        let mut outputs = self.recipients.clone();
        if change > 0 {
            let script = match &self.change_script {
                Some(script) => script.clone(),
                None => selected
                    .first()
                    .map(|coin| coin.script().clone())
                    .ok_or(WalletError::InvalidAmount)?,
            };
            outputs.push(TxOutput::new(change, script));
            inputs.push(TxInput::ChangeMarker {
                output_index: (outputs.len() - 1) as u32,
            });
        }

        Ok(Transaction::new(inputs, outputs))
    }
}
