//! Block assembly
//!
//! Builds candidate blocks whose reward transaction satisfies the
//! fee-split rules: the miner (or staker) keeps subsidy plus fees minus the
//! recipients' share, and exactly one output pays that share to the first
//! active fee recipient. A producer that is itself an active recipient gets
//! a single output carrying both amounts.

use thiserror::Error;
use tracing::debug;

use crate::consensus::{
    block_subsidy, expected_fee, next_bits, required_fee_share, Block, BlockHeader, BlockSignature,
    ChainTip, ConsensusError, ConsensusParams,
};
use crate::crypto::Hash;
use crate::storage::{CoinStore, CoinView, StoreError};
use crate::validation::{Amount, Script, Transaction, TxInput, TxOutput};
use crate::wallet::{KeyPair, SpendableCoin};

pub const BLOCK_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no fee recipients active at height {0}")]
    NoFeeRecipient(u64),
    #[error("stake coin is not paid to the staking key")]
    ForeignStake,
}

/// Fees a set of transactions pays and owes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockFees {
    /// Actual fees: inputs minus outputs
    pub paid: Amount,
    /// Sum of the fees the transactions owe at the fee rate
    pub expected: Amount,
}

pub struct BlockAssembler<'a> {
    params: &'a ConsensusParams,
    reward_script: Script,
}

impl<'a> BlockAssembler<'a> {
    pub fn new(params: &'a ConsensusParams, reward_script: Script) -> Self {
        Self {
            params,
            reward_script,
        }
    }

    /// Fetch the coins `txs` spend and assemble a proof-of-work block
    pub async fn assemble_from_store(
        &self,
        store: &dyn CoinStore,
        tip: &ChainTip,
        txs: Vec<Transaction>,
        time: u64,
    ) -> Result<Block, AssembleError> {
        let view = load_inputs(store, &txs).await?;
        self.assemble(tip, txs, &view, time)
    }

    /// Proof-of-work block on top of `tip`. `view` must hold every coin the
    /// transactions spend from the chain; in-block parents are resolved as
    /// the transactions are applied in order.
    pub fn assemble(
        &self,
        tip: &ChainTip,
        txs: Vec<Transaction>,
        view: &CoinView,
        time: u64,
    ) -> Result<Block, AssembleError> {
        let height = tip.height + 1;
        let fees = self.tally_fees(&txs, view, height)?;
        let (keep, share) = self.split(height, fees);

        let outputs = self.reward_outputs(height, self.reward_script.clone(), keep, share)?;

        let mut transactions = Vec::with_capacity(txs.len() + 1);
        transactions.push(Transaction::coinbase(height, outputs));
        transactions.extend(txs);

        debug!(height, paid = fees.paid, expected = fees.expected, share, "assembled block");
        Ok(self.finish(tip, transactions, time))
    }

    /// Proof-of-stake block: an empty coinbase, then a coinstake spending
    /// `stake` back to `staker` with the reward, signed by `staker`
    pub fn assemble_pos(
        &self,
        tip: &ChainTip,
        txs: Vec<Transaction>,
        view: &CoinView,
        stake: &SpendableCoin,
        staker: &KeyPair,
        time: u64,
    ) -> Result<Block, AssembleError> {
        if stake.script().destination() != Some(staker.pubkey_hash()) {
            return Err(AssembleError::ForeignStake);
        }

        let height = tip.height + 1;
        let fees = self.tally_fees(&txs, view, height)?;
        let (keep, share) = self.split(height, fees);

        let mut outputs = vec![TxOutput::empty()];
        outputs.extend(self.reward_outputs(height, staker.script(), stake.value().saturating_add(keep), share)?);
        let mut coinstake = Transaction::new(
            vec![TxInput::spend(stake.outpoint, staker.public_key.clone())],
            outputs,
        );
        let signing_hash = coinstake.signing_hash();
        if let Some(TxInput::Spend { signature, .. }) = coinstake.inputs.first_mut() {
            *signature = staker.sign(&signing_hash);
        }

        let mut transactions = Vec::with_capacity(txs.len() + 2);
        transactions.push(Transaction::coinbase(height, vec![TxOutput::empty()]));
        transactions.push(coinstake);
        transactions.extend(txs);

        let mut block = self.finish(tip, transactions, time);
        block.signature = Some(BlockSignature {
            public_key: staker.public_key.clone(),
            signature: staker.sign(&block.hash()),
        });
        Ok(block)
    }

    /// Fees paid and owed, applying each transaction to a scratch view so
    /// later transactions may spend earlier ones
    pub fn tally_fees(&self, txs: &[Transaction], view: &CoinView, height: u64) -> Result<BlockFees, ConsensusError> {
        let mut scratch = view.clone();
        let mut fees = BlockFees::default();

        for tx in txs {
            let scripts: Vec<Script> = tx
                .prevouts()
                .map(|prevout| {
                    scratch
                        .output(prevout)
                        .map(|output| output.script_pubkey.clone())
                        .ok_or(ConsensusError::MissingOrSpentInput(*prevout))
                })
                .collect::<Result<_, _>>()?;
            let value_in = scratch.value_in(tx)?;
            let value_out = tx
                .total_output_value()
                .ok_or(ConsensusError::OutputTotalTooLarge)?;

            fees.paid = fees.paid.saturating_add(value_in - value_out);
            fees.expected = fees
                .expected
                .saturating_add(expected_fee(tx, &scripts, self.params.tx_fee_rate));
            scratch.update(tx, height)?;
        }
        Ok(fees)
    }

    /// (reward kept by the block producer, share owed to the recipients)
    fn split(&self, height: u64, fees: BlockFees) -> (Amount, Amount) {
        let share = required_fee_share(fees.expected, self.params.fee_split_share).min(fees.paid);
        let keep = block_subsidy(self.params, height).saturating_add(fees.paid) - share;
        (keep, share)
    }

    /// Producer output then fee output, or one merged output when `script`
    /// already pays an active recipient
    fn reward_outputs(
        &self,
        height: u64,
        script: Script,
        keep: Amount,
        share: Amount,
    ) -> Result<Vec<TxOutput>, AssembleError> {
        let recipients = self.params.fee_recipients_at(height);
        let recipient = recipients.first().ok_or(AssembleError::NoFeeRecipient(height))?;

        if script
            .destination()
            .is_some_and(|destination| recipients.contains(&destination))
        {
            return Ok(vec![TxOutput::new(keep.saturating_add(share), script)]);
        }
        Ok(vec![
            TxOutput::new(keep, script),
            TxOutput::new(share, Script::pay_to_pubkey_hash(recipient)),
        ])
    }

    fn finish(&self, tip: &ChainTip, transactions: Vec<Transaction>, time: u64) -> Block {
        let bits = next_bits(
            self.params,
            tip.height,
            tip.bits,
            tip.timestamp,
            tip.period_start_time,
        );
        let timestamp = time.max(tip.median_time_past + 1);
        let header = BlockHeader::new(BLOCK_VERSION, tip.hash, Hash::zero(), timestamp, bits, 0);
        let mut block = Block::new(header, transactions);
        block.update_merkle_root();
        block
    }
}

/// Coins the transactions spend from the chain
pub async fn load_inputs(store: &dyn CoinStore, txs: &[Transaction]) -> Result<CoinView, StoreError> {
    let mut ids: Vec<_> = txs.iter().flat_map(|tx| tx.prevouts().map(|prevout| prevout.hash)).collect();
    ids.sort();
    ids.dedup();

    let mut view = CoinView::new();
    if !ids.is_empty() {
        let response = store.fetch_coins(&ids).await?;
        view.set(response.records.into_iter().flatten());
    }
    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;
    use crate::crypto::hash_bytes;
    use crate::storage::UnspentOutputs;
    use crate::consensus::find_fee_outputs;
    use crate::validation::OutPoint;

    fn funded_payment(key: &KeyPair) -> (CoinView, Transaction) {
        let funding = Transaction::coinbase(1, vec![TxOutput::new(10 * COIN, key.script())]);
        let mut view = CoinView::new();
        view.set(vec![UnspentOutputs::from_transaction(&funding, 1)]);

        let mut tx = Transaction::new(
            vec![
                TxInput::spend(OutPoint::new(funding.hash(), 0), key.public_key.clone()),
                TxInput::ChangeMarker { output_index: 1 },
            ],
            vec![
                TxOutput::new(5 * COIN, Script::pay_to_pubkey_hash(&hash_bytes(b"bob"))),
                TxOutput::new(5 * COIN - 600_000, key.script()),
            ],
        );
        let signing_hash = tx.signing_hash();
        if let Some(TxInput::Spend { signature, .. }) = tx.inputs.first_mut() {
            *signature = key.sign(&signing_hash);
        }
        (view, tx)
    }

    #[test]
    fn test_tally_fees() {
        let params = ConsensusParams::regtest();
        let key = KeyPair::generate();
        let (view, tx) = funded_payment(&key);
        let assembler = BlockAssembler::new(&params, key.script());

        let fees = assembler.tally_fees(&[tx], &view, 2).unwrap();
        assert_eq!(fees, BlockFees { paid: 600_000, expected: 500_000 });
    }

    #[test]
    fn test_coinbase_splits_fees() {
        let params = ConsensusParams::regtest();
        let key = KeyPair::generate();
        let (view, tx) = funded_payment(&key);
        let tip = ChainTip::genesis(&params.genesis);
        let assembler = BlockAssembler::new(&params, key.script());

        let block = assembler.assemble(&tip, vec![tx], &view, 1_700_000_100).unwrap();
        let coinbase = block.coinbase().unwrap();
        let subsidy = block_subsidy(&params, 1);
        assert_eq!(coinbase.outputs[0].amount, subsidy + 600_000 - 250_000);
        assert_eq!(coinbase.outputs[1].amount, 250_000);
        assert_eq!(
            coinbase.outputs[1].script_pubkey.destination().as_ref(),
            params.fee_recipients_at(1).first()
        );
        assert_eq!(block.compute_merkle_root(), (block.header.merkle_root, false));
        assert_eq!(block.header.prev_hash, tip.hash);
    }

    #[test]
    fn test_empty_block_still_has_fee_output() {
        let params = ConsensusParams::regtest();
        let key = KeyPair::generate();
        let tip = ChainTip::genesis(&params.genesis);
        let block = BlockAssembler::new(&params, key.script())
            .assemble(&tip, Vec::new(), &CoinView::new(), 0)
            .unwrap();

        let coinbase = block.coinbase().unwrap();
        assert_eq!(coinbase.outputs.len(), 2);
        assert_eq!(coinbase.outputs[1].amount, 0);
        assert!(block.header.timestamp > tip.median_time_past);
    }

    #[test]
    fn test_foreign_stake_rejected() {
        let params = ConsensusParams::regtest();
        let key = KeyPair::generate();
        let stake = SpendableCoin {
            outpoint: OutPoint::new(hash_bytes(b"stake"), 0),
            output: TxOutput::new(COIN, Script::pay_to_pubkey_hash(&hash_bytes(b"other"))),
            confirmations: 50,
        };
        let tip = ChainTip::genesis(&params.genesis);
        let result = BlockAssembler::new(&params, key.script()).assemble_pos(
            &tip,
            Vec::new(),
            &CoinView::new(),
            &stake,
            &key,
            0,
        );
        assert!(matches!(result, Err(AssembleError::ForeignStake)));
    }

    #[test]
    fn test_recipient_reward_merges_fee_output() {
        let params = ConsensusParams::regtest();
        let key = KeyPair::generate();
        let (view, tx) = funded_payment(&key);
        let tip = ChainTip::genesis(&params.genesis);
        let reward_script = Script::pay_to_pubkey_hash(&params.fee_recipients_at(1)[0]);

        let block = BlockAssembler::new(&params, reward_script.clone())
            .assemble(&tip, vec![tx], &view, 1_700_000_100)
            .unwrap();
        let coinbase = block.coinbase().unwrap();
        assert_eq!(coinbase.outputs.len(), 1);
        assert_eq!(coinbase.outputs[0].script_pubkey, reward_script);
        assert_eq!(coinbase.outputs[0].amount, block_subsidy(&params, 1) + 600_000);
        assert_eq!(find_fee_outputs(coinbase, params.fee_recipients_at(1)).len(), 1);
    }
}
