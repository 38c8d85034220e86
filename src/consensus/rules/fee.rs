//! Fee-split rules
//!
//! Both rules read the bookkeeping left by the coin-view rule: total real
//! input value and real input scripts, keyed by transaction hash.

use tracing::debug;

use crate::constants::ROUNDING_TOLERANCE;
use crate::consensus::{
    block_subsidy, expected_fee, find_fee_outputs, required_fee_share, ConsensusError,
    ConsensusParams, RuleContext,
};
use crate::validation::Amount;

/// Real inputs plus the subsidy must equal everything the block creates
pub(super) fn funds_preservation(
    ctx: &mut RuleContext<'_>,
    params: &ConsensusParams,
) -> Result<(), ConsensusError> {
    let mut total_in: i128 = 0;
    let mut total_out: i128 = 0;
    for tx in &ctx.block.transactions {
        total_in += ctx.total_in.get(&tx.hash()).copied().unwrap_or(0) as i128;
        total_out += tx
            .outputs
            .iter()
            .map(|output| output.amount as i128)
            .sum::<i128>();
    }

    let subsidy = block_subsidy(params, ctx.height);
    if total_in + subsidy as i128 != total_out {
        return Err(ConsensusError::FundsNotPreserved {
            total_in: clamp(total_in),
            subsidy,
            total_out: clamp(total_out),
        });
    }
    Ok(())
}

/// Every transaction pays its expected fee, and the block pays the
/// recipients their share of the total through exactly one output
pub(super) fn block_fee(
    ctx: &mut RuleContext<'_>,
    params: &ConsensusParams,
) -> Result<(), ConsensusError> {
    let mut total_expected: Amount = 0;

    for tx in ctx.block.transactions.iter().filter(|tx| !tx.is_reward()) {
        let tx_hash = tx.hash();
        let expected = expected_fee(tx, ctx.input_scripts_of(&tx_hash), params.tx_fee_rate);
        let value_in = ctx.total_in.get(&tx_hash).copied().unwrap_or(0);
        let value_out = tx
            .total_output_value()
            .ok_or(ConsensusError::OutputTotalTooLarge)?;
        let fee = value_in - value_out;

        if fee < expected - ROUNDING_TOLERANCE {
            return Err(ConsensusError::FeeOutOfRange {
                fee,
                required: expected,
            });
        }
        total_expected = total_expected.saturating_add(expected);
    }

    let reward = ctx
        .block
        .reward_transaction()
        .ok_or(ConsensusError::MissingCoinbase)?;
    let recipients = params.fee_recipients_at(ctx.height);
    let fee_outputs = find_fee_outputs(reward, recipients);
    let [(_, fee_output)] = fee_outputs.as_slice() else {
        return Err(ConsensusError::BadFeeOutput {
            found: fee_outputs.len(),
        });
    };

    let required = required_fee_share(total_expected, params.fee_split_share);
    if fee_output.amount < required {
        return Err(ConsensusError::FeeOutOfRange {
            fee: fee_output.amount,
            required,
        });
    }

    debug!(height = ctx.height, total_expected, required, paid = fee_output.amount, "fee split satisfied");
    Ok(())
}

fn clamp(value: i128) -> Amount {
    Amount::try_from(value).unwrap_or(if value < 0 { Amount::MIN } else { Amount::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;
    use crate::consensus::{Block, BlockHeader, ChainTip};
    use crate::crypto::{hash_bytes, Hash, PrivateKey};
    use crate::validation::{OutPoint, Script, Transaction, TxInput, TxOutput};

    const HEIGHT: u64 = 5;
    const FUNDING: Amount = 10 * COIN;

    fn script(seed: &[u8]) -> Script {
        Script::pay_to_pubkey_hash(&hash_bytes(seed))
    }

    fn tip() -> ChainTip {
        ChainTip {
            hash: hash_bytes(b"tip"),
            height: HEIGHT - 1,
            timestamp: 0,
            bits: 0x207fffff,
            median_time_past: 0,
            period_start_time: 0,
            chain_work: 0,
        }
    }

    /// A payment of 5 coins with marked change paying exactly its expected fee
    fn payment() -> Transaction {
        let fee = 500_000;
        Transaction::new(
            vec![
                TxInput::spend(
                    OutPoint::new(hash_bytes(b"funding"), 0),
                    PrivateKey::generate().public_key(),
                ),
                TxInput::ChangeMarker { output_index: 1 },
            ],
            vec![
                TxOutput::new(5 * COIN, script(b"bob")),
                TxOutput::new(FUNDING - 5 * COIN - fee, script(b"alice-change")),
            ],
        )
    }

    /// Coinbase claiming subsidy plus fee, paying `share` to the recipient
    fn block_with(params: &ConsensusParams, payment: Transaction, share: Option<Amount>) -> Block {
        let subsidy = block_subsidy(params, HEIGHT);
        let fee = 500_000;
        let recipient = params.fee_recipients_at(HEIGHT)[0];
        let mut outputs = vec![TxOutput::new(subsidy + fee - share.unwrap_or(0), script(b"miner"))];
        if let Some(share) = share {
            outputs.push(TxOutput::new(share, Script::pay_to_pubkey_hash(&recipient)));
        }
        Block::new(
            BlockHeader::new(1, hash_bytes(b"tip"), Hash::zero(), 0, 0x207fffff, 0),
            vec![Transaction::coinbase(HEIGHT, outputs), payment],
        )
    }

    fn run_fee_rules(
        params: &ConsensusParams,
        block: &Block,
        value_in: Amount,
    ) -> (Result<(), ConsensusError>, Result<(), ConsensusError>) {
        let tip = tip();
        let mut ctx = RuleContext::new(block, &tip, 0);
        let payment = block.transactions[1].hash();
        ctx.total_in.insert(payment, value_in);
        ctx.input_scripts.insert(payment, vec![script(b"alice")]);
        (funds_preservation(&mut ctx, params), block_fee(&mut ctx, params))
    }

    #[test]
    fn test_balanced_block_with_subsidy_passes() {
        let params = ConsensusParams::regtest();
        assert!(block_subsidy(&params, HEIGHT) > 0);
        let block = block_with(&params, payment(), Some(250_000));
        let (funds, fee) = run_fee_rules(&params, &block, FUNDING);
        assert!(funds.is_ok());
        assert!(fee.is_ok());
    }

    #[test]
    fn test_output_plus_one_breaks_funds_preservation() {
        let params = ConsensusParams::regtest();
        let mut tx = payment();
        tx.outputs[0].amount += 1;
        let block = block_with(&params, tx, Some(250_000));
        let (funds, _) = run_fee_rules(&params, &block, FUNDING);
        assert_eq!(funds.unwrap_err().code(), "bad-blk-funds-not-preserved");
    }

    #[test]
    fn test_unclaimed_subsidy_is_not_preserved() {
        let params = ConsensusParams::regtest();
        let mut block = block_with(&params, payment(), Some(250_000));
        block.transactions[0].outputs[0].amount -= block_subsidy(&params, HEIGHT);
        let (funds, _) = run_fee_rules(&params, &block, FUNDING);
        assert_eq!(funds.unwrap_err().code(), "bad-blk-funds-not-preserved");
    }

    #[test]
    fn test_missing_fee_output() {
        let params = ConsensusParams::regtest();
        let block = block_with(&params, payment(), None);
        let (_, fee) = run_fee_rules(&params, &block, FUNDING);
        assert_eq!(fee.unwrap_err().code(), "bad-blk-feeoutput");
    }

    #[test]
    fn test_two_fee_outputs() {
        let params = ConsensusParams::regtest();
        let mut block = block_with(&params, payment(), Some(125_000));
        let duplicate = block.transactions[0].outputs[1].clone();
        block.transactions[0].outputs[0].amount -= 125_000;
        block.transactions[0].outputs.push(duplicate);
        let (_, fee) = run_fee_rules(&params, &block, FUNDING);
        assert_eq!(
            fee.unwrap_err().to_string(),
            ConsensusError::BadFeeOutput { found: 2 }.to_string()
        );
    }

    #[test]
    fn test_exact_share_boundary() {
        let params = ConsensusParams::regtest();
        let required = required_fee_share(500_000, params.fee_split_share);
        assert_eq!(required, 250_000);

        let exact = block_with(&params, payment(), Some(required));
        assert!(run_fee_rules(&params, &exact, FUNDING).1.is_ok());

        let short = block_with(&params, payment(), Some(required - 1));
        assert_eq!(
            run_fee_rules(&params, &short, FUNDING).1.unwrap_err().code(),
            "bad-txns-fee-outofrange"
        );
    }

    #[test]
    fn test_underpaying_transaction() {
        let params = ConsensusParams::regtest();
        let mut tx = payment();
        // pay 2 units less fee than expected; one unit is tolerated
        tx.outputs[1].amount += 2;
        let block = block_with(&params, tx, Some(250_000));
        let (_, fee) = run_fee_rules(&params, &block, FUNDING);
        assert_eq!(fee.unwrap_err().code(), "bad-txns-fee-outofrange");

        let mut tx = payment();
        tx.outputs[1].amount += 1;
        let block = block_with(&params, tx, Some(250_000));
        assert!(run_fee_rules(&params, &block, FUNDING).1.is_ok());
    }
}
