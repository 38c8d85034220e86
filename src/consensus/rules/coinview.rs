//! The coin-view rule: spends every input against the view, records the
//! per-transaction bookkeeping the fee-split rules consume, and verifies
//! input scripts concurrently.

use tokio::task::{self, JoinHandle};
use tracing::{debug, trace};

use crate::consensus::{block_subsidy, ConsensusError, ConsensusParams, RuleContext};
use crate::crypto::Hash;
use crate::validation::{money_range, verify_input, Amount, ScriptError};

type ScriptCheck = (Hash, usize, JoinHandle<Result<(), ScriptError>>);

pub(super) async fn coin_view(
    ctx: &mut RuleContext<'_>,
    params: &ConsensusParams,
) -> Result<(), ConsensusError> {
    let block = ctx.block;
    let height = ctx.height;
    let verify = !ctx.skip_validation;

    let mut checks: Vec<ScriptCheck> = Vec::new();
    let mut fees: Amount = 0;
    let mut stake_in: Amount = 0;

    for tx in &block.transactions {
        let tx_hash = tx.hash();

        if !tx.is_coinbase() {
            if let Some(missing) = ctx.view.first_missing(tx) {
                return Err(ConsensusError::MissingOrSpentInput(missing));
            }

            let mut scripts = Vec::new();
            for prevout in tx.prevouts() {
                let record = ctx
                    .view
                    .access(&prevout.hash)
                    .ok_or(ConsensusError::MissingOrSpentInput(*prevout))?;
                if record.is_reward() {
                    let depth = height.saturating_sub(record.height);
                    if depth < params.coinbase_maturity {
                        return Err(ConsensusError::PrematureCoinbaseSpend {
                            outpoint: *prevout,
                            depth,
                        });
                    }
                }
                if let Some(output) = record.output(prevout.index) {
                    scripts.push(output.script_pubkey.clone());
                }
            }

            let value_in = ctx.view.value_in(tx)?;
            let value_out = tx
                .total_output_value()
                .ok_or(ConsensusError::OutputTotalTooLarge)?;

            if tx.is_coinstake() {
                stake_in = value_in;
            } else {
                if value_in < value_out {
                    return Err(ConsensusError::InBelowOut { value_in, value_out });
                }
                let fee = value_in - value_out;
                fees = fees
                    .checked_add(fee)
                    .filter(|total| money_range(*total))
                    .ok_or(ConsensusError::FeeOutOfRange { fee, required: 0 })?;
            }

            if verify {
                let signing_hash = tx.signing_hash();
                for (index, input) in tx.inputs.iter().enumerate() {
                    let Some(prevout) = input.prevout() else {
                        continue;
                    };
                    let Some(locking_script) = ctx.view.output(prevout).map(|o| o.script_pubkey.clone())
                    else {
                        return Err(ConsensusError::MissingOrSpentInput(*prevout));
                    };
                    let input = input.clone();
                    let handle = task::spawn_blocking(move || {
                        verify_input(&signing_hash, &input, &locking_script)
                    });
                    checks.push((tx_hash, index, handle));
                }
            }

            ctx.total_in.insert(tx_hash, value_in);
            ctx.input_scripts.insert(tx_hash, scripts);
        }

        ctx.view.update(tx, height)?;
    }

    let launched = checks.len();
    for (tx, input, handle) in checks {
        let outcome = handle.await.unwrap_or(Err(ScriptError::Aborted));
        if let Err(reason) = outcome {
            return Err(ConsensusError::ScriptVerify { tx, input, reason });
        }
    }
    trace!(height, inputs = launched, "input scripts verified");

    if verify {
        check_reward(ctx, params, fees, stake_in)?;
    }

    ctx.block_fees = fees;
    debug!(height, fees, transactions = block.transactions.len(), "coin view updated");
    Ok(())
}

/// The reward transaction may claim at most subsidy plus fees
fn check_reward(
    ctx: &RuleContext<'_>,
    params: &ConsensusParams,
    fees: Amount,
    stake_in: Amount,
) -> Result<(), ConsensusError> {
    let limit = block_subsidy(params, ctx.height).saturating_add(fees);

    if let Some(coinstake) = ctx.block.coinstake() {
        let value_out = coinstake
            .total_output_value()
            .ok_or(ConsensusError::OutputTotalTooLarge)?;
        let actual = value_out - stake_in;
        if actual > limit {
            return Err(ConsensusError::BadCoinstakeAmount { actual, limit });
        }
        return Ok(());
    }

    let coinbase = ctx.block.coinbase().ok_or(ConsensusError::MissingCoinbase)?;
    let actual = coinbase
        .total_output_value()
        .ok_or(ConsensusError::OutputTotalTooLarge)?;
    if actual > limit {
        return Err(ConsensusError::BadCoinbaseAmount { actual, limit });
    }
    Ok(())
}
