//! Coin selection
//!
//! Coins are grouped by locking script and selected group-wise:
//! an exact group first, then an ascending accumulation, then the
//! smallest group that covers the target alone, and finally randomized
//! trials that keep the smallest overshoot.
//!
//! Coins paying the stake script are never grouped with each other so a
//! payment does not sweep every stake output into one spend.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::constants::MAX_SELECTION_TRIALS;
use crate::validation::{Amount, OutPoint, Script, TxOutput};

/// An output the wallet can spend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendableCoin {
    pub outpoint: OutPoint,
    pub output: TxOutput,
    pub confirmations: u64,
}

impl SpendableCoin {
    pub fn value(&self) -> Amount {
        self.output.amount
    }

    pub fn script(&self) -> &Script {
        &self.output.script_pubkey
    }
}

#[derive(Debug, Clone)]
struct CoinGroup<'a> {
    coins: Vec<&'a SpendableCoin>,
    total: Amount,
}

impl<'a> CoinGroup<'a> {
    fn single(coin: &'a SpendableCoin) -> Self {
        Self {
            coins: vec![coin],
            total: coin.value(),
        }
    }

    fn push(&mut self, coin: &'a SpendableCoin) {
        self.coins.push(coin);
        self.total = self.total.saturating_add(coin.value());
    }
}

/// Pick coins summing to at least `target`, or `None` when the coins
/// cannot cover it
pub fn select_coins<R>(
    coins: &[SpendableCoin],
    target: Amount,
    stake_script: Option<&Script>,
    rng: &mut R,
) -> Option<Vec<SpendableCoin>>
where
    R: Rng + ?Sized,
{
    if target <= 0 {
        return Some(Vec::new());
    }

    let groups = group_by_script(coins, stake_script);

    if let Some(exact) = groups.iter().find(|group| group.total == target) {
        return Some(collect(std::iter::once(exact)));
    }

    let mut ascending: Vec<&CoinGroup> = groups.iter().collect();
    ascending.sort_by_key(|group| group.total);

    let mut running: Amount = 0;
    let mut accumulated: Vec<&CoinGroup> = Vec::new();
    for group in ascending.iter().copied() {
        let next = running.saturating_add(group.total);
        if next < target {
            running = next;
            accumulated.push(group);
        } else if next == target {
            accumulated.push(group);
            return Some(collect(accumulated.into_iter()));
        }
    }

    if let Some(larger) = ascending.iter().find(|group| group.total > target) {
        return Some(collect(std::iter::once(*larger)));
    }

    random_trials(&groups, target, rng)
}

fn group_by_script<'a>(coins: &'a [SpendableCoin], stake_script: Option<&Script>) -> Vec<CoinGroup<'a>> {
    let mut groups: Vec<CoinGroup<'a>> = Vec::new();
    for coin in coins {
        if stake_script.is_some_and(|stake| stake == coin.script()) {
            groups.push(CoinGroup::single(coin));
            continue;
        }
        let existing = groups.iter_mut().find(|group| {
            group.coins[0].script() == coin.script()
                && !stake_script.is_some_and(|stake| stake == group.coins[0].script())
        });
        match existing {
            Some(group) => group.push(coin),
            None => groups.push(CoinGroup::single(coin)),
        }
    }
    groups
}

fn random_trials<R>(groups: &[CoinGroup], target: Amount, rng: &mut R) -> Option<Vec<SpendableCoin>>
where
    R: Rng + ?Sized,
{
    let mut order: Vec<&CoinGroup> = groups.iter().collect();
    let mut best: Option<(Amount, Vec<&CoinGroup>)> = None;

    for _ in 0..MAX_SELECTION_TRIALS {
        order.shuffle(rng);

        let mut running: Amount = 0;
        let mut picked = Vec::new();
        for group in &order {
            running = running.saturating_add(group.total);
            picked.push(*group);
            if running >= target {
                break;
            }
        }

        if running == target {
            return Some(collect(picked.into_iter()));
        }
        if running > target && best.as_ref().map_or(true, |(total, _)| running < *total) {
            best = Some((running, picked));
        }
    }

    best.map(|(_, picked)| collect(picked.into_iter()))
}

fn collect<'a, 'b, I>(groups: I) -> Vec<SpendableCoin>
where
    'a: 'b,
    I: Iterator<Item = &'b CoinGroup<'a>>,
{
    groups
        .flat_map(|group| group.coins.iter().map(|coin| (*coin).clone()))
        .collect()
}
