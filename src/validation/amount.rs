//! Monetary amounts
//!
//! Amounts are signed 64-bit counts of the smallest unit. Any amount or sum
//! of amounts outside `[0, MAX_MONEY]` is invalid.

use crate::constants::MAX_MONEY;

/// Amount in smallest currency units
pub type Amount = i64;

/// MoneyRange check
pub fn money_range(value: Amount) -> bool {
    (0..=MAX_MONEY).contains(&value)
}

/// Sum amounts, failing on overflow or as soon as a partial sum leaves the
/// money range.
pub fn checked_sum<I>(values: I) -> Option<Amount>
where
    I: IntoIterator<Item = Amount>,
{
    let mut total: Amount = 0;
    for value in values {
        if !money_range(value) {
            return None;
        }
        total = total.checked_add(value)?;
        if !money_range(total) {
            return None;
        }
    }
    Some(total)
}

/// Multiply an amount by a floating point rate, truncating toward zero.
///
/// Peers compute fees with double precision arithmetic, so this must stay
/// `f64` multiplication followed by truncation.
pub fn apply_rate(amount: Amount, rate: f64) -> Amount {
    (amount as f64 * rate) as Amount
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;

    #[test]
    fn test_money_range_bounds() {
        assert!(money_range(0));
        assert!(money_range(MAX_MONEY));
        assert!(!money_range(-1));
        assert!(!money_range(MAX_MONEY + 1));
    }

    #[test]
    fn test_checked_sum_rejects_out_of_range() {
        assert_eq!(checked_sum(vec![COIN, 2 * COIN]), Some(3 * COIN));
        assert_eq!(checked_sum(vec![MAX_MONEY, 1]), None);
        assert_eq!(checked_sum(vec![5, -1]), None);
        assert_eq!(checked_sum(Vec::new()), Some(0));
    }

    #[test]
    fn test_apply_rate_truncates() {
        assert_eq!(apply_rate(1_999, 0.001), 1);
        assert_eq!(apply_rate(1_000 * COIN, 0.001), COIN);
        assert_eq!(apply_rate(0, 0.5), 0);
    }
}
