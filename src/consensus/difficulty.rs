//! Difficulty adjustment
//!
//! Compact "bits" encoding, 256-bit big-endian targets, retargeting every
//! `retarget_interval` blocks toward `target_spacing` seconds per block.

use crate::consensus::ConsensusParams;
use crate::crypto::Hash;

/// Maximum adjustment factor (4x in either direction per period)
const MAX_ADJUSTMENT_FACTOR: u64 = 4;

/// Big-endian 256-bit target
pub type Target = [u8; 32];

/// Bits expected for the block following a tip.
///
/// `period_start_time` is the timestamp of the first block of the
/// adjustment period ending at the tip.
pub fn next_bits(
    params: &ConsensusParams,
    tip_height: u64,
    tip_bits: u32,
    tip_time: u64,
    period_start_time: u64,
) -> u32 {
    let next_height = tip_height + 1;
    if !should_adjust_difficulty(params, next_height) {
        return tip_bits;
    }
    calculate_next_difficulty(params, tip_bits, period_start_time, tip_time)
}

/// Check if difficulty should be adjusted at this height
pub fn should_adjust_difficulty(params: &ConsensusParams, height: u64) -> bool {
    height > 0 && height % params.retarget_interval == 0
}

/// Calculate the new compact target from the time the last period took
pub fn calculate_next_difficulty(
    params: &ConsensusParams,
    current_bits: u32,
    first_block_time: u64,
    last_block_time: u64,
) -> u32 {
    let expected_time = params.target_spacing * params.retarget_interval;
    let actual_time = last_block_time
        .saturating_sub(first_block_time)
        .clamp(expected_time / MAX_ADJUSTMENT_FACTOR, expected_time * MAX_ADJUSTMENT_FACTOR);

    let current = compact_to_target(current_bits);
    let new_target = match multiply_target(&current, actual_time) {
        Some(scaled) => divide_target(&scaled, expected_time),
        None => return params.pow_limit_bits,
    };

    let limit = compact_to_target(params.pow_limit_bits);
    if new_target > limit {
        return params.pow_limit_bits;
    }
    target_to_compact(&new_target)
}

/// True when the hash, read big-endian, does not exceed the target
pub fn check_proof_of_work(hash: &Hash, bits: u32) -> bool {
    let target = compact_to_target(bits);
    if target == [0u8; 32] {
        return false;
    }
    hash.0 <= target
}

/// Approximate work represented by a block at `bits`: 2^128 / (top half of target + 1)
pub fn block_work(bits: u32) -> u128 {
    let target = compact_to_target(bits);
    let mut high = [0u8; 16];
    high.copy_from_slice(&target[..16]);
    let high = u128::from_be_bytes(high);
    match high.checked_add(1) {
        Some(divisor) => (u128::MAX / divisor).max(1),
        None => 1,
    }
}

/// Convert compact difficulty to a 256-bit target
pub fn compact_to_target(compact: u32) -> Target {
    let exponent = (compact >> 24) as usize;
    let mantissa = compact & 0x007F_FFFF;

    let mut target = [0u8; 32];

    // zero, negative, or overflowing encodings have no valid target
    if exponent == 0 || exponent > 32 || compact & 0x0080_0000 != 0 {
        return target;
    }

    if exponent <= 3 {
        let value = mantissa >> (8 * (3 - exponent));
        target[31] = (value & 0xFF) as u8;
        target[30] = ((value >> 8) & 0xFF) as u8;
        target[29] = ((value >> 16) & 0xFF) as u8;
    } else {
        let start = 32 - exponent;
        target[start] = ((mantissa >> 16) & 0xFF) as u8;
        if start + 1 < 32 {
            target[start + 1] = ((mantissa >> 8) & 0xFF) as u8;
        }
        if start + 2 < 32 {
            target[start + 2] = (mantissa & 0xFF) as u8;
        }
    }

    target
}

/// Convert a 256-bit target to compact difficulty
pub fn target_to_compact(target: &Target) -> u32 {
    let first_nonzero = match target.iter().position(|byte| *byte != 0) {
        Some(index) => index,
        None => return 0,
    };

    let mut exponent = (32 - first_nonzero) as u32;
    let byte_at = |i: usize| -> u32 { target.get(i).copied().unwrap_or(0) as u32 };
    let mut mantissa =
        (byte_at(first_nonzero) << 16) | (byte_at(first_nonzero + 1) << 8) | byte_at(first_nonzero + 2);

    // keep the sign bit clear
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        exponent += 1;
    }

    (exponent << 24) | mantissa
}

/// `None` on 256-bit overflow
fn multiply_target(target: &Target, factor: u64) -> Option<Target> {
    let mut result = [0u8; 32];
    let mut carry: u128 = 0;
    for i in (0..32).rev() {
        let value = target[i] as u128 * factor as u128 + carry;
        result[i] = (value & 0xFF) as u8;
        carry = value >> 8;
    }
    if carry != 0 {
        return None;
    }
    Some(result)
}

fn divide_target(target: &Target, divisor: u64) -> Target {
    let mut result = [0u8; 32];
    let mut remainder: u128 = 0;
    for i in 0..32 {
        remainder = (remainder << 8) | target[i] as u128;
        result[i] = (remainder / divisor as u128) as u8;
        remainder %= divisor as u128;
    }
    result
}
