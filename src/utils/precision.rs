// src/utils/precision.rs
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Rounds a share amount to a whole number of shares, ties away from zero.
/// Example: 12.5 -> 13, -12.5 -> -13, 12.4999 -> 12.
/// Saturates at the i64 range.
pub fn round_shares(shares: Decimal) -> i64 {
    let rounded = shares.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    rounded.to_i64().unwrap_or(if rounded.is_sign_negative() {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// Clamps a signed share count to `[-cap, +cap]`.
pub fn clamp_shares(shares: i64, cap: u32) -> i64 {
    let cap = i64::from(cap);
    shares.clamp(-cap, cap)
}
