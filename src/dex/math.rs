//! Constant-product AMM math and the override-leg scaling used by route quotes.

use anyhow::{anyhow, Result};
use num_bigint::BigUint;
use num_traits::ToPrimitive;

pub const FEE_DENOMINATOR_BPS: u64 = 10_000;

/// Output of an exact-in swap against `x * y = k` reserves, fee taken from the input.
pub fn constant_product_output(
    input_amount: u64,
    input_reserve: u64,
    output_reserve: u64,
    fee_bps: u16,
) -> Result<u64> {
    if input_reserve == 0 || output_reserve == 0 {
        return Err(anyhow!("Pool has no liquidity"));
    }
    if input_amount == 0 {
        return Err(anyhow!("Input amount cannot be zero"));
    }
    if u64::from(fee_bps) >= FEE_DENOMINATOR_BPS {
        return Err(anyhow!("Invalid fee: {} bps", fee_bps));
    }

    let input_big = BigUint::from(input_amount);
    let input_reserve_big = BigUint::from(input_reserve);
    let output_reserve_big = BigUint::from(output_reserve);

    let fee_amount = (&input_big * BigUint::from(fee_bps)) / BigUint::from(FEE_DENOMINATOR_BPS);
    let input_after_fee = &input_big - &fee_amount;

    // output = y * dx / (x + dx)
    let numerator = &output_reserve_big * &input_after_fee;
    let denominator = &input_reserve_big + &input_after_fee;
    let output_amount = numerator / denominator;

    output_amount
        .to_u64()
        .ok_or_else(|| anyhow!("Output calculation overflow"))
}

/// Output for a leg that replays a known victim trade instead of quoting
/// fresh pool state: the observed `estimated_out / input` ratio applied to
/// `amount`, less the pool fee charged twice (victim trade and backrun).
pub fn override_output(amount: u64, input: u64, estimated_out: u64, fee_bps: u16) -> u64 {
    if input == 0 || amount == 0 {
        return 0;
    }
    let estimated_out = u128::from(estimated_out);
    let double_fee = u128::from(fee_bps) * 2;
    let after_fees =
        estimated_out.saturating_sub(estimated_out * double_fee / u128::from(FEE_DENOMINATOR_BPS));
    let out = u128::from(amount) * after_fees / u128::from(input);
    u64::try_from(out).unwrap_or(u64::MAX)
}
