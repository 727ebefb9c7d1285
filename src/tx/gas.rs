//! Legacy gas price bumping

use ethers::types::{I256, U256};

/// Percentage added to the gas price on every attempt, multiplied by the attempt number
pub const PRIORITY_COEFFICIENT: u64 = 15;

/// Broadcasts made for a record before giving up (one initial, then bumps)
pub const MAX_ATTEMPTS: u64 = 5;

/// `price + floor(price * percent / 100)`; an absent price counts as zero.
pub fn bump_gas_price(gas_price: Option<I256>, percent: u64) -> I256 {
    let price = match gas_price {
        Some(price) => price,
        None => return I256::zero(),
    };

    let hundred = I256::from_raw(U256::from(100u64));
    let product = price * I256::from_raw(U256::from(percent));

    // Division truncates toward zero; step down once more for inexact negatives
    let mut increment = product / hundred;
    if product.is_negative() && increment * hundred != product {
        increment = increment - I256::one();
    }

    price + increment
}

/// Unsigned convenience over [`bump_gas_price`]
pub fn bump_u256(gas_price: U256, percent: u64) -> U256 {
    bump_gas_price(Some(I256::from_raw(gas_price)), percent).into_raw()
}

/// Price for `attempt` (1-based): the larger of the previous broadcast price and the
/// currently suggested price, bumped by `PRIORITY_COEFFICIENT * attempt` percent.
pub fn next_gas_price(previous: Option<U256>, suggested: U256, attempt: u64) -> U256 {
    let percent = PRIORITY_COEFFICIENT * attempt;
    let from_suggested = bump_u256(suggested, percent);

    match previous {
        Some(previous) => std::cmp::max(bump_u256(previous, percent), from_suggested),
        None => from_suggested,
    }
}
