//! Integer fixed-point helpers.
//!
//! Ratios are `u128` over [`PRECISE_UNIT`]; amounts are `u64` base units.
//! Every helper rounds down and returns `None` on overflow or a zero
//! denominator so callers can map the failure into their own error type.

use primitive_types::U256;

use crate::constants::{BPS_PRECISION, PRECISE_UNIT};

/// `a * b / denom` rounded down, with a 256-bit intermediate product.
///
/// Fails only when `denom` is zero or the quotient itself exceeds `u128`.
///
/// # Examples
///
/// ```
/// use tally_core::math::mul_div;
/// assert_eq!(mul_div(10, 3, 4), Some(7));
/// assert_eq!(mul_div(u128::MAX, 2, 4), Some(u128::MAX / 2));
/// assert_eq!(mul_div(u128::MAX, u128::MAX, u128::MAX), Some(u128::MAX));
/// assert_eq!(mul_div(1, 1, 0), None);
/// ```
pub fn mul_div(a: u128, b: u128, denom: u128) -> Option<u128> {
    if denom == 0 {
        return None;
    }
    if let Some(product) = a.checked_mul(b) {
        return Some(product / denom);
    }
    // Two u128 operands never overflow 256 bits.
    let quotient = U256::from(a) * U256::from(b) / U256::from(denom);
    (quotient.bits() <= 128).then(|| quotient.low_u128())
}

/// `part / whole` as a [`PRECISE_UNIT`] ratio.
///
/// # Examples
///
/// ```
/// use tally_core::constants::PRECISE_UNIT;
/// use tally_core::math::ratio_of;
/// assert_eq!(ratio_of(1, 4), Some(PRECISE_UNIT / 4));
/// assert_eq!(ratio_of(1, 0), None);
/// ```
pub fn ratio_of(part: u64, whole: u64) -> Option<u128> {
    mul_div(part as u128, PRECISE_UNIT, whole as u128)
}

/// Scale `amount` by a [`PRECISE_UNIT`] ratio.
///
/// # Examples
///
/// ```
/// use tally_core::constants::PRECISE_UNIT;
/// use tally_core::math::apply_ratio;
/// assert_eq!(apply_ratio(500_000, PRECISE_UNIT * 2 / 5), Some(200_000));
/// ```
pub fn apply_ratio(amount: u64, ratio: u128) -> Option<u64> {
    let scaled = mul_div(amount as u128, ratio, PRECISE_UNIT)?;
    u64::try_from(scaled).ok()
}

/// Scale `amount` by a basis-point multiplier.
///
/// # Examples
///
/// ```
/// use tally_core::math::apply_bps;
/// assert_eq!(apply_bps(120_000, 7_500), Some(90_000));
/// ```
pub fn apply_bps(amount: u64, bps: u64) -> Option<u64> {
    let scaled = mul_div(amount as u128, bps as u128, BPS_PRECISION as u128)?;
    u64::try_from(scaled).ok()
}

/// Convert `amount` priced at `from_price` into units priced at `to_price`.
pub fn convert(amount: u64, from_price: u64, to_price: u64) -> Option<u64> {
    let converted = mul_div(amount as u128, from_price as u128, to_price as u128)?;
    u64::try_from(converted).ok()
}
