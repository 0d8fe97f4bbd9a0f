use crate::error::Precondition;
use rust_decimal::{
    Decimal,
    prelude::ToPrimitive,
};
use std::str::FromStr;

/// Decimal places of the Fuel base asset.
pub const FUEL_BASE_DECIMALS: u32 = 9;
/// Largest unit scale whose `10^decimals` still fits a `u64`.
pub const MAX_DECIMALS: u32 = 18;
/// Smallest stake increment offered by the stake input (0.001).
pub const MIN_STAKE_STEP: Decimal = Decimal::from_parts(1, 0, 0, false, 3);
/// Stake pre-filled in the input (0.01).
pub const DEFAULT_STAKE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Converts a display amount into base units without rounding.
///
/// Amounts carrying more fractional digits than the unit can represent are
/// rejected rather than truncated.
pub fn to_base_units(amount: Decimal, decimals: u32) -> Result<u64, Precondition> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(Precondition::StakeOutOfRange(amount.to_string()));
    }
    let normalized = amount.normalize();
    if normalized.scale() > decimals {
        return Err(Precondition::StakeTooPrecise {
            stake: normalized.to_string(),
            decimals,
        });
    }
    let factor = unit_factor(decimals)
        .ok_or_else(|| Precondition::StakeOutOfRange(amount.to_string()))?;
    normalized
        .checked_mul(factor)
        .and_then(|scaled| scaled.to_u64())
        .ok_or_else(|| Precondition::StakeOutOfRange(amount.to_string()))
}

/// Converts base units into a normalized display amount. `None` when the unit
/// scale is beyond `MAX_DECIMALS`.
pub fn from_base_units(units: u64, decimals: u32) -> Option<Decimal> {
    if decimals > MAX_DECIMALS {
        return None;
    }
    Decimal::try_from_i128_with_scale(i128::from(units), decimals)
        .ok()
        .map(|amount| amount.normalize())
}

fn unit_factor(decimals: u32) -> Option<Decimal> {
    if decimals > MAX_DECIMALS {
        return None;
    }
    10u64.checked_pow(decimals).map(Decimal::from)
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum StakeInputError {
    #[error("'{0}' is not a decimal amount")]
    NotANumber(String),
    #[error("stake cannot be negative")]
    Negative,
}

/// Parses user-typed stake text. An empty field reads as zero.
pub fn parse_stake(input: &str) -> Result<Decimal, StakeInputError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Decimal::ZERO);
    }
    let value = Decimal::from_str(trimmed)
        .map_err(|_| StakeInputError::NotANumber(trimmed.to_string()))?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(StakeInputError::Negative);
    }
    Ok(value.normalize())
}

pub fn step_up(stake: Decimal) -> Decimal {
    stake.saturating_add(MIN_STAKE_STEP)
}

pub fn step_down(stake: Decimal) -> Decimal {
    let lowered = stake - MIN_STAKE_STEP;
    if lowered.is_sign_negative() {
        Decimal::ZERO
    } else {
        lowered
    }
}
