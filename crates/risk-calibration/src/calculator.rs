//! Conversion of a risk profile into concrete limits.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{CalibrationError, Result};
use crate::types::{LimitFloors, RiskLimits, RiskProfile};

/// Round a money value to cents, half away from zero.
///
/// Every limit in the engine goes through this function so the rounding rule
/// stays uniform.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Compute limits for `equity` under `profile`.
///
/// Values are rounded first and floored second, so a raw value that rounds
/// below its floor is replaced by the floor.
pub fn calculate_limits(
    equity: Decimal,
    profile: &RiskProfile,
    floors: &LimitFloors,
) -> Result<RiskLimits> {
    if equity <= Decimal::ZERO {
        return Err(CalibrationError::InvalidEquity(equity));
    }

    let mut limits = RiskLimits {
        loss_per_bot: round_money(equity * profile.loss_bot_pct),
        loss_global: round_money(equity * profile.loss_global_pct),
        max_position_global: round_money(equity * profile.global_exposure_pct),
        max_position_per_bot: round_money(equity * profile.bot_exposure_pct),
        trade_size: round_money(equity * profile.trade_size_pct),
    };
    floors.enforce(&mut limits);

    Ok(limits)
}
