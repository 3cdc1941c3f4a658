//! Drawdown-aware Kelly fraction.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, Result};

/// Kelly sizing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KellyConfig {
    /// Fraction used with no drawdown (0.10 = tenth-Kelly).
    pub base_fraction: Decimal,
    /// Drawdown at which the fraction bottoms out.
    pub max_drawdown: Decimal,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            base_fraction: Decimal::new(10, 2),
            max_drawdown: Decimal::new(15, 2),
        }
    }
}

/// Smallest share of the base fraction that is ever emitted.
const MIN_SCALE: Decimal = Decimal::from_parts(1, 0, 0, false, 1); // 0.1

impl KellyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_fraction <= Decimal::ZERO || self.base_fraction > Decimal::ONE {
            return Err(CalibrationError::Config {
                message: format!("kelly base fraction {} not in (0, 1]", self.base_fraction),
            });
        }
        if self.max_drawdown <= Decimal::ZERO || self.max_drawdown >= Decimal::ONE {
            return Err(CalibrationError::Config {
                message: format!("kelly max drawdown {} not in (0, 1)", self.max_drawdown),
            });
        }
        Ok(())
    }

    /// Kelly fraction for the current drawdown from `peak`.
    ///
    /// Scales linearly from the full base fraction at no drawdown down to 10%
    /// of it at `max_drawdown`, and stays there beyond.
    pub fn fraction(&self, peak: Decimal, equity: Decimal) -> Decimal {
        if peak <= Decimal::ZERO {
            return self.base_fraction;
        }

        // only equity far above peak can overflow, which is no drawdown
        let drawdown = (peak - equity)
            .checked_div(peak)
            .unwrap_or(Decimal::ZERO)
            .max(Decimal::ZERO);
        if drawdown >= self.max_drawdown {
            return self.base_fraction * MIN_SCALE;
        }

        let used = drawdown / self.max_drawdown;
        let scale = (Decimal::ONE - used * Decimal::new(9, 1)).max(MIN_SCALE);
        (self.base_fraction * scale).round_dp(4)
    }
}
