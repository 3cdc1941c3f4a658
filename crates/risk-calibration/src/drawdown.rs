//! Drawdown-based dampening of risk limits.
//!
//! The ratio of current equity to the persisted peak selects a band; deeper
//! bands shrink trade size and global exposure. Floors are re-applied after
//! scaling so dampening can never push a limit below its minimum.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::calculator::round_money;
use crate::error::{CalibrationError, Result};
use crate::peak_store::PeakRecord;
use crate::types::{LimitFloors, RiskLimits};

/// Smallest representable positive ratio.
const MIN_RATIO: Decimal = Decimal::from_parts(1, 0, 0, false, 28);

/// Severity of the current drawdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DrawdownBand {
    Normal,
    Moderate,
    Critical,
}

impl fmt::Display for DrawdownBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DrawdownBand::Normal => "NORMAL",
            DrawdownBand::Moderate => "MODERATE",
            DrawdownBand::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// Band thresholds and multipliers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawdownConfig {
    /// Ratios strictly below this are critical.
    pub critical_ratio: Decimal,
    /// Ratios strictly below this (and not critical) are moderate.
    pub moderate_ratio: Decimal,
    pub critical_trade_multiplier: Decimal,
    pub critical_global_multiplier: Decimal,
    pub moderate_trade_multiplier: Decimal,
}

impl Default for DrawdownConfig {
    fn default() -> Self {
        Self {
            critical_ratio: Decimal::new(85, 2),
            moderate_ratio: Decimal::new(92, 2),
            critical_trade_multiplier: Decimal::new(60, 2),
            critical_global_multiplier: Decimal::new(65, 2),
            moderate_trade_multiplier: Decimal::new(78, 2),
        }
    }
}

impl DrawdownConfig {
    pub fn validate(&self) -> Result<()> {
        if !(Decimal::ZERO < self.critical_ratio
            && self.critical_ratio < self.moderate_ratio
            && self.moderate_ratio <= Decimal::ONE)
        {
            return Err(CalibrationError::Config {
                message: format!(
                    "drawdown ratios must satisfy 0 < critical ({}) < moderate ({}) <= 1",
                    self.critical_ratio, self.moderate_ratio
                ),
            });
        }

        let multipliers = [
            self.critical_trade_multiplier,
            self.critical_global_multiplier,
            self.moderate_trade_multiplier,
        ];
        if multipliers
            .iter()
            .any(|m| *m <= Decimal::ZERO || *m > Decimal::ONE)
        {
            return Err(CalibrationError::Config {
                message: "drawdown multipliers must be in (0, 1]".to_string(),
            });
        }

        Ok(())
    }

    /// Classify an equity/peak ratio. Boundaries are exclusive on the lower band.
    pub fn band(&self, ratio: Decimal) -> DrawdownBand {
        if ratio < self.critical_ratio {
            DrawdownBand::Critical
        } else if ratio < self.moderate_ratio {
            DrawdownBand::Moderate
        } else {
            DrawdownBand::Normal
        }
    }
}

/// Result of a drawdown pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawdownOutcome {
    pub limits: RiskLimits,
    pub band: DrawdownBand,
    /// `equity / peak`, in (0, 1].
    pub ratio: Decimal,
    /// Peak the ratio was measured against.
    pub peak_before: Decimal,
    /// `max(peak_before, equity)`; this is what gets persisted.
    pub peak_after: PeakRecord,
}

/// Scale `limits` for the current drawdown and compute the next peak.
///
/// A missing peak is seeded with the current equity, which yields a ratio of 1
/// and the normal band.
pub fn apply_drawdown(
    equity: Decimal,
    limits: RiskLimits,
    peak: Option<&PeakRecord>,
    config: &DrawdownConfig,
    floors: &LimitFloors,
) -> Result<DrawdownOutcome> {
    if equity <= Decimal::ZERO {
        return Err(CalibrationError::InvalidEquity(equity));
    }

    let peak_before = match peak {
        Some(record) => record.peak_equity,
        None => {
            info!(equity = %equity, "No stored peak, seeding with current equity");
            equity
        }
    };

    // equity far above a tiny peak overflows the quotient; that is no drawdown
    let ratio = equity
        .checked_div(peak_before)
        .unwrap_or(Decimal::ONE)
        .clamp(MIN_RATIO, Decimal::ONE);
    let band = config.band(ratio);

    let mut scaled = limits;
    match band {
        DrawdownBand::Critical => {
            scaled.trade_size = round_money(scaled.trade_size * config.critical_trade_multiplier);
            scaled.max_position_global =
                round_money(scaled.max_position_global * config.critical_global_multiplier);
            warn!(
                drawdown_pct = %round_money((Decimal::ONE - ratio) * Decimal::ONE_HUNDRED),
                peak = %peak_before,
                equity = %equity,
                "Critical drawdown, cutting trade size and global exposure"
            );
        }
        DrawdownBand::Moderate => {
            scaled.trade_size = round_money(scaled.trade_size * config.moderate_trade_multiplier);
            info!(
                drawdown_pct = %round_money((Decimal::ONE - ratio) * Decimal::ONE_HUNDRED),
                peak = %peak_before,
                equity = %equity,
                "Moderate drawdown, reducing trade size"
            );
        }
        DrawdownBand::Normal => {
            debug!(ratio = %ratio, "Drawdown within normal band");
        }
    }
    floors.enforce(&mut scaled);

    let peak_after = PeakRecord {
        peak_equity: peak_before.max(equity),
    };

    Ok(DrawdownOutcome {
        limits: scaled,
        band,
        ratio,
        peak_before,
        peak_after,
    })
}
