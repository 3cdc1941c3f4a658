//! Equity-threshold tier classification.
//!
//! Tiers live in a table of `(upper_bound, profile)` rows scanned in order.
//! Equity strictly below a row's bound selects that row; the final row has no
//! bound and catches everything above. Adding a tier is a table change.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, Result};
use crate::types::{RiskProfile, Tier};

/// One row of the tier table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRow {
    /// Exclusive upper bound. `None` only on the last row.
    pub upper_bound: Option<Decimal>,
    pub profile: RiskProfile,
}

/// Ordered, validated tier table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TierRow>", into = "Vec<TierRow>")]
pub struct TierTable {
    rows: Vec<TierRow>,
}

impl TierTable {
    /// Build a table, checking that bounds strictly increase and that only the
    /// last row is unbounded.
    pub fn new(rows: Vec<TierRow>) -> Result<Self> {
        let Some((last, bounded)) = rows.split_last() else {
            return Err(CalibrationError::Config {
                message: "tier table must have at least one row".to_string(),
            });
        };

        if last.upper_bound.is_some() {
            return Err(CalibrationError::Config {
                message: format!("last tier ({}) must be unbounded", last.profile.name),
            });
        }

        let mut previous: Option<Decimal> = None;
        for row in bounded {
            let bound = row.upper_bound.ok_or_else(|| CalibrationError::Config {
                message: format!("tier {} is unbounded but not last", row.profile.name),
            })?;
            if bound <= Decimal::ZERO {
                return Err(CalibrationError::Config {
                    message: format!("tier {} bound must be positive", row.profile.name),
                });
            }
            if let Some(prev) = previous {
                if bound <= prev {
                    return Err(CalibrationError::Config {
                        message: format!(
                            "tier bounds must strictly increase ({} after {})",
                            bound, prev
                        ),
                    });
                }
            }
            previous = Some(bound);
        }

        Ok(Self { rows })
    }

    /// Select the profile for an equity value.
    pub fn classify(&self, equity: Decimal) -> &RiskProfile {
        self.rows
            .iter()
            .find(|row| row.upper_bound.is_none_or(|bound| equity < bound))
            .map(|row| &row.profile)
            // new() guarantees an unbounded final row
            .unwrap_or_else(|| &self.rows[self.rows.len() - 1].profile)
    }

    /// Look up the profile attached to a tier name.
    pub fn profile(&self, tier: Tier) -> Option<&RiskProfile> {
        self.rows
            .iter()
            .map(|row| &row.profile)
            .find(|profile| profile.name == tier)
    }

    pub fn rows(&self) -> &[TierRow] {
        &self.rows
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            rows: vec![
                TierRow {
                    upper_bound: Some(Decimal::new(10, 0)),
                    profile: RiskProfile {
                        name: Tier::UltraSafe,
                        trade_size_pct: Decimal::new(20, 3),      // 2.0%
                        bot_exposure_pct: Decimal::new(10, 2),    // 10%
                        global_exposure_pct: Decimal::new(40, 2), // 40%
                        loss_bot_pct: Decimal::new(10, 2),        // 10%
                        loss_global_pct: Decimal::new(50, 2),     // 50%
                    },
                },
                TierRow {
                    upper_bound: Some(Decimal::new(25, 0)),
                    profile: RiskProfile {
                        name: Tier::Conservative,
                        trade_size_pct: Decimal::new(23, 3),      // 2.3%
                        bot_exposure_pct: Decimal::new(12, 2),    // 12%
                        global_exposure_pct: Decimal::new(50, 2), // 50%
                        loss_bot_pct: Decimal::new(10, 2),        // 10%
                        loss_global_pct: Decimal::new(50, 2),     // 50%
                    },
                },
                TierRow {
                    upper_bound: None,
                    profile: RiskProfile {
                        name: Tier::Balanced,
                        trade_size_pct: Decimal::new(32, 3),      // 3.2%
                        bot_exposure_pct: Decimal::new(15, 2),    // 15%
                        global_exposure_pct: Decimal::new(60, 2), // 60%
                        loss_bot_pct: Decimal::new(12, 2),        // 12%
                        loss_global_pct: Decimal::new(50, 2),     // 50%
                    },
                },
            ],
        }
    }
}

impl TryFrom<Vec<TierRow>> for TierTable {
    type Error = CalibrationError;

    fn try_from(rows: Vec<TierRow>) -> Result<Self> {
        Self::new(rows)
    }
}

impl From<TierTable> for Vec<TierRow> {
    fn from(table: TierTable) -> Self {
        table.rows
    }
}
