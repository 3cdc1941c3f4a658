//! Core data types shared across the calibration pipeline.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Account value as reported by a bankroll source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Total account value (cash plus open positions).
    pub equity: Decimal,
    /// Free cash, when the source reports it.
    pub available: Option<Decimal>,
    /// Value tied up in open positions, when the source reports it.
    pub invested: Option<Decimal>,
}

impl AccountSnapshot {
    /// Snapshot carrying only a total equity figure.
    pub fn from_equity(equity: Decimal) -> Self {
        Self {
            equity,
            available: None,
            invested: None,
        }
    }

    /// Snapshot built from a cash + positions split.
    pub fn from_parts(available: Decimal, invested: Decimal) -> Self {
        Self {
            equity: available + invested,
            available: Some(available),
            invested: Some(invested),
        }
    }
}

/// Where a bankroll reading came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BankrollSource {
    /// A live HTTP endpoint.
    Endpoint { url: String },
    /// The tail of a local log file.
    LogTail { path: PathBuf },
    /// The configured constant. Never live data.
    Fallback,
}

impl fmt::Display for BankrollSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BankrollSource::Endpoint { url } => write!(f, "endpoint {}", url),
            BankrollSource::LogTail { path } => write!(f, "log {}", path.display()),
            BankrollSource::Fallback => write!(f, "fallback"),
        }
    }
}

/// Quality of a bankroll reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolveStatus {
    Live,
    /// Synthetic value; every source was exhausted.
    Degraded,
}

/// Result of a bankroll resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedBankroll {
    pub snapshot: AccountSnapshot,
    pub source: BankrollSource,
    pub status: ResolveStatus,
}

impl ResolvedBankroll {
    pub fn equity(&self) -> Decimal {
        self.snapshot.equity
    }

    pub fn is_degraded(&self) -> bool {
        self.status == ResolveStatus::Degraded
    }
}

/// Named risk bucket selected by equity thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    UltraSafe,
    Conservative,
    Balanced,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::UltraSafe => "ULTRA_SAFE",
            Tier::Conservative => "CONSERVATIVE",
            Tier::Balanced => "BALANCED",
        };
        f.write_str(name)
    }
}

/// Fixed percentage bundle attached to a tier.
///
/// All percentages are fractions of equity (0.02 = 2%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub name: Tier,
    pub trade_size_pct: Decimal,
    pub bot_exposure_pct: Decimal,
    pub global_exposure_pct: Decimal,
    pub loss_bot_pct: Decimal,
    pub loss_global_pct: Decimal,
}

/// Concrete per-cycle limits, in account currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub loss_per_bot: Decimal,
    pub loss_global: Decimal,
    pub max_position_global: Decimal,
    pub max_position_per_bot: Decimal,
    pub trade_size: Decimal,
}

/// Absolute minimums for the sizing limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitFloors {
    pub trade_size: Decimal,
    pub max_position_per_bot: Decimal,
    pub max_position_global: Decimal,
}

impl Default for LimitFloors {
    fn default() -> Self {
        Self {
            trade_size: Decimal::new(90, 2),            // $0.90
            max_position_per_bot: Decimal::new(200, 2), // $2.00
            max_position_global: Decimal::new(500, 2),  // $5.00
        }
    }
}

impl LimitFloors {
    /// Raise every floored limit to its minimum and clamp the rest at zero.
    pub fn enforce(&self, limits: &mut RiskLimits) {
        limits.trade_size = limits.trade_size.max(self.trade_size);
        limits.max_position_per_bot = limits.max_position_per_bot.max(self.max_position_per_bot);
        limits.max_position_global = limits.max_position_global.max(self.max_position_global);
        limits.loss_per_bot = limits.loss_per_bot.max(Decimal::ZERO);
        limits.loss_global = limits.loss_global.max(Decimal::ZERO);
    }
}

/// Operator-facing status of the engine after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineStatus {
    Normal,
    Moderate,
    Critical,
    /// Bankroll came from the constant fallback.
    Degraded,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineStatus::Normal => "NORMAL",
            EngineStatus::Moderate => "MODERATE",
            EngineStatus::Critical => "CRITICAL",
            EngineStatus::Degraded => "DEGRADED",
        };
        f.write_str(name)
    }
}
