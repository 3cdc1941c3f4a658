//! The emitted parameter set and the ways it reaches the trading process.
//!
//! The engine never touches the process environment. It produces a
//! [`ParameterSet`]; a [`ParameterSink`] decides how to deliver it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{CalibrationError, Result};
use crate::types::{EngineStatus, RiskLimits};

/// Static trading-window settings emitted alongside the computed limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingWindowConfig {
    pub max_open_trades: u32,
    pub min_time_to_expiry_secs: u64,
    pub max_time_to_expiry_secs: u64,
}

impl Default for TradingWindowConfig {
    fn default() -> Self {
        Self {
            max_open_trades: 5,
            min_time_to_expiry_secs: 21_600,   // 6 hours
            max_time_to_expiry_secs: 3_888_000, // 45 days
        }
    }
}

impl TradingWindowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_open_trades == 0 {
            return Err(CalibrationError::Config {
                message: "max_open_trades must be at least 1".to_string(),
            });
        }
        if self.min_time_to_expiry_secs > self.max_time_to_expiry_secs {
            return Err(CalibrationError::Config {
                message: format!(
                    "min time to expiry ({}) exceeds max ({})",
                    self.min_time_to_expiry_secs, self.max_time_to_expiry_secs
                ),
            });
        }
        Ok(())
    }
}

/// Configuration handed to the trading process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ParameterSet {
    pub daily_loss_limit_per_bot: Decimal,
    pub daily_loss_limit_global: Decimal,
    pub max_position_global: Decimal,
    pub max_position_per_bot: Decimal,
    pub trade_max_size: Decimal,
    pub max_open_trades: u32,
    pub min_time_to_expiry_seconds: u64,
    pub max_time_to_expiry_seconds: u64,
    pub kelly_fraction: Decimal,
    pub risk_status: EngineStatus,
}

impl ParameterSet {
    pub fn new(
        limits: &RiskLimits,
        window: &TradingWindowConfig,
        kelly_fraction: Decimal,
        risk_status: EngineStatus,
    ) -> Self {
        Self {
            daily_loss_limit_per_bot: limits.loss_per_bot,
            daily_loss_limit_global: limits.loss_global,
            max_position_global: limits.max_position_global,
            max_position_per_bot: limits.max_position_per_bot,
            trade_max_size: limits.trade_size,
            max_open_trades: window.max_open_trades,
            min_time_to_expiry_seconds: window.min_time_to_expiry_secs,
            max_time_to_expiry_seconds: window.max_time_to_expiry_secs,
            kelly_fraction,
            risk_status,
        }
    }

    /// Named parameters in a stable order.
    pub fn to_env_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("DAILY_LOSS_LIMIT_PER_BOT", self.daily_loss_limit_per_bot.to_string()),
            ("DAILY_LOSS_LIMIT_GLOBAL", self.daily_loss_limit_global.to_string()),
            ("MAX_POSITION_GLOBAL", self.max_position_global.to_string()),
            ("MAX_POSITION_PER_BOT", self.max_position_per_bot.to_string()),
            ("TRADE_MAX_SIZE", self.trade_max_size.to_string()),
            ("MAX_OPEN_TRADES", self.max_open_trades.to_string()),
            ("MIN_TIME_TO_EXPIRY_SECONDS", self.min_time_to_expiry_seconds.to_string()),
            ("MAX_TIME_TO_EXPIRY_SECONDS", self.max_time_to_expiry_seconds.to_string()),
            ("KELLY_FRACTION", self.kelly_fraction.to_string()),
            ("RISK_STATUS", self.risk_status.to_string()),
        ]
    }

    /// `export KEY=VALUE` lines for a POSIX shell.
    pub fn render_exports(&self) -> String {
        self.to_env_pairs()
            .into_iter()
            .map(|(key, value)| format!("export {}={}\n", key, value))
            .collect()
    }

    /// Dotenv-format body.
    pub fn render_env_file(&self) -> String {
        self.to_env_pairs()
            .into_iter()
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect()
    }

    /// Atomically write a dotenv file for the trading process to load.
    pub fn write_env_file(&self, path: &Path) -> Result<()> {
        let mut name = path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("arena.env"));
        name.push(".tmp");
        let tmp = path.with_file_name(name);

        let mut file = fs::File::create(&tmp)?;
        file.write_all(self.render_env_file().as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Delivery step for freshly computed parameters.
pub trait ParameterSink: Send {
    fn apply(&mut self, params: &ParameterSet) -> Result<()>;
}

/// Writes every new parameter set to a dotenv file.
#[derive(Debug, Clone)]
pub struct EnvFileSink {
    path: PathBuf,
}

impl EnvFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ParameterSink for EnvFileSink {
    fn apply(&mut self, params: &ParameterSet) -> Result<()> {
        params.write_env_file(&self.path)?;
        info!(path = %self.path.display(), status = %params.risk_status, "Risk parameters written");
        Ok(())
    }
}

/// Discards parameters; used when only the report matters.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ParameterSink for NoopSink {
    fn apply(&mut self, _params: &ParameterSet) -> Result<()> {
        Ok(())
    }
}
