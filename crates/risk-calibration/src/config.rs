//! Configuration for the calibration engine.
//!
//! `from_env` reads flat `ARENA_*` variables (after loading `.env`).
//! `from_file` layers a TOML/JSON/YAML file under nested
//! `ARENA_<SECTION>__<KEY>` overrides. Both validate before returning.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::bankroll::{BankrollConfig, LogScanConfig};
use crate::drawdown::DrawdownConfig;
use crate::error::{CalibrationError, Result};
use crate::kelly::KellyConfig;
use crate::params::TradingWindowConfig;
use crate::tier::TierTable;
use crate::types::LimitFloors;

/// Loop timing for long-running mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Seconds between full recalibrations.
    pub slow_interval_secs: u64,
    /// Milliseconds between status refreshes.
    pub fast_interval_ms: u64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            slow_interval_secs: 120,
            fast_interval_ms: 1000,
        }
    }
}

impl CadenceConfig {
    pub fn slow_interval(&self) -> Duration {
        Duration::from_secs(self.slow_interval_secs)
    }

    pub fn fast_interval(&self) -> Duration {
        Duration::from_millis(self.fast_interval_ms)
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub bankroll: BankrollConfig,
    pub peak_file: PathBuf,
    pub floors: LimitFloors,
    pub tiers: TierTable,
    pub drawdown: DrawdownConfig,
    pub kelly: KellyConfig,
    pub trading: TradingWindowConfig,
    pub cadence: CadenceConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            bankroll: BankrollConfig::default(),
            peak_file: PathBuf::from("arena_peak.json"),
            floors: LimitFloors::default(),
            tiers: TierTable::default(),
            drawdown: DrawdownConfig::default(),
            kelly: KellyConfig::default(),
            trading: TradingWindowConfig::default(),
            cadence: CadenceConfig::default(),
        }
    }
}

impl CalibrationConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let bankroll_defaults = defaults.bankroll;
        let log_defaults = bankroll_defaults.log_scan;

        let config = Self {
            bankroll: BankrollConfig {
                base_url: env::var("ARENA_API_BASE_URL").unwrap_or(bankroll_defaults.base_url),
                paths: env::var("ARENA_API_PATHS")
                    .ok()
                    .map(|raw| {
                        raw.split(',')
                            .map(str::trim)
                            .filter(|p| !p.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or(bankroll_defaults.paths),
                timeout_ms: env_or("ARENA_HTTP_TIMEOUT_MS", bankroll_defaults.timeout_ms),
                log_scan: LogScanConfig {
                    enabled: env::var("ARENA_LOG_SCAN_ENABLED")
                        .map(|v| v != "false")
                        .unwrap_or(log_defaults.enabled),
                    dir: env::var("ARENA_LOG_DIR")
                        .map(PathBuf::from)
                        .unwrap_or(log_defaults.dir),
                    prefix: env::var("ARENA_LOG_PREFIX").unwrap_or(log_defaults.prefix),
                    extension: env::var("ARENA_LOG_EXTENSION").unwrap_or(log_defaults.extension),
                    tail_lines: env_or("ARENA_LOG_TAIL_LINES", log_defaults.tail_lines),
                    max_tail_bytes: env_or("ARENA_LOG_TAIL_BYTES", log_defaults.max_tail_bytes),
                },
                fallback_bankroll: env_or(
                    "ARENA_FALLBACK_BANKROLL",
                    bankroll_defaults.fallback_bankroll,
                ),
            },
            peak_file: env::var("ARENA_PEAK_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.peak_file),
            floors: LimitFloors {
                trade_size: env_or("ARENA_FLOOR_TRADE_SIZE", defaults.floors.trade_size),
                max_position_per_bot: env_or(
                    "ARENA_FLOOR_POSITION_PER_BOT",
                    defaults.floors.max_position_per_bot,
                ),
                max_position_global: env_or(
                    "ARENA_FLOOR_POSITION_GLOBAL",
                    defaults.floors.max_position_global,
                ),
            },
            tiers: defaults.tiers,
            drawdown: defaults.drawdown,
            kelly: KellyConfig {
                base_fraction: env_or("ARENA_KELLY_FRACTION", defaults.kelly.base_fraction),
                max_drawdown: env_or("ARENA_KELLY_MAX_DRAWDOWN", defaults.kelly.max_drawdown),
            },
            trading: TradingWindowConfig {
                max_open_trades: env_or("ARENA_MAX_OPEN_TRADES", defaults.trading.max_open_trades),
                min_time_to_expiry_secs: env_or(
                    "ARENA_MIN_TTE_SECONDS",
                    defaults.trading.min_time_to_expiry_secs,
                ),
                max_time_to_expiry_secs: env_or(
                    "ARENA_MAX_TTE_SECONDS",
                    defaults.trading.max_time_to_expiry_secs,
                ),
            },
            cadence: CadenceConfig {
                slow_interval_secs: env_or(
                    "ARENA_SLOW_INTERVAL_SECS",
                    defaults.cadence.slow_interval_secs,
                ),
                fast_interval_ms: env_or("ARENA_FAST_INTERVAL_MS", defaults.cadence.fast_interval_ms),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Load a config file, with `ARENA_<SECTION>__<KEY>` variables on top.
    pub fn from_file(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix("ARENA")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings and flag suspicious ones.
    pub fn validate(&self) -> Result<()> {
        if self.bankroll.fallback_bankroll <= Decimal::ZERO {
            return Err(CalibrationError::Config {
                message: "fallback bankroll must be positive".to_string(),
            });
        }
        if self.bankroll.timeout_ms == 0 {
            return Err(CalibrationError::Config {
                message: "HTTP timeout must be non-zero".to_string(),
            });
        }
        if self.bankroll.log_scan.tail_lines == 0 || self.bankroll.log_scan.max_tail_bytes == 0 {
            return Err(CalibrationError::Config {
                message: "log tail bounds must be non-zero".to_string(),
            });
        }
        let floors = [
            self.floors.trade_size,
            self.floors.max_position_per_bot,
            self.floors.max_position_global,
        ];
        if floors.iter().any(|f| *f < Decimal::ZERO) {
            return Err(CalibrationError::Config {
                message: "limit floors must be non-negative".to_string(),
            });
        }
        if self.cadence.slow_interval_secs == 0 || self.cadence.fast_interval_ms == 0 {
            return Err(CalibrationError::Config {
                message: "cadence intervals must be non-zero".to_string(),
            });
        }

        self.drawdown.validate()?;
        self.kelly.validate()?;
        self.trading.validate()?;

        // Global loss has been documented as 15% but configured as 50%; the
        // configured value is used until the owner settles it.
        for row in self.tiers.rows() {
            if row.profile.loss_global_pct >= Decimal::new(50, 2) {
                warn!(
                    tier = %row.profile.name,
                    loss_global_pct = %row.profile.loss_global_pct,
                    "Global daily loss limit is 50% or more of equity; confirm with the risk owner"
                );
            }
        }

        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
