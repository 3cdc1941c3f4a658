//! Risk Calibration
//!
//! Bankroll discovery, tiered position sizing, drawdown dampening and
//! high-water-mark persistence for the trading arena.

pub mod bankroll;
pub mod calculator;
pub mod config;
pub mod drawdown;
pub mod error;
pub mod kelly;
pub mod orchestrator;
pub mod params;
pub mod peak_store;
pub mod tier;
pub mod types;

pub use bankroll::{BalanceEndpoint, BankrollConfig, BankrollResolver, HttpBalanceEndpoint, LogScanConfig};
pub use calculator::{calculate_limits, round_money};
pub use config::{CadenceConfig, CalibrationConfig};
pub use drawdown::{apply_drawdown, DrawdownBand, DrawdownConfig, DrawdownOutcome};
pub use error::{CalibrationError, Result};
pub use kelly::KellyConfig;
pub use orchestrator::{engine_status, render_status_line, CalibrationEngine, CycleReport};
pub use params::{EnvFileSink, NoopSink, ParameterSet, ParameterSink, TradingWindowConfig};
pub use peak_store::{PeakGuard, PeakRecord, PeakStore};
pub use tier::{TierRow, TierTable};
pub use types::{
    AccountSnapshot, BankrollSource, EngineStatus, LimitFloors, ResolveStatus, ResolvedBankroll,
    RiskLimits, RiskProfile, Tier,
};
