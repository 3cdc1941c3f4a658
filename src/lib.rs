//! Arena Risk: bankroll-driven risk calibration
//!
//! This is the root crate that provides benchmark and integration-test access
//! to the workspace crates:
//!
//! - `risk-calibration`: bankroll resolution, tiers, limits, drawdown, peak store
//! - `calibrator`: command-line driver (`once`, `watch`, `peak`)

// Re-export for benchmarks
pub use risk_calibration as calibration;
