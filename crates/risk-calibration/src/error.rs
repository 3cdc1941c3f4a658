//! Error types for the risk calibration engine.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] ::config::ConfigError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Equity must be positive, got {0}")]
    InvalidEquity(Decimal),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("API error: {message}")]
    Api { message: String, status: Option<u16> },
}

pub type Result<T> = std::result::Result<T, CalibrationError>;
