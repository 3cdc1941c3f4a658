//! Bankroll discovery with a fallback chain.
//!
//! Sources are tried in order: each configured HTTP endpoint, then the newest
//! trading log, then a constant. Every per-source failure is recoverable; the
//! constant is always available, so resolution never fails. A reading from the
//! constant is marked [`ResolveStatus::Degraded`].

pub mod endpoint;
pub mod log_tail;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use endpoint::{extract_equity, BalanceEndpoint, HttpBalanceEndpoint};
pub use log_tail::LogScanConfig;

use crate::error::Result;
use crate::types::{AccountSnapshot, BankrollSource, ResolveStatus, ResolvedBankroll};

/// Sources consulted by the [`BankrollResolver`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BankrollConfig {
    pub base_url: String,
    /// Relative paths, tried in order.
    pub paths: Vec<String>,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    pub log_scan: LogScanConfig,
    /// Used when every other source is exhausted.
    pub fallback_bankroll: Decimal,
}

impl Default for BankrollConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8510".to_string(),
            paths: vec![
                "/api/bankroll".to_string(),
                "/api/portfolio".to_string(),
                "/api/balance".to_string(),
            ],
            timeout_ms: 3000,
            log_scan: LogScanConfig::default(),
            fallback_bankroll: Decimal::new(1306, 2), // $13.06
        }
    }
}

impl BankrollConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Full URLs in query order.
    pub fn urls(&self) -> Vec<String> {
        let base = self.base_url.trim_end_matches('/');
        self.paths
            .iter()
            .map(|path| {
                if path.starts_with("http://") || path.starts_with("https://") {
                    path.clone()
                } else {
                    format!("{}/{}", base, path.trim_start_matches('/'))
                }
            })
            .collect()
    }
}

/// Resolves current equity from the configured sources.
#[derive(Clone)]
pub struct BankrollResolver {
    endpoint: Arc<dyn BalanceEndpoint>,
    config: BankrollConfig,
}

impl BankrollResolver {
    /// Resolver backed by a real HTTP client.
    pub fn new(config: BankrollConfig) -> Result<Self> {
        let endpoint = HttpBalanceEndpoint::new(config.timeout())?;
        Ok(Self::with_endpoint(config, Arc::new(endpoint)))
    }

    pub fn with_endpoint(config: BankrollConfig, endpoint: Arc<dyn BalanceEndpoint>) -> Self {
        Self { endpoint, config }
    }

    pub fn config(&self) -> &BankrollConfig {
        &self.config
    }

    /// Walk the source chain. Never fails.
    pub async fn resolve(&self) -> ResolvedBankroll {
        if let Some(resolved) = self.from_endpoints().await {
            return resolved;
        }

        if let Some(resolved) = self.from_logs().await {
            return resolved;
        }

        warn!(
            fallback = %self.config.fallback_bankroll,
            "All bankroll sources exhausted, using DEGRADED fallback value"
        );
        ResolvedBankroll {
            snapshot: AccountSnapshot::from_equity(self.config.fallback_bankroll),
            source: BankrollSource::Fallback,
            status: ResolveStatus::Degraded,
        }
    }

    async fn from_endpoints(&self) -> Option<ResolvedBankroll> {
        for url in self.config.urls() {
            let body = match self.endpoint.get_json(&url).await {
                Ok(body) => body,
                Err(e) => {
                    debug!(url = %url, error = %e, "Bankroll endpoint failed, trying next");
                    continue;
                }
            };

            match extract_equity(&body) {
                Some(snapshot) => {
                    info!(url = %url, equity = %snapshot.equity, "Bankroll resolved from endpoint");
                    return Some(ResolvedBankroll {
                        snapshot,
                        source: BankrollSource::Endpoint { url },
                        status: ResolveStatus::Live,
                    });
                }
                None => {
                    debug!(url = %url, "Endpoint returned no positive equity field");
                }
            }
        }
        None
    }

    async fn from_logs(&self) -> Option<ResolvedBankroll> {
        let scan = &self.config.log_scan;
        if !scan.enabled {
            return None;
        }

        let scan = scan.clone();
        let found = match tokio::task::spawn_blocking(move || log_tail::scan_latest(&scan)).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Log scan task failed");
                None
            }
        };

        let (path, snapshot) = found?;
        warn!(
            path = %path.display(),
            equity = %snapshot.equity,
            "Bankroll resolved from log tail; endpoints unavailable"
        );
        Some(ResolvedBankroll {
            snapshot,
            source: BankrollSource::LogTail { path },
            status: ResolveStatus::Live,
        })
    }
}
