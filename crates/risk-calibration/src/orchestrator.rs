//! Calibration cycle and the dual-cadence run loop.
//!
//! A cycle runs resolve, classify, calculate, drawdown and Kelly in that order
//! and produces a [`CycleReport`]. The loop re-runs the cycle on the slow
//! cadence and re-renders the last report on the fast one.

use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::bankroll::BankrollResolver;
use crate::calculator::{calculate_limits, round_money};
use crate::config::CalibrationConfig;
use crate::drawdown::{apply_drawdown, DrawdownBand, DrawdownOutcome};
use crate::error::Result;
use crate::params::{ParameterSet, ParameterSink};
use crate::peak_store::PeakStore;
use crate::types::{EngineStatus, ResolvedBankroll, RiskLimits, Tier};

/// Everything computed in one calibration cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub computed_at: DateTime<Utc>,
    pub resolved: ResolvedBankroll,
    pub tier: Tier,
    pub band: DrawdownBand,
    pub ratio: Decimal,
    /// Limits before drawdown scaling.
    pub base_limits: RiskLimits,
    /// Limits after drawdown scaling and floors.
    pub limits: RiskLimits,
    pub peak_before: Decimal,
    pub peak_after: Decimal,
    pub kelly_fraction: Decimal,
    pub parameters: ParameterSet,
    pub status: EngineStatus,
}

impl CycleReport {
    pub fn equity(&self) -> Decimal {
        self.resolved.equity()
    }

    /// Drawdown from peak as a percentage.
    pub fn drawdown_pct(&self) -> Decimal {
        round_money((Decimal::ONE - self.ratio) * Decimal::ONE_HUNDRED)
    }
}

/// A fallback bankroll overrides whatever the drawdown band says.
pub fn engine_status(resolved: &ResolvedBankroll, band: DrawdownBand) -> EngineStatus {
    if resolved.is_degraded() {
        return EngineStatus::Degraded;
    }
    match band {
        DrawdownBand::Normal => EngineStatus::Normal,
        DrawdownBand::Moderate => EngineStatus::Moderate,
        DrawdownBand::Critical => EngineStatus::Critical,
    }
}

/// One-line operator summary of a report.
pub fn render_status_line(report: &CycleReport, next_cycle_in: Duration) -> String {
    format!(
        "[{}] equity ${} ({}) | tier {} | drawdown {}% {} | trade ${} | exposure ${}/${} | kelly {} | next in {}s",
        report.status,
        report.equity(),
        report.resolved.source,
        report.tier,
        report.drawdown_pct(),
        report.band,
        report.limits.trade_size,
        report.limits.max_position_per_bot,
        report.limits.max_position_global,
        report.kelly_fraction,
        next_cycle_in.as_secs(),
    )
}

/// The calibration pipeline.
#[derive(Clone)]
pub struct CalibrationEngine {
    resolver: BankrollResolver,
    peak_store: PeakStore,
    config: Arc<CalibrationConfig>,
}

impl CalibrationEngine {
    /// Engine with an HTTP-backed resolver.
    pub fn new(config: CalibrationConfig) -> Result<Self> {
        config.validate()?;
        let resolver = BankrollResolver::new(config.bankroll.clone())?;
        Ok(Self::with_resolver(config, resolver))
    }

    pub fn with_resolver(config: CalibrationConfig, resolver: BankrollResolver) -> Self {
        Self {
            resolver,
            peak_store: PeakStore::new(config.peak_file.clone()),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn peak_store(&self) -> &PeakStore {
        &self.peak_store
    }

    /// Run the full pipeline once.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let resolved = self.resolver.resolve().await;
        let equity = resolved.equity();

        let profile = self.config.tiers.classify(equity);
        let base_limits = calculate_limits(equity, profile, &self.config.floors)?;

        let store = self.peak_store.clone();
        let config = Arc::clone(&self.config);
        let limits = base_limits.clone();
        let degraded = resolved.is_degraded();
        let (outcome, peak_after) = tokio::task::spawn_blocking(move || {
            settle_peak(&store, &config, equity, limits, degraded)
        })
        .await??;

        let kelly_fraction = self.config.kelly.fraction(peak_after, equity);
        let status = engine_status(&resolved, outcome.band);
        let parameters = ParameterSet::new(
            &outcome.limits,
            &self.config.trading,
            kelly_fraction,
            status,
        );

        info!(
            equity = %equity,
            source = %resolved.source,
            tier = %profile.name,
            band = %outcome.band,
            status = %status,
            trade_size = %outcome.limits.trade_size,
            max_position_global = %outcome.limits.max_position_global,
            kelly = %kelly_fraction,
            "Calibration cycle complete"
        );

        Ok(CycleReport {
            computed_at: Utc::now(),
            resolved,
            tier: profile.name,
            band: outcome.band,
            ratio: outcome.ratio,
            base_limits,
            limits: outcome.limits,
            peak_before: outcome.peak_before,
            peak_after,
            kelly_fraction,
            parameters,
            status,
        })
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Each new parameter set goes to `sink`; unchanged sets are not
    /// re-applied. `status` receives a rendered line on every fast tick once
    /// a report exists. Returns the last successful report.
    pub async fn run<S, F>(
        &self,
        sink: &mut S,
        mut status: F,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<CycleReport>
    where
        S: ParameterSink + ?Sized,
        F: FnMut(&str),
    {
        let cadence = self.config.cadence.clone();
        let mut slow_ticker = interval(cadence.slow_interval());
        slow_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fast_ticker = interval(cadence.fast_interval());
        fast_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: Option<JoinHandle<Result<CycleReport>>> = None;
        let mut last_report: Option<CycleReport> = None;
        let mut applied: Option<ParameterSet> = None;
        let mut next_cycle_at = Instant::now();

        info!(
            slow_interval_secs = cadence.slow_interval_secs,
            fast_interval_ms = cadence.fast_interval_ms,
            peak_file = %self.peak_store.path().display(),
            "Starting calibration loop"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, stopping calibration loop");
                        break;
                    }
                }
                _ = slow_ticker.tick() => {
                    next_cycle_at = Instant::now() + cadence.slow_interval();
                    if in_flight.is_some() {
                        warn!("Previous calibration cycle still running, skipping tick");
                    } else {
                        let engine = self.clone();
                        in_flight = Some(tokio::spawn(async move { engine.run_cycle().await }));
                    }
                }
                joined = async {
                    match in_flight.as_mut() {
                        Some(handle) => handle.await,
                        None => std::future::pending().await,
                    }
                } => {
                    in_flight = None;
                    match joined {
                        Ok(Ok(report)) => {
                            deliver(sink, &report.parameters, &mut applied);
                            last_report = Some(report);
                        }
                        Ok(Err(e)) => {
                            error!(error = %e, "Calibration cycle failed");
                        }
                        Err(e) => {
                            error!(error = %e, "Calibration task aborted");
                        }
                    }
                }
                _ = fast_ticker.tick() => {
                    if let Some(report) = &last_report {
                        let remaining = next_cycle_at.saturating_duration_since(Instant::now());
                        status(&render_status_line(report, remaining));
                    }
                }
            }
        }

        if let Some(handle) = in_flight {
            handle.abort();
        }
        last_report
    }
}

/// Drawdown pass against the stored peak, persisting the new peak.
///
/// Runs on the blocking pool; returns the outcome and the effective peak.
fn settle_peak(
    store: &PeakStore,
    config: &CalibrationConfig,
    equity: Decimal,
    limits: RiskLimits,
    degraded: bool,
) -> Result<(DrawdownOutcome, Decimal)> {
    let mut guard = store.acquire();
    let outcome = apply_drawdown(
        equity,
        limits,
        guard.record(),
        &config.drawdown,
        &config.floors,
    )?;
    let stored_peak = guard.record().map(|record| record.peak_equity);
    // a synthetic bankroll must not move the high-water mark
    if degraded {
        debug!("Degraded bankroll, peak record left unchanged");
    } else {
        guard.update(outcome.peak_after.clone());
    }
    let peak_after = guard
        .commit()?
        .map(|record| record.peak_equity)
        .or(stored_peak)
        .unwrap_or(outcome.peak_after.peak_equity);

    Ok((outcome, peak_after))
}

fn deliver<S: ParameterSink + ?Sized>(
    sink: &mut S,
    params: &ParameterSet,
    applied: &mut Option<ParameterSet>,
) {
    if applied.as_ref() == Some(params) {
        debug!("Parameters unchanged, skipping apply");
        return;
    }

    match sink
        .apply(params)
        .with_context(|| format!("applying {} parameter set", params.risk_status))
    {
        Ok(()) => *applied = Some(params.clone()),
        // left unrecorded so the next cycle retries
        Err(e) => error!(error = %format!("{:#}", e), "Failed to apply risk parameters"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bankroll::endpoint::MockBalanceEndpoint;
    use crate::error::CalibrationError;
    use crate::peak_store::PeakRecord;
    use crate::types::BankrollSource;
    use serde_json::json;
    use crate::bankroll::BalanceEndpoint;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> CalibrationConfig {
        let mut config = CalibrationConfig {
            peak_file: dir.path().join("arena_peak.json"),
            ..Default::default()
        };
        config.bankroll.paths = vec!["/api/bankroll".to_string()];
        config.bankroll.log_scan.enabled = false;
        config
    }

    fn engine_with_equity(config: CalibrationConfig, equity: Option<f64>) -> CalibrationEngine {
        let mut mock = MockBalanceEndpoint::new();
        mock.expect_get_json().returning(move |_| match equity {
            Some(value) => Ok(json!({ "equity": value })),
            None => Err(CalibrationError::Api {
                message: "connection refused".to_string(),
                status: None,
            }),
        });
        let resolver = BankrollResolver::with_endpoint(config.bankroll.clone(), Arc::new(mock));
        CalibrationEngine::with_resolver(config, resolver)
    }

    #[derive(Default)]
    struct RecordingSink {
        applied: Vec<ParameterSet>,
    }

    impl ParameterSink for RecordingSink {
        fn apply(&mut self, params: &ParameterSet) -> Result<()> {
            self.applied.push(params.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl ParameterSink for FailingSink {
        fn apply(&mut self, _params: &ParameterSet) -> Result<()> {
            Err(CalibrationError::Config {
                message: "read-only".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_first_cycle_seeds_peak_and_applies_floor() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with_equity(test_config(&dir), Some(13.0));

        let report = engine.run_cycle().await.unwrap();

        assert_eq!(report.tier, Tier::Conservative);
        assert_eq!(report.band, DrawdownBand::Normal);
        assert_eq!(report.status, EngineStatus::Normal);
        // 13.00 * 0.023 = 0.299 -> 0.30 -> floor 0.90
        assert_eq!(report.limits.trade_size, Decimal::new(90, 2));
        assert_eq!(report.parameters.trade_max_size, Decimal::new(90, 2));
        assert_eq!(report.kelly_fraction, Decimal::new(10, 2));
        assert_eq!(
            engine.peak_store().load(),
            Some(PeakRecord {
                peak_equity: Decimal::new(13, 0)
            })
        );
    }

    #[tokio::test]
    async fn test_critical_drawdown_against_stored_peak() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        PeakStore::new(config.peak_file.clone())
            .reset(Decimal::new(100, 0))
            .unwrap();
        let engine = engine_with_equity(config, Some(50.0));

        let report = engine.run_cycle().await.unwrap();

        assert_eq!(report.tier, Tier::Balanced);
        assert_eq!(report.band, DrawdownBand::Critical);
        assert_eq!(report.status, EngineStatus::Critical);
        // 50 * 0.032 = 1.60 -> * 0.60 = 0.96
        assert_eq!(report.base_limits.trade_size, Decimal::new(160, 2));
        assert_eq!(report.limits.trade_size, Decimal::new(96, 2));
        assert_eq!(report.peak_before, Decimal::new(100, 0));
        assert_eq!(report.peak_after, Decimal::new(100, 0));
        assert_eq!(report.drawdown_pct(), Decimal::new(50, 0));
        // drawdown beyond 15% bottoms Kelly out at a tenth of base
        assert_eq!(report.kelly_fraction, Decimal::new(1, 2));
    }

    #[tokio::test]
    async fn test_exhausted_sources_report_degraded() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with_equity(test_config(&dir), None);

        let report = engine.run_cycle().await.unwrap();

        assert_eq!(report.resolved.source, BankrollSource::Fallback);
        assert_eq!(report.equity(), Decimal::new(1306, 2));
        assert_eq!(report.status, EngineStatus::Degraded);
        assert_eq!(report.parameters.risk_status, EngineStatus::Degraded);
        assert!(engine.peak_store().load().is_none());
    }

    #[tokio::test]
    async fn test_degraded_cycle_keeps_stored_peak() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        PeakStore::new(config.peak_file.clone())
            .reset(Decimal::new(10, 0))
            .unwrap();
        let engine = engine_with_equity(config, None);

        // fallback 13.06 is above the stored peak but must not raise it
        let report = engine.run_cycle().await.unwrap();

        assert_eq!(report.peak_after, Decimal::new(10, 0));
        assert_eq!(
            engine.peak_store().load().unwrap().peak_equity,
            Decimal::new(10, 0)
        );
    }

    #[test]
    fn test_degraded_overrides_band() {
        let resolved = ResolvedBankroll {
            snapshot: crate::types::AccountSnapshot::from_equity(Decimal::ONE),
            source: BankrollSource::Fallback,
            status: crate::types::ResolveStatus::Degraded,
        };
        assert_eq!(
            engine_status(&resolved, DrawdownBand::Critical),
            EngineStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_status_line_mentions_key_fields() {
        let dir = TempDir::new().unwrap();
        let engine = engine_with_equity(test_config(&dir), Some(42.5));
        let report = engine.run_cycle().await.unwrap();

        let line = render_status_line(&report, Duration::from_secs(17));

        assert!(line.starts_with("[NORMAL] equity $42.5"));
        assert!(line.contains("tier BALANCED"));
        assert!(line.contains("trade $1.36"));
        assert!(line.ends_with("next in 17s"));
    }

    #[tokio::test]
    async fn test_run_applies_once_and_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.cadence.slow_interval_secs = 3600;
        config.cadence.fast_interval_ms = 10;
        let engine = engine_with_equity(config, Some(30.0));

        let (tx, rx) = watch::channel(false);
        let lines = Mutex::new(Vec::<String>::new());
        let mut sink = RecordingSink::default();

        let stopper = async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            tx.send(true).unwrap();
        };
        let (last, _) = tokio::join!(
            engine.run(
                &mut sink,
                |line| lines.lock().unwrap().push(line.to_string()),
                rx
            ),
            stopper
        );

        let last = last.expect("one cycle should have completed");
        assert_eq!(last.tier, Tier::Balanced);
        assert_eq!(sink.applied.len(), 1);
        assert_eq!(sink.applied[0], last.parameters);

        let lines = lines.into_inner().unwrap();
        assert!(!lines.is_empty());
        assert!(lines.iter().all(|l| l.contains("tier BALANCED")));
    }

    #[tokio::test]
    async fn test_run_survives_sink_failure() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.cadence.slow_interval_secs = 3600;
        let engine = engine_with_equity(config, Some(30.0));

        let (tx, rx) = watch::channel(false);
        let stopper = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(tx);
        };
        let mut sink = FailingSink;
        let (last, _) = tokio::join!(engine.run(&mut sink, |_| {}, rx), stopper);

        assert!(last.is_some());
    }

    #[test]
    fn test_settle_peak_is_plain_blocking_code() {
        // no runtime here: the peak pass must not need one
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let store = PeakStore::new(config.peak_file.clone());
        let limits_for = |equity: Decimal| {
            calculate_limits(equity, config.tiers.classify(equity), &config.floors).unwrap()
        };

        let equity = Decimal::new(20, 0);
        let (outcome, peak) =
            settle_peak(&store, &config, equity, limits_for(equity), false).unwrap();
        assert_eq!(outcome.band, DrawdownBand::Normal);
        assert_eq!(peak, equity);
        assert_eq!(store.load().unwrap().peak_equity, equity);

        let low = Decimal::new(5, 0);
        let (_, peak) = settle_peak(&store, &config, low, limits_for(low), true).unwrap();
        assert_eq!(peak, equity);
        assert_eq!(store.load().unwrap().peak_equity, equity);
    }

    /// Answers the first request at once and every later one after `delay`.
    struct SlowEndpoint {
        delay: Duration,
        calls: AtomicUsize,
        busy: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl BalanceEndpoint for SlowEndpoint {
        async fn get_json(&self, _url: &str) -> Result<serde_json::Value> {
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                self.busy.store(true, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                self.busy.store(false, Ordering::SeqCst);
            }
            Ok(json!({ "equity": 30 }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycle_does_not_block_status_or_queue_ticks() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.cadence.slow_interval_secs = 10;
        config.cadence.fast_interval_ms = 500;

        let busy = Arc::new(AtomicBool::new(false));
        let endpoint = Arc::new(SlowEndpoint {
            delay: Duration::from_secs(25),
            calls: AtomicUsize::new(0),
            busy: busy.clone(),
        });
        let resolver = BankrollResolver::with_endpoint(config.bankroll.clone(), endpoint.clone());
        let engine = CalibrationEngine::with_resolver(config, resolver);

        let (tx, rx) = watch::channel(false);
        let mut sink = RecordingSink::default();
        let mut lines_while_busy = 0usize;

        // cycle 1 at t=0 is instant; cycle 2 starts at t=10 and holds the
        // endpoint until t=35, spanning the ticks at t=20 and t=30
        let stopper = async {
            tokio::time::sleep(Duration::from_secs(38)).await;
            tx.send(true).unwrap();
        };
        let (last, _) = tokio::join!(
            engine.run(
                &mut sink,
                |_line| {
                    if busy.load(Ordering::SeqCst) {
                        lines_while_busy += 1;
                    }
                },
                rx
            ),
            stopper
        );

        assert!(last.is_some());
        assert!(
            lines_while_busy >= 20,
            "status stalled during slow cycle: {} lines",
            lines_while_busy
        );
        // ticks during the in-flight cycle were dropped, not replayed on completion
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unchanged_parameters_not_reapplied() {
        let limits = RiskLimits {
            loss_per_bot: Decimal::ONE,
            loss_global: Decimal::ONE,
            max_position_global: Decimal::new(5, 0),
            max_position_per_bot: Decimal::new(2, 0),
            trade_size: Decimal::new(90, 2),
        };
        let params = ParameterSet::new(
            &limits,
            &Default::default(),
            Decimal::new(10, 2),
            EngineStatus::Normal,
        );
        let mut sink = RecordingSink::default();
        let mut applied = None;

        deliver(&mut sink, &params, &mut applied);
        deliver(&mut sink, &params, &mut applied);

        assert_eq!(sink.applied.len(), 1);
    }
}
