//! Calibrator
//!
//! Resolves the arena bankroll and emits position-sizing and loss-limit
//! parameters, once or on a schedule.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use risk_calibration::{
    render_status_line, CalibrationConfig, CalibrationEngine, EnvFileSink, ParameterSet,
    ParameterSink, PeakStore,
};
use rust_decimal::Decimal;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "calibrator")]
#[command(about = "Bankroll-driven risk calibration for the trading arena", long_about = None)]
struct Cli {
    /// Config file (TOML/JSON/YAML) under ARENA_<SECTION>__<KEY> overrides.
    /// Without it, flat ARENA_* variables are read.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON logs, and a JSON report for `once`
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single cycle and print the parameters as shell exports
    Once {
        /// Also write the parameters to this dotenv file
        #[arg(long)]
        env_file: Option<PathBuf>,
    },

    /// Recalibrate on the slow cadence until Ctrl-C
    Watch {
        /// Write each new parameter set to this dotenv file instead of stdout
        #[arg(long)]
        env_file: Option<PathBuf>,
    },

    /// Inspect or reset the stored equity peak
    Peak {
        #[command(subcommand)]
        cmd: PeakCmd,
    },
}

#[derive(Subcommand)]
enum PeakCmd {
    /// Print the stored peak
    Show,

    /// Overwrite the stored peak. This is the only way to lower it.
    Reset {
        /// New peak equity
        value: Decimal,
    },
}

/// Prints every new parameter set as shell exports.
struct StdoutSink;

impl ParameterSink for StdoutSink {
    fn apply(&mut self, params: &ParameterSet) -> risk_calibration::Result<()> {
        let mut out = std::io::stdout().lock();
        writeln!(out)?;
        out.write_all(params.render_exports().as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = match &cli.config {
        Some(path) => CalibrationConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CalibrationConfig::from_env().context("loading config from environment")?,
    };

    match cli.cmd {
        Commands::Once { env_file } => run_once(config, env_file, cli.json).await,
        Commands::Watch { env_file } => run_watch(config, env_file).await,
        Commands::Peak { cmd } => run_peak(&config, cmd),
    }
}

fn init_tracing(json: bool) {
    // stdout carries the parameters; logs go to stderr
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "calibrator=info,risk_calibration=info".into());

    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

async fn run_once(config: CalibrationConfig, env_file: Option<PathBuf>, json: bool) -> Result<()> {
    let engine = CalibrationEngine::new(config)?;
    let report = engine.run_cycle().await?;

    if let Some(path) = env_file {
        EnvFileSink::new(&path)
            .apply(&report.parameters)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.parameters.render_exports());
        eprintln!("{}", render_status_line(&report, Duration::ZERO));
    }

    Ok(())
}

async fn run_watch(config: CalibrationConfig, env_file: Option<PathBuf>) -> Result<()> {
    let engine = CalibrationEngine::new(config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut sink: Box<dyn ParameterSink> = match env_file {
        Some(path) => Box::new(EnvFileSink::new(path)),
        None => Box::new(StdoutSink),
    };

    let last = engine
        .run(
            sink.as_mut(),
            |line| {
                let mut err = std::io::stderr().lock();
                let _ = write!(err, "\r{}", line);
                let _ = err.flush();
            },
            shutdown_rx,
        )
        .await;
    eprintln!();

    match last {
        Some(report) => info!(status = %report.status, equity = %report.equity(), "Calibrator stopped"),
        None => info!("Calibrator stopped before completing a cycle"),
    }
    Ok(())
}

fn run_peak(config: &CalibrationConfig, cmd: PeakCmd) -> Result<()> {
    let store = PeakStore::new(config.peak_file.clone());

    match cmd {
        PeakCmd::Show => match store.load() {
            Some(record) => println!("{} ({})", record.peak_equity, store.path().display()),
            None => println!("no peak recorded ({})", store.path().display()),
        },
        PeakCmd::Reset { value } => {
            let record = store
                .reset(value)
                .with_context(|| format!("resetting peak in {}", store.path().display()))?;
            println!("peak reset to {}", record.peak_equity);
        }
    }

    Ok(())
}
