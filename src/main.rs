//! vitalstream: vital-sign analytics with progressive advisory delivery.
//!
//! Command-line front end for the analytics engine.

use std::io::{IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vitalstream::adapters::sanitize::SanitizingMakeWriter;
use vitalstream::adapters::{ModelSet, OllamaNarrator, SqliteStore};
use vitalstream::ports::{MeasurementStore, NarrativeGenerator};
use vitalstream::{AnalyticsEngine, EngineConfig, Measurement};

#[derive(Parser)]
#[command(name = "vitalstream")]
#[command(version, about = "Vital-sign analytics with progressive advisory delivery")]
struct Cli {
    /// TOML configuration file (defaults plus VITALSTREAM_* overrides if omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse one measurement and print the resolved outcome as JSON
    Analyze {
        /// Subject identifier
        #[arg(short, long)]
        subject: String,
        /// Measurement JSON file (stdin if omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Analyse one measurement and print each delivery event as it happens
    Stream {
        /// Subject identifier
        #[arg(short, long)]
        subject: String,
        /// Measurement JSON file (stdin if omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Show loaded model metadata
    Models,

    /// Print aggregate statistics of a subject's stored history as JSON
    Stats {
        /// Subject identifier
        #[arg(short, long)]
        subject: String,
    },
}

/// Keeps the non-blocking log writer alive until exit.
fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    // stdout carries command output, so logs default to stderr.
    let log_mode = std::env::var("VITALSTREAM_LOG_MODE").unwrap_or_else(|_| "stderr".to_string());

    let (writer, guard) = if log_mode == "file" {
        let log_file = std::env::var("VITALSTREAM_LOG_FILE")
            .unwrap_or_else(|_| "vitalstream.log".to_string());

        if let Some(parent) = Path::new(&log_file).parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .with_context(|| format!("Failed to open log file {log_file}"))?;
        tracing_appender::non_blocking(file)
    } else {
        tracing_appender::non_blocking(std::io::stderr())
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(log_mode != "file" && std::io::stderr().is_terminal())
                .with_writer(SanitizingMakeWriter::new(writer)),
        )
        .init();

    Ok(guard)
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::load(p).with_context(|| format!("Invalid configuration {p:?}")),
        None => EngineConfig::from_env().context("Invalid configuration from environment"),
    }
}

fn read_measurement(input: Option<&Path>) -> Result<Measurement> {
    let text = match input {
        Some(p) => {
            std::fs::read_to_string(p).with_context(|| format!("Failed to read {p:?}"))?
        }
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read measurement from stdin")?;
            buf
        }
    };
    serde_json::from_str(&text).context("Measurement is not valid JSON")
}

fn open_store(config: &EngineConfig) -> Result<SqliteStore> {
    match &config.database_path {
        Some(path) => {
            SqliteStore::new(path).with_context(|| format!("Failed to open database {path:?}"))
        }
        None => SqliteStore::in_memory().context("Failed to open in-memory database"),
    }
}

fn build_engine(config: &EngineConfig) -> Result<AnalyticsEngine<SqliteStore>> {
    let models = ModelSet::load(config);
    let store = open_store(config)?;

    let generator: Option<Arc<dyn NarrativeGenerator>> = match &config.narrative {
        Some(n) => Some(Arc::new(
            OllamaNarrator::new(n).context("Failed to build narrative client")?,
        )),
        None => None,
    };

    Ok(AnalyticsEngine::new(config, &models, Arc::new(store), generator)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging()?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Models => {
            let models = ModelSet::load(&config);
            println!("{}", serde_json::to_string_pretty(&models.model_info())?);
            if !(models.anomaly_available() && models.risk_available()) {
                bail!("One or more models are unavailable");
            }
        }
        Commands::Stats { subject } => {
            if config.database_path.is_none() {
                tracing::warn!("No database configured, history is empty");
            }
            let store = open_store(&config)?;
            let stats = store
                .statistics(&subject)
                .context("Failed to compute statistics")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Analyze { subject, input } => {
            let measurement = read_measurement(input.as_deref())?;
            let engine = build_engine(&config)?;
            let outcome = engine.analyze(&subject, measurement).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Stream { subject, input } => {
            let measurement = read_measurement(input.as_deref())?;
            let engine = build_engine(&config)?;
            let mut events = engine.analyze_stream(&subject, measurement)?;

            let mut stdout = std::io::stdout().lock();
            while let Some(event) = events.next_event().await {
                stdout.write_all(event.to_sse()?.as_bytes())?;
                stdout.flush()?;
            }
        }
    }

    Ok(())
}
