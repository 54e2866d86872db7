//! Sluice - request-throughput optimization layer.
//!
//! `sluice check` validates a configuration file; `sluice simulate` drives a
//! burst of requests through a gateway over a simulated backend.

use anyhow::Context;
use clap::{Parser, Subcommand};
use sluice_node::observability::{init_logging, LogFormat, MetricsState};
use sluice_node::simulate::{run_simulation, SimulatedBackend, SimulationConfig};
use sluice_node::{Gateway, SluiceConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Sluice - pooled, cached and deduplicated backend access
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error), overrides the file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty, json), overrides the file
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration and print the effective settings
    Check,

    /// Run a burst of requests against a simulated backend
    Simulate {
        /// Number of requests
        #[arg(long, default_value_t = 1_000)]
        requests: usize,

        /// Requests in flight at once
        #[arg(long, default_value_t = 64)]
        concurrency: usize,

        /// Number of distinct request paths
        #[arg(long, default_value_t = 50)]
        keys: usize,

        /// Backend latency in milliseconds
        #[arg(long, default_value_t = 20)]
        latency_ms: u64,

        /// Probability of a backend failure
        #[arg(long, default_value_t = 0.0)]
        failure_rate: f64,

        /// RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Also print the Prometheus metrics
        #[arg(long)]
        metrics: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SluiceConfig> {
    match path {
        Some(path) => SluiceConfig::load_yaml(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(SluiceConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let format = cli
        .log_format
        .as_deref()
        .map_or(config.logging.format, LogFormat::parse);
    init_logging(&level, format).context("initializing logging")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting sluice");

    match cli.command {
        Commands::Check => {
            let effective = serde_json::to_string_pretty(&config)?;
            println!("{effective}");
        }
        Commands::Simulate {
            requests,
            concurrency,
            keys,
            latency_ms,
            failure_rate,
            seed,
            metrics,
        } => {
            if !(0.0..=1.0).contains(&failure_rate) {
                anyhow::bail!("failure rate must be between 0 and 1, got {failure_rate}");
            }

            let latency = Duration::from_millis(latency_ms);
            let gateway = Arc::new(
                Gateway::start(SimulatedBackend::new(latency), &config)
                    .await
                    .context("starting gateway")?,
            );

            let simulation = SimulationConfig {
                requests,
                concurrency,
                key_space: keys,
                latency,
                failure_rate,
                seed,
            };
            let report = run_simulation(Arc::clone(&gateway), &simulation).await;
            let stats = gateway.stats();

            let output = serde_json::json!({
                "simulation": simulation,
                "report": report,
                "stats": stats,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);

            if metrics {
                let state = MetricsState::new();
                state.update(&stats);
                print!("{}", state.encode().context("encoding metrics")?);
            }

            gateway.shutdown().await;
        }
    }

    Ok(())
}
