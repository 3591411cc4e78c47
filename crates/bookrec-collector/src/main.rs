//! bookrec - Order-book collector entry point.

use anyhow::Result;
use bookrec_collector::{AppConfig, ExchangeOrchestrator};
use clap::Parser;
use std::time::Duration;
use tracing::{info, warn};

/// Status log interval.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Order-book snapshot collector
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "BOOKREC_CONFIG", default_value = "config/default.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    bookrec_ws::init_crypto();

    let args = Args::parse();

    bookrec_telemetry::init_logging()?;

    info!("Starting bookrec v{}", env!("CARGO_PKG_VERSION"));
    info!(config_path = %args.config, "Loading configuration");

    let config = AppConfig::from_file(&args.config)?;
    info!(
        exchanges = config.exchanges.len(),
        plans = config.subscriptions.len(),
        "Configuration loaded"
    );

    let orchestrator = ExchangeOrchestrator::from_config(&config).await?;

    let mut status_interval = tokio::time::interval(STATUS_INTERVAL);
    status_interval.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = status_interval.tick() => {
                for id in orchestrator.exchange_ids() {
                    let Some(collector) = orchestrator.get(&id) else { continue };
                    let states = collector.subscription_states();
                    let live = states.iter().filter(|s| s.status.is_live()).count();
                    let failed: Vec<&str> = states
                        .iter()
                        .filter(|s| !s.status.is_live())
                        .map(|s| s.symbol.as_str())
                        .collect();
                    info!(exchange = %id, subscriptions = states.len(), live, "Collector status");
                    if !failed.is_empty() {
                        warn!(exchange = %id, ?failed, "Subscriptions not streaming");
                    }
                }
            }
        }
    }

    orchestrator.stop_all().await?;
    info!("bookrec stopped");
    Ok(())
}
