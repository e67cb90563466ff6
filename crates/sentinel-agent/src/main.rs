//! Sentinel trading agent entry point.
//!
//! Starts the per-user engines (resuming persisted advanced orders)
//! and runs until interrupted. The decision layer drives cycles
//! through the library API; the binary owns the schedulers and the
//! shutdown path.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use sentinel_agent::{AgentConfig, EngineRegistry, OperatingMode};
use sentinel_exchange::HttpExchangeClient;

/// Sentinel crypto-derivatives trading agent
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via SENTINEL_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
    /// Force observation mode regardless of the config file
    #[arg(long)]
    observe: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    sentinel_telemetry::init_logging()?;
    info!("Starting sentinel agent v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args
        .config
        .or_else(|| std::env::var("SENTINEL_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());
    info!(config_path = %config_path, "Loading configuration");

    let mut config = AgentConfig::from_file(&config_path)?;
    if args.observe {
        config.mode = OperatingMode::Observation;
    }
    info!(?config.mode, info_url = %config.info_url, "Configuration loaded");

    let exchange = Arc::new(HttpExchangeClient::new(
        config.info_url.as_str(),
        config.exchange_url.as_str(),
        config.user.as_str(),
    )?);

    let user = config.user.clone();
    let registry = EngineRegistry::new(config, exchange);
    registry.create(&user)?;

    info!(user = %user, "Agent running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown requested, stopping schedulers");
    registry.stop_all();

    Ok(())
}
