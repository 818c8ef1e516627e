//! hlx order pipeline - entry point.
//!
//! observation: orders are signed and logged, never sent
//! trading: orders are posted to the exchange

use anyhow::Result;
use clap::Parser;
use hlx_telemetry::LogFormat;
use std::path::PathBuf;
use tracing::info;

/// Normalize, sign and submit trade intents to Hyperliquid.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via HLX_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Run a single cycle and exit
    #[arg(long)]
    single_cycle: bool,

    /// Intents file, overrides `cycle.intents_file`
    #[arg(long)]
    intents: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    hlx_telemetry::init_logging(LogFormat::from_env())?;

    info!("Starting hlx v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > HLX_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("HLX_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let mut config = hlx_bot::AppConfig::from_file(&config_path)?;
    if args.single_cycle {
        config.cycle.single_cycle = true;
    }
    if let Some(path) = args.intents {
        config.cycle.intents_file = path;
    }
    info!(mode = ?config.mode, info_url = %config.exchange.info_url, "Configuration loaded");

    let app = hlx_bot::Application::new(config)?;
    app.run_preflight().await?;
    app.run().await?;

    Ok(())
}
