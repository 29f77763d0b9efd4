//! Vendwatch CLI
//!
//! Command-line interface for the vending dashboard monitoring service.

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;
use vendwatch::{load_config, Config, VendwatchBuilder};

#[derive(Parser)]
#[command(name = "vendwatch")]
#[command(about = "Vending dashboard monitoring and notification service")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// State file (overrides config file)
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Run a single poll tick and exit
    #[arg(long)]
    once: bool,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    tracing::debug!(
        "Parsed command line arguments: config={:?}, state_file={:?}, once={}, log_level={:?}",
        args.config,
        args.state_file,
        args.once,
        args.log_level
    );

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    config.resolve_secrets()?;

    if let Some(state_file) = args.state_file {
        config.storage.state_file = state_file;
    }

    tracing::info!("Starting vendwatch service");
    tracing::debug!(
        "Dashboard: {}, state: {:?}, recipients: {:?}",
        config.dashboard.base_url,
        config.storage.state_file,
        config.storage.recipients_file
    );

    VendwatchBuilder::new(config)
        .once(args.once)
        .build()
        .await?
        .start()
        .await?;

    Ok(())
}
