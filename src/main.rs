use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use plustwo_tracker::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config = TrackerConfig::load(&cli).context("Invalid configuration")?;

    info!(
        "Starting plustwo-tracker v{} for #{}",
        plustwo_tracker::VERSION,
        config.upstream.channel
    );

    let tracker = Tracker::new(config)?;
    let running = tracker.start(Some(tracker.twitch_factory())).await?;
    tracker.shutdown().start_signal_handlers();

    info!("Tracker is running. Press Ctrl+C to stop.");

    if let Err(e) = running.wait().await {
        error!("Tracker stopped on error: {:#}", e);
        return Err(e);
    }

    info!("Goodbye");
    Ok(())
}
