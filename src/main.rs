//! Flappy Taco
//!
//! Headless arcade loop that drives a haptic device from gameplay, or with
//! `--serve`, a simulated haptic endpoint for the `external` connector.

use anyhow::Context;
use clap::Parser;
use std::time::Duration;
use tracing::{info, warn};

use flappy_taco::domain::models::ConnectorChoice;
use flappy_taco::domain::settings::SettingsService;
use flappy_taco::infrastructure::haptics::endpoint::EndpointServer;
use flappy_taco::infrastructure::haptics::Simulator;
use flappy_taco::infrastructure::logging::init_logging;
use flappy_taco::presentation::app::{AppOptions, FlappyTacoApp};

/// Flappy Taco - arcade game with haptic feedback
#[derive(Parser, Debug)]
#[command(name = "flappy_taco")]
#[command(version, about, long_about = None)]
struct Args {
    /// Connector to use: embedded or external (saved to settings)
    #[arg(short, long)]
    connector: Option<ConnectorChoice>,

    /// Local socket name of the external haptic endpoint
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Number of game ticks to play
    #[arg(short, long, default_value_t = 600)]
    ticks: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Serve a simulated haptic endpoint instead of playing
    #[arg(long)]
    serve: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings = match SettingsService::new() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Settings unavailable, using defaults: {:#}", e);
            SettingsService::with_path("settings.json")
        }
    };

    let _logging_guard = init_logging(&settings.get().log_settings, args.verbose)
        .map_err(|e| eprintln!("Failed to initialize logging: {:#}", e))
        .ok();
    info!("Settings file: {}", settings.path().display());

    if args.serve {
        let endpoint = args
            .endpoint
            .unwrap_or_else(|| settings.get().endpoint_name.clone());
        let server = EndpointServer::bind(&endpoint, Simulator::with_demo_devices())
            .context("Failed to start haptic endpoint")?;

        tokio::select! {
            result = server.serve() => result?,
            _ = tokio::signal::ctrl_c() => info!("Shutting down endpoint"),
        }
        return Ok(());
    }

    let options = AppOptions {
        connector: args.connector,
        endpoint: args.endpoint,
        ticks: args.ticks,
        tick_interval: Duration::from_millis(16),
    };
    let summary = FlappyTacoApp::new(settings, options).run().await?;
    if summary.crashes > 0 {
        warn!("The taco crashed {} time(s)", summary.crashes);
    }
    println!(
        "Best score: {} ({} ticks, {} crashes)",
        summary.best_score, summary.ticks, summary.crashes
    );
    Ok(())
}
