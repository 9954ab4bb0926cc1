//! FordPass Battery Monitor - Main Entry Point
//!
//! Polls the vehicle telemetry service for EV battery state and raises a
//! desktop notification whenever range or charge changes.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::time::Duration;
use tracing::info;

use fordpass_monitor::{
    auth::TokenManager,
    cli::Cli,
    logging,
    monitor::ChangeMonitor,
    notify::{ConsoleNotifier, DesktopNotifier, Notifier},
    storage::StateStore,
    telemetry::TelemetryClient,
};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();
    let credentials = cli.resolve_credentials()?;

    info!(
        "Starting FordPass Battery Monitor for VIN: {}",
        credentials.vin
    );

    let vin = credentials.vin.clone();
    let tokens = Arc::new(TokenManager::new(credentials));
    let client = TelemetryClient::new(tokens, &vin);
    let store = StateStore::new(cli.state_path());

    // Backend chosen once here; the monitor itself never branches on
    // platform.
    let notifier: Box<dyn Notifier> = if cli.console {
        Box::new(ConsoleNotifier)
    } else {
        Box::new(DesktopNotifier)
    };

    let mut monitor = ChangeMonitor::new(
        Box::new(client),
        notifier,
        store,
        Duration::from_secs(cli.interval),
    );

    tokio::select! {
        _ = monitor.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Monitor stopped by user");
        }
    }

    Ok(())
}
