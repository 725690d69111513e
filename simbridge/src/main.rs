//! Bridge between an OpenPLC controller and a simulation key-value store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use simbridge::config::BridgeConfig;
use simbridge::connections::Connections;
use simbridge::testing::TestHarness;
use simbridge::{polling, sync};
use simbridge_state::{StateStore, now_millis};

/// Bridge between an OpenPLC controller (Modbus TCP) and a simulation
/// key-value store.
#[derive(Parser, Debug)]
#[command(name = "simbridge")]
#[command(about = "Synchronizes an OpenPLC controller with a simulation key-value store")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Run one acceptance scenario after startup and log the outcome.
    #[arg(long)]
    scenario: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => BridgeConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => BridgeConfig::default(),
    };

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting simbridge");
    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let config = Arc::new(config);
    let store = Arc::new(StateStore::new(config.bridge.history_capacity));
    let connections = Arc::new(Connections::new(&config));
    connections.connect_all().await;

    let harness = Arc::new(TestHarness::new(
        Arc::clone(&connections),
        Arc::clone(&store),
        Arc::clone(&config),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let polling_task = tokio::spawn(polling::run(
        Arc::clone(&connections),
        Arc::clone(&store),
        Arc::clone(&config),
        shutdown_rx.clone(),
    ));
    let sync_task = tokio::spawn(sync::run(
        Arc::clone(&connections),
        Arc::clone(&store),
        Arc::clone(&config),
        shutdown_rx.clone(),
    ));
    let health_task = tokio::spawn(log_health(
        Arc::clone(&store),
        Arc::clone(&config),
        shutdown_rx.clone(),
    ));

    if let Some(scenario_id) = args.scenario {
        run_startup_scenario(&harness, &config, scenario_id).await;
    }

    info!("Bridge running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received shutdown signal");

    // Loops finish the in-flight cycle, then exit
    let _ = shutdown_tx.send(true);
    for (name, task) in [
        ("polling", polling_task),
        ("sync", sync_task),
        ("health", health_task),
    ] {
        if let Err(e) = task.await {
            error!(worker = name, error = %e, "worker did not shut down cleanly");
        }
    }

    connections.close_all().await;
    info!("Bridge stopped");
    Ok(())
}

/// Periodically log each endpoint's derived health color, standing in for
/// the dashboard the bridge otherwise only serves through snapshots.
async fn log_health(
    store: Arc<StateStore>,
    config: Arc<BridgeConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    let timeout = config.bridge.connection_timeout();
    let mut interval = tokio::time::interval(Duration::from_secs(10));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                for (endpoint, color, health) in store.health_colors(timeout, now_millis()) {
                    if health.error.is_empty() {
                        info!(endpoint = %endpoint, status = %color, "endpoint health");
                    } else {
                        info!(
                            endpoint = %endpoint,
                            status = %color,
                            error = %health.error,
                            "endpoint health"
                        );
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Give the loops one full cycle to establish state, then run the requested
/// scenario once.
async fn run_startup_scenario(harness: &TestHarness, config: &BridgeConfig, scenario_id: u32) {
    tokio::time::sleep(config.bridge.poll_interval() + Duration::from_millis(500)).await;

    match harness.run_scenario(scenario_id).await {
        Ok(result) => info!(
            scenario_id,
            status = %result.status,
            coil_pass = ?result.coil_pass,
            error = ?result.error,
            "scenario finished"
        ),
        Err(e) => warn!(scenario_id, error = %e, "scenario could not run"),
    }
}
