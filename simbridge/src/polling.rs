//! The polling loop: reads both endpoints into the state store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, error, info};

use simbridge_state::{Endpoint, StateStore, TagValue, now_millis};

use crate::config::BridgeConfig;
use crate::connections::Connections;

/// Index a contiguous block read into an address-keyed map.
pub fn block_to_map<T>(start: u16, values: Vec<T>) -> HashMap<u16, T> {
    values
        .into_iter()
        .enumerate()
        .map(|(offset, value)| (start + offset as u16, value))
        .collect()
}

/// Run the polling loop until the stop signal fires.
///
/// A cycle failure is recorded in the system error log and followed by a
/// full-period backoff; only cancellation stops the loop.
pub async fn run(
    connections: Arc<Connections>,
    store: Arc<StateStore>,
    config: Arc<BridgeConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        period_secs = config.bridge.poll_interval_secs,
        "polling loop started"
    );
    let period = config.bridge.poll_interval();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let started = Instant::now();
        let pause = match poll_cycle(&connections, &store, &config).await {
            Ok(()) => period.saturating_sub(started.elapsed()),
            Err(e) => {
                error!(error = %e, "polling cycle failed");
                store.record_error(format!("Polling cycle failed: {}", e));
                period
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("polling loop stopped");
}

/// One polling cycle: controller first, then the simulation store.
async fn poll_cycle(
    connections: &Connections,
    store: &StateStore,
    config: &BridgeConfig,
) -> anyhow::Result<()> {
    poll_plc(connections, store, config).await;
    poll_cache(connections, store, config).await;
    Ok(())
}

/// Read all configured coils and input registers from the controller.
///
/// Either read failing marks the controller down for this cycle with the
/// failure reason and skips the rest; health is updated unconditionally.
async fn poll_plc(connections: &Connections, store: &StateStore, config: &BridgeConfig) {
    let mut connected = connections.plc_reachable().await;
    if !connected {
        // Session dropped or stale: try to (re)establish before giving up on
        // the cycle
        connected = connections.ensure_plc().await;
    }
    let mut error = String::new();
    let mut coils = None;
    let mut registers = None;

    if connected {
        let block = config.plc.coils;
        match connections.read_coils(block.start, block.count).await {
            Ok(bits) => coils = Some(block_to_map(block.start, bits)),
            Err(e) => {
                error = format!("Failed to read PLC coils: {}", e);
                connected = false;
            }
        }
    }

    if connected {
        let block = config.plc.input_registers;
        match connections.read_input_registers(block.start, block.count).await {
            Ok(words) => registers = Some(block_to_map(block.start, words)),
            Err(e) => {
                error = format!("Failed to read PLC input registers: {}", e);
                connected = false;
            }
        }
    }

    store.update_health(
        Endpoint::Plc,
        connected,
        connections.plc_last_ok().await,
        error,
    );
    if let Some(coils) = coils {
        store.merge_coils(coils);
    }
    if let Some(registers) = registers {
        store.merge_input_registers(registers);
    }
}

/// Read every tag named in either mapping direction from the store.
///
/// A single missing tag is not fatal (the simulation may not have written
/// yet); reading zero tags marks the store down for the cycle.
async fn poll_cache(connections: &Connections, store: &StateStore, config: &BridgeConfig) {
    let mut connected = connections.cache_reachable().await;
    if !connected {
        connected = connections.ensure_cache().await;
    }
    let mut error = String::new();
    let mut sim_tags: HashMap<String, TagValue> = HashMap::new();

    if connected {
        for tag in config.mappings.all_tags() {
            match connections.cache_get(&tag).await {
                Ok(Some(value)) => {
                    sim_tags.insert(tag, value);
                }
                Ok(None) => {
                    debug!(%tag, "tag not present in simulation store");
                    error = format!("Tag '{}' missing from simulation store", tag);
                }
                Err(e) => {
                    error = format!("Failed to read tag '{}': {}", tag, e);
                }
            }
        }

        if sim_tags.is_empty() {
            connected = false;
            if error.is_empty() {
                error = "Failed to read any data from simulation store".to_string();
            }
        }
    }

    if sim_tags.is_empty() {
        store.update_health(
            Endpoint::Cache,
            connected,
            connections.cache_last_ok().await,
            error,
        );
    } else {
        store.update_health(Endpoint::Cache, true, now_millis(), error);
        store.merge_sim_tags(sim_tags);
    }
}
