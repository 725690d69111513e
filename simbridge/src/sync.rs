//! The synchronization loop: translates values between the two address
//! spaces off one consistent state snapshot per cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use simbridge_state::{Endpoint, StateSnapshot, StateStore, TagValue};

use crate::config::{ActuatorMapping, Block, BridgeConfig, SensorMapping};
use crate::connections::Connections;

/// Sink for the controller→cache direction, a seam for fault-injection in
/// tests. Returns whether the write succeeded.
#[allow(async_fn_in_trait)]
pub trait CoilSink {
    async fn set_actuator(&self, tag: &str, value: bool) -> bool;
}

impl CoilSink for Connections {
    async fn set_actuator(&self, tag: &str, value: bool) -> bool {
        match self.cache_set(tag, &TagValue::Bool(value)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%tag, error = %e, "failed to write actuator tag to simulation store");
                false
            }
        }
    }
}

/// Collect the actuator writes for this cycle: every mapped coil address
/// present in the snapshot, in mapping order.
pub fn actuator_plan(
    coils: &HashMap<u16, bool>,
    mappings: &[ActuatorMapping],
) -> Vec<(String, bool)> {
    mappings
        .iter()
        .filter_map(|m| coils.get(&m.address).map(|state| (m.tag.clone(), *state)))
        .collect()
}

/// Write the planned actuator states one tag at a time, best effort: one
/// failure is logged by the sink and must not stop the remaining writes.
pub async fn push_actuators<S: CoilSink>(plan: &[(String, bool)], sink: &S) -> usize {
    let mut written = 0;
    for (tag, state) in plan {
        if sink.set_actuator(tag, *state).await {
            written += 1;
        }
    }
    written
}

/// Assemble the full sensor register block for this cycle.
///
/// Returns the block values in address order, with unmapped slots
/// zero-filled. Any configured sensor tag that is missing from the snapshot
/// or not coercible to a register value skips the whole batch: a partial
/// read never produces a partial register write.
pub fn register_batch(
    sim_tags: &HashMap<String, TagValue>,
    mappings: &[SensorMapping],
    block: Block,
) -> Option<Vec<u16>> {
    let mut values = vec![0u16; block.count as usize];

    for mapping in mappings {
        let Some(value) = sim_tags.get(&mapping.tag) else {
            debug!(tag = %mapping.tag, "sensor tag not in snapshot, skipping register batch");
            return None;
        };
        let Some(register) = value.as_register() else {
            warn!(
                tag = %mapping.tag,
                value = %value,
                "sensor value not coercible to a register, skipping register batch"
            );
            return None;
        };
        values[(mapping.address - block.start) as usize] = register;
    }

    Some(values)
}

/// Run the synchronization loop until the stop signal fires.
///
/// Failure and backoff semantics mirror the polling loop.
pub async fn run(
    connections: Arc<Connections>,
    store: Arc<StateStore>,
    config: Arc<BridgeConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        period_secs = config.bridge.sync_interval_secs,
        "synchronization loop started"
    );
    let period = config.bridge.sync_interval();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let started = Instant::now();
        let pause = match sync_cycle(&connections, &store, &config).await {
            Ok(()) => period.saturating_sub(started.elapsed()),
            Err(e) => {
                error!(error = %e, "synchronization cycle failed");
                store.record_error(format!("Synchronization cycle failed: {}", e));
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

    info!("synchronization loop stopped");
}

/// One synchronization cycle, off a single snapshot taken at the top.
///
/// Both directions require both endpoints marked connected in the snapshot;
/// the snapshot may be one polling cycle stale, which is accepted.
async fn sync_cycle(
    connections: &Connections,
    store: &StateStore,
    config: &BridgeConfig,
) -> anyhow::Result<()> {
    let snapshot = store.snapshot();

    if !both_connected(&snapshot) {
        debug!("skipping sync cycle, controller or simulation store disconnected");
        return Ok(());
    }

    // Controller -> cache: best-effort per-tag fan-out
    let plan = actuator_plan(&snapshot.coils, &config.mappings.actuators);
    if !plan.is_empty() {
        let written = push_actuators(&plan, connections).await;
        debug!(written, planned = plan.len(), "actuator sync complete");
    }

    // Cache -> controller: all-or-nothing contiguous block write
    let block = config.plc.input_registers;
    match register_batch(&snapshot.sim_tags, &config.mappings.sensors, block) {
        Some(values) => {
            if let Err(e) = connections.write_registers(block.start, &values).await {
                warn!(error = %e, "failed to write sensor registers to controller");
            } else {
                debug!(count = values.len(), "sensor registers written");
            }
        }
        None => {
            debug!("register batch skipped, incomplete sensor set this cycle");
        }
    }

    Ok(())
}

fn both_connected(snapshot: &StateSnapshot) -> bool {
    let connected = |endpoint| {
        snapshot
            .connections
            .get(&endpoint)
            .is_some_and(|h| h.connected)
    };
    connected(Endpoint::Plc) && connected(Endpoint::Cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MappingConfig;
    use std::sync::Mutex;

    fn sensor_mappings() -> Vec<SensorMapping> {
        MappingConfig::default().sensors
    }

    fn full_tag_set() -> HashMap<String, TagValue> {
        HashMap::from([
            ("sim_SoilMoisture".to_string(), TagValue::Int(300)),
            ("sim_Temperature".to_string(), TagValue::Int(40)),
            ("sim_Humidity".to_string(), TagValue::Int(40)),
            ("sim_WaterFlow".to_string(), TagValue::Int(500)),
            ("sim_Pressure".to_string(), TagValue::Int(90)),
        ])
    }

    const BLOCK: Block = Block { start: 0, count: 5 };

    #[test]
    fn test_full_sensor_set_writes_block_in_address_order() {
        let batch = register_batch(&full_tag_set(), &sensor_mappings(), BLOCK);
        assert_eq!(batch, Some(vec![300, 40, 40, 500, 90]));
    }

    #[test]
    fn test_missing_sensor_skips_whole_batch() {
        let mut tags = full_tag_set();
        tags.remove("sim_Humidity");
        assert_eq!(register_batch(&tags, &sensor_mappings(), BLOCK), None);
    }

    #[test]
    fn test_non_coercible_sensor_skips_whole_batch() {
        let mut tags = full_tag_set();
        tags.insert("sim_Pressure".to_string(), TagValue::Int(-5));
        assert_eq!(register_batch(&tags, &sensor_mappings(), BLOCK), None);

        tags.insert("sim_Pressure".to_string(), TagValue::Float(f64::NAN));
        assert_eq!(register_batch(&tags, &sensor_mappings(), BLOCK), None);
    }

    #[test]
    fn test_float_sensors_truncate() {
        let mut tags = full_tag_set();
        tags.insert("sim_Temperature".to_string(), TagValue::Float(40.7));
        let batch = register_batch(&tags, &sensor_mappings(), BLOCK);
        assert_eq!(batch, Some(vec![300, 40, 40, 500, 90]));
    }

    #[test]
    fn test_unmapped_slots_zero_filled() {
        let mappings = vec![
            SensorMapping {
                tag: "sim_A".to_string(),
                address: 1,
            },
            SensorMapping {
                tag: "sim_B".to_string(),
                address: 3,
            },
        ];
        let tags = HashMap::from([
            ("sim_A".to_string(), TagValue::Int(7)),
            ("sim_B".to_string(), TagValue::Int(9)),
        ]);
        let batch = register_batch(&tags, &mappings, Block { start: 0, count: 5 });
        assert_eq!(batch, Some(vec![0, 7, 0, 9, 0]));
    }

    #[test]
    fn test_block_offset_respected() {
        let mappings = vec![SensorMapping {
            tag: "sim_A".to_string(),
            address: 11,
        }];
        let tags = HashMap::from([("sim_A".to_string(), TagValue::Int(42))]);
        let batch = register_batch(&tags, &mappings, Block { start: 10, count: 3 });
        assert_eq!(batch, Some(vec![0, 42, 0]));
    }

    #[test]
    fn test_actuator_plan_skips_unread_coils() {
        let mappings = MappingConfig::default().actuators;
        let coils = HashMap::from([(0, true)]); // coil 1 never polled
        let plan = actuator_plan(&coils, &mappings);
        assert_eq!(plan, vec![("sim_PumpControl".to_string(), true)]);
    }

    /// Records attempted writes and fails on one chosen tag.
    struct FlakySink {
        fail_on: &'static str,
        attempts: Mutex<Vec<String>>,
    }

    impl CoilSink for FlakySink {
        async fn set_actuator(&self, tag: &str, _value: bool) -> bool {
            self.attempts.lock().unwrap().push(tag.to_string());
            tag != self.fail_on
        }
    }

    #[tokio::test]
    async fn test_one_failed_actuator_write_does_not_stop_the_rest() {
        let plan = vec![
            ("sim_PumpControl".to_string(), true),
            ("sim_ValveControl".to_string(), false),
            ("sim_Heater".to_string(), true),
        ];
        let sink = FlakySink {
            fail_on: "sim_ValveControl",
            attempts: Mutex::new(Vec::new()),
        };

        let written = push_actuators(&plan, &sink).await;

        assert_eq!(written, 2);
        let attempts = sink.attempts.lock().unwrap();
        assert_eq!(
            *attempts,
            vec!["sim_PumpControl", "sim_ValveControl", "sim_Heater"]
        );
    }
}
