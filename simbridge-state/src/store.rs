//! The thread-safe consolidated state store.
//!
//! The store is the sole point of communication between the polling loop,
//! the synchronization loop and the read-only consumers. All mutation and
//! all snapshot reads happen under one mutex; snapshots are deep copies and
//! never alias live internal storage.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::health::{Endpoint, EndpointHealth, StatusColor, status_color};
use crate::history::{HistoryPoint, HistorySeries};
use crate::now_millis;
use crate::testresult::TestResult;
use crate::value::TagValue;

/// Maximum retained system-error entries.
const ERROR_LOG_CAPACITY: usize = 50;

/// One entry in the system error log.
#[derive(Debug, Clone, Serialize)]
pub struct SystemError {
    /// When the error was recorded (millis since epoch).
    pub timestamp: i64,
    pub message: String,
}

/// Deep copy of the whole state aggregate, safe to hand to callers and
/// serialize without further synchronization.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub connections: HashMap<Endpoint, EndpointHealth>,
    pub coils: HashMap<u16, bool>,
    pub input_registers: HashMap<u16, u16>,
    pub sim_tags: HashMap<String, TagValue>,
    pub history: HashMap<String, Vec<HistoryPoint>>,
    pub system_errors: Vec<SystemError>,
    pub test_results: HashMap<u32, TestResult>,
}

/// Latest addressed and named values only.
#[derive(Debug, Clone, Serialize)]
pub struct LatestValues {
    pub coils: HashMap<u16, bool>,
    pub input_registers: HashMap<u16, u16>,
    pub sim_tags: HashMap<String, TagValue>,
}

#[derive(Debug)]
struct StateInner {
    connections: HashMap<Endpoint, EndpointHealth>,
    coils: HashMap<u16, bool>,
    input_registers: HashMap<u16, u16>,
    sim_tags: HashMap<String, TagValue>,
    history: HashMap<String, HistorySeries>,
    system_errors: VecDeque<SystemError>,
    test_results: HashMap<u32, TestResult>,
}

/// Thread-safe holder of the bridge's consolidated state.
#[derive(Debug)]
pub struct StateStore {
    inner: Mutex<StateInner>,
    history_capacity: usize,
}

impl StateStore {
    /// Create a store with every tracked endpoint seeded as disconnected.
    ///
    /// Seeding up front keeps the placeholder endpoints (`scada`, `mqtt`)
    /// visible as stable health records even though nothing ever drives them.
    pub fn new(history_capacity: usize) -> Self {
        let connections = Endpoint::ALL
            .iter()
            .map(|e| (*e, EndpointHealth::default()))
            .collect();

        Self {
            inner: Mutex::new(StateInner {
                connections,
                coils: HashMap::new(),
                input_registers: HashMap::new(),
                sim_tags: HashMap::new(),
                history: HashMap::new(),
                system_errors: VecDeque::new(),
                test_results: HashMap::new(),
            }),
            history_capacity,
        }
    }

    /// Overwrite the health record for an endpoint. The caller supplies the
    /// full new truth; there is no merge logic.
    pub fn update_health(
        &self,
        endpoint: Endpoint,
        connected: bool,
        last_ok: i64,
        error: impl Into<String>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.connections.insert(
            endpoint,
            EndpointHealth {
                connected,
                last_ok,
                error: error.into(),
            },
        );
    }

    /// Record an inbound liveness ping from the beacon client.
    pub fn record_beacon_ping(&self, now_ms: i64) {
        self.update_health(Endpoint::Beacon, true, now_ms, "");
    }

    /// Merge freshly polled coil values by address.
    pub fn merge_coils(&self, coils: HashMap<u16, bool>) {
        let mut inner = self.inner.lock().unwrap();
        inner.coils.extend(coils);
    }

    /// Merge freshly polled input-register values by address, appending a
    /// `PLC_IW_<addr>` history point for each.
    pub fn merge_input_registers(&self, registers: HashMap<u16, u16>) {
        let now = now_millis();
        let mut inner = self.inner.lock().unwrap();
        let capacity = self.history_capacity;
        for (addr, value) in registers {
            inner.input_registers.insert(addr, value);
            inner
                .history
                .entry(format!("PLC_IW_{}", addr))
                .or_insert_with(|| HistorySeries::new(capacity))
                .push(now, TagValue::from(value));
        }
    }

    /// Merge freshly polled simulation tags by name, appending history for
    /// numeric values only.
    pub fn merge_sim_tags(&self, tags: HashMap<String, TagValue>) {
        let now = now_millis();
        let mut inner = self.inner.lock().unwrap();
        let capacity = self.history_capacity;
        for (tag, value) in tags {
            if value.is_numeric() {
                inner
                    .history
                    .entry(tag.clone())
                    .or_insert_with(|| HistorySeries::new(capacity))
                    .push(now, value);
            }
            inner.sim_tags.insert(tag, value);
        }
    }

    /// Append to the bounded system error log.
    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(error = %message, "recording system error");
        let mut inner = self.inner.lock().unwrap();
        if inner.system_errors.len() == ERROR_LOG_CAPACITY {
            inner.system_errors.pop_front();
        }
        inner.system_errors.push_back(SystemError {
            timestamp: now_millis(),
            message,
        });
    }

    /// Overwrite the result record for a scenario.
    pub fn update_test_result(&self, scenario_id: u32, result: TestResult) {
        let mut inner = self.inner.lock().unwrap();
        inner.test_results.insert(scenario_id, result);
    }

    /// Deep copy of the whole aggregate.
    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.lock().unwrap();
        StateSnapshot {
            connections: inner.connections.clone(),
            coils: inner.coils.clone(),
            input_registers: inner.input_registers.clone(),
            sim_tags: inner.sim_tags.clone(),
            history: inner
                .history
                .iter()
                .map(|(tag, series)| (tag.clone(), series.to_vec()))
                .collect(),
            system_errors: inner.system_errors.iter().cloned().collect(),
            test_results: inner.test_results.clone(),
        }
    }

    /// Health records only.
    pub fn health(&self) -> HashMap<Endpoint, EndpointHealth> {
        self.inner.lock().unwrap().connections.clone()
    }

    /// Derived health colors for every endpoint at `now_ms`.
    pub fn health_colors(
        &self,
        timeout: Duration,
        now_ms: i64,
    ) -> Vec<(Endpoint, StatusColor, EndpointHealth)> {
        let inner = self.inner.lock().unwrap();
        Endpoint::ALL
            .iter()
            .filter_map(|endpoint| {
                inner.connections.get(endpoint).map(|health| {
                    (
                        *endpoint,
                        status_color(*endpoint, health, timeout, now_ms),
                        health.clone(),
                    )
                })
            })
            .collect()
    }

    /// Latest addressed and named values.
    pub fn latest_values(&self) -> LatestValues {
        let inner = self.inner.lock().unwrap();
        LatestValues {
            coils: inner.coils.clone(),
            input_registers: inner.input_registers.clone(),
            sim_tags: inner.sim_tags.clone(),
        }
    }

    /// History for one tag, oldest point first. Empty for unknown tags.
    pub fn history(&self, tag: &str) -> Vec<HistoryPoint> {
        let inner = self.inner.lock().unwrap();
        inner.history.get(tag).map(HistorySeries::to_vec).unwrap_or_default()
    }

    /// All scenario results.
    pub fn test_results(&self) -> HashMap<u32, TestResult> {
        self.inner.lock().unwrap().test_results.clone()
    }

    /// Result for one scenario, if it has ever been registered.
    pub fn test_result(&self, scenario_id: u32) -> Option<TestResult> {
        self.inner.lock().unwrap().test_results.get(&scenario_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testresult::TestStatus;

    fn store() -> StateStore {
        StateStore::new(100)
    }

    #[test]
    fn test_endpoints_seeded_disconnected() {
        let health = store().health();
        assert_eq!(health.len(), Endpoint::ALL.len());
        for endpoint in Endpoint::ALL {
            let h = &health[&endpoint];
            assert!(!h.connected);
            assert_eq!(h.last_ok, 0);
        }
    }

    #[test]
    fn test_merge_retains_untouched_keys() {
        let store = store();
        store.merge_coils(HashMap::from([(0, true), (1, false)]));
        store.merge_coils(HashMap::from([(1, true)]));

        let values = store.latest_values();
        assert_eq!(values.coils[&0], true);
        assert_eq!(values.coils[&1], true);

        store.merge_sim_tags(HashMap::from([
            ("sim_Temperature".to_string(), TagValue::Int(25)),
            ("sim_Humidity".to_string(), TagValue::Int(60)),
        ]));
        store.merge_sim_tags(HashMap::from([(
            "sim_Temperature".to_string(),
            TagValue::Int(30),
        )]));

        let values = store.latest_values();
        assert_eq!(values.sim_tags["sim_Temperature"], TagValue::Int(30));
        assert_eq!(values.sim_tags["sim_Humidity"], TagValue::Int(60));
    }

    #[test]
    fn test_register_merge_appends_history() {
        let store = store();
        store.merge_input_registers(HashMap::from([(0, 300), (1, 40)]));
        store.merge_input_registers(HashMap::from([(0, 310)]));

        let history = store.history("PLC_IW_0");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value, TagValue::Int(300));
        assert_eq!(history[1].value, TagValue::Int(310));
        assert_eq!(store.history("PLC_IW_1").len(), 1);
        assert!(store.history("PLC_IW_7").is_empty());
    }

    #[test]
    fn test_only_numeric_tags_get_history() {
        let store = store();
        store.merge_sim_tags(HashMap::from([
            ("sim_WaterFlow".to_string(), TagValue::Float(12.5)),
            ("sim_PumpControl".to_string(), TagValue::Bool(true)),
        ]));

        assert_eq!(store.history("sim_WaterFlow").len(), 1);
        assert!(store.history("sim_PumpControl").is_empty());
        // The bool is still stored as a latest value
        assert_eq!(
            store.latest_values().sim_tags["sim_PumpControl"],
            TagValue::Bool(true)
        );
    }

    #[test]
    fn test_error_log_bounded() {
        let store = store();
        for i in 0..60 {
            store.record_error(format!("failure {}", i));
        }

        let errors = store.snapshot().system_errors;
        assert_eq!(errors.len(), ERROR_LOG_CAPACITY);
        assert_eq!(errors.first().unwrap().message, "failure 10");
        assert_eq!(errors.last().unwrap().message, "failure 59");
    }

    #[test]
    fn test_snapshot_is_detached_from_live_state() {
        let store = store();
        store.merge_coils(HashMap::from([(0, false)]));
        let before = store.snapshot();

        store.merge_coils(HashMap::from([(0, true), (1, true)]));
        store.update_health(Endpoint::Plc, true, 123, "");

        assert_eq!(before.coils.len(), 1);
        assert_eq!(before.coils[&0], false);
        assert!(!before.connections[&Endpoint::Plc].connected);
    }

    #[test]
    fn test_beacon_ping_updates_health() {
        let store = store();
        store.record_beacon_ping(42_000);

        let health = store.health();
        assert!(health[&Endpoint::Beacon].connected);
        assert_eq!(health[&Endpoint::Beacon].last_ok, 42_000);
    }

    #[test]
    fn test_test_result_overwrite() {
        let store = store();
        store.update_test_result(1, TestResult::not_started("scenario one"));
        assert_eq!(
            store.test_result(1).unwrap().status,
            TestStatus::NotStarted
        );

        store.update_test_result(1, TestResult::running("scenario one"));
        assert_eq!(store.test_result(1).unwrap().status, TestStatus::Running);
        assert!(store.test_result(2).is_none());
    }
}
