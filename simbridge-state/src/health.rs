//! Per-endpoint connection health and staleness classification.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The external systems the bridge tracks.
///
/// `Scada` and `Mqtt` are inert placeholders: they always carry a default
/// disconnected health record and no connection logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// The OpenPLC controller, reached over Modbus TCP.
    Plc,
    /// The simulation key-value store.
    Cache,
    /// The liveness beacon fed by an external viewer client.
    Beacon,
    /// Placeholder for a SCADA frontend integration.
    Scada,
    /// Placeholder for a message-bus integration.
    Mqtt,
}

impl Endpoint {
    /// All tracked endpoints, in display order.
    pub const ALL: [Endpoint; 5] = [
        Endpoint::Plc,
        Endpoint::Cache,
        Endpoint::Beacon,
        Endpoint::Scada,
        Endpoint::Mqtt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Plc => "plc",
            Endpoint::Cache => "cache",
            Endpoint::Beacon => "beacon",
            Endpoint::Scada => "scada",
            Endpoint::Mqtt => "mqtt",
        }
    }

    /// Multiplier applied to the base connection timeout when classifying
    /// staleness. The beacon is pinged by an independent client at its own
    /// cadence, so it gets a longer window than the polled endpoints.
    pub fn timeout_factor(&self) -> u32 {
        match self {
            Endpoint::Beacon => 2,
            _ => 1,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection health for one endpoint.
///
/// Overwritten wholesale by whoever owns the endpoint (the polling loop for
/// PLC/cache, the inbound ping for the beacon); staleness is derived at read
/// time by [`status_color`], never stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointHealth {
    /// Whether the last interaction with the endpoint succeeded.
    pub connected: bool,
    /// Timestamp of the last successful interaction (millis since epoch).
    pub last_ok: i64,
    /// Human-readable failure reason, empty when healthy.
    pub error: String,
}

/// Dashboard-facing health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
    /// Not connected.
    Red,
    /// Connected but the last success is older than the timeout.
    Yellow,
    /// Connected and fresh.
    Green,
}

impl std::fmt::Display for StatusColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusColor::Red => write!(f, "red"),
            StatusColor::Yellow => write!(f, "yellow"),
            StatusColor::Green => write!(f, "green"),
        }
    }
}

/// Classify an endpoint's health at `now_ms`.
///
/// Red always wins when `connected` is false, regardless of `last_ok`.
pub fn status_color(
    endpoint: Endpoint,
    health: &EndpointHealth,
    timeout: Duration,
    now_ms: i64,
) -> StatusColor {
    if !health.connected {
        return StatusColor::Red;
    }
    let window = timeout.as_millis() as i64 * i64::from(endpoint.timeout_factor());
    if now_ms - health.last_ok < window {
        StatusColor::Green
    } else {
        StatusColor::Yellow
    }
}
