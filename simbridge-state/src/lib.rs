//! Shared state model for the simbridge PLC/simulation bridge.
//!
//! This crate holds the data types shared between the bridge loops and the
//! read-only consumers (dashboard, test harness):
//!
//! - [`health`] - Per-endpoint connection health and staleness classification
//! - [`value`] - Simulation tag values and register coercion
//! - [`history`] - Bounded time-series ring buffers
//! - [`testresult`] - Acceptance-test scenario results
//! - [`store`] - The thread-safe consolidated [`store::StateStore`]

pub mod health;
pub mod history;
pub mod store;
pub mod testresult;
pub mod value;

// Re-export commonly used types at the crate root
pub use health::{Endpoint, EndpointHealth, StatusColor, status_color};
pub use history::{HistoryPoint, HistorySeries};
pub use store::{LatestValues, StateSnapshot, StateStore, SystemError};
pub use testresult::{TestResult, TestStatus};
pub use value::TagValue;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
