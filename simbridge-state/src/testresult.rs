//! Acceptance-test scenario results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one test scenario.
///
/// `NotStarted → Running → {CoilCheckPassed, CoilCheckFailed, Error}`, then
/// a recorded visual check moves a run to `Passed` (coil check passed and
/// the operator confirmed) or `VisualCheckFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    NotStarted,
    Running,
    CoilCheckPassed,
    CoilCheckFailed,
    VisualCheckFailed,
    Passed,
    Error,
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TestStatus::NotStarted => "not started",
            TestStatus::Running => "running",
            TestStatus::CoilCheckPassed => "coil check passed",
            TestStatus::CoilCheckFailed => "coil check failed",
            TestStatus::VisualCheckFailed => "visual check failed",
            TestStatus::Passed => "passed",
            TestStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Result record for one scenario, overwritten in place as the run advances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// Scenario display name.
    pub name: String,
    /// Current lifecycle state.
    pub status: TestStatus,
    /// Outcome of the coil comparison, `None` until checked.
    pub coil_pass: Option<bool>,
    /// Outcome of the operator's visual confirmation, `None` until recorded.
    pub visual_pass: Option<bool>,
    /// Failure description, `None` when the run is clean.
    pub error: Option<String>,
    /// Free-form run details (input method used, observed coil states).
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
}

impl TestResult {
    /// Fresh record for a scenario that has never been run.
    pub fn not_started(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TestStatus::NotStarted,
            coil_pass: None,
            visual_pass: None,
            error: None,
            details: HashMap::new(),
        }
    }

    /// Record for a scenario run that has just begun.
    pub fn running(name: impl Into<String>) -> Self {
        Self {
            status: TestStatus::Running,
            ..Self::not_started(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_states() {
        let r = TestResult::not_started("low moisture");
        assert_eq!(r.status, TestStatus::NotStarted);
        assert!(r.coil_pass.is_none());
        assert!(r.visual_pass.is_none());
        assert!(r.error.is_none());

        let r = TestResult::running("low moisture");
        assert_eq!(r.status, TestStatus::Running);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TestStatus::CoilCheckPassed).unwrap(),
            "\"coil_check_passed\""
        );
        assert_eq!(
            serde_json::to_string(&TestStatus::NotStarted).unwrap(),
            "\"not_started\""
        );
    }
}
