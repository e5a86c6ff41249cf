//! Execution report rows produced by the engine.

use serde::{Deserialize, Serialize};

use crate::outcome::{ActionResult, ActionStatus, ErrorInfo};

/// One row of the execution report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StepResult {
    /// Step name, annotated with `(iteration N)` or a `parent -> child` prefix where applicable.
    pub name: String,
    /// Action name, or `nested_steps` for a group's aggregate row.
    pub action: String,
    pub duration_ms: u64,
    pub result: ActionResult,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
    /// Number of attempts made (more than one only under `retry`).
    #[serde(default)]
    pub attempts: u32,
    /// Rows of a nested group, in execution order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StepResult>,
}

impl StepResult {
    pub fn new(name: impl Into<String>, action: impl Into<String>, result: ActionResult) -> Self {
        Self {
            name: name.into(),
            action: action.into(),
            result,
            ..Default::default()
        }
    }

    pub fn status(&self) -> ActionStatus {
        self.result.status()
    }
}

/// Overall status of a test case.
pub type TestStatus = ActionStatus;

/// Aggregated outcome of one test case run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub setup_steps: Vec<StepResult>,
    pub steps: Vec<StepResult>,
    pub teardown_steps: Vec<StepResult>,
    /// First technical error met in the setup or main phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_error: Option<ErrorInfo>,
}

impl TestResult {
    /// Counts main-phase rows by status, descending into group children.
    pub fn count(&self, status: ActionStatus) -> usize {
        fn walk(rows: &[StepResult], status: ActionStatus) -> usize {
            rows.iter()
                .map(|row| {
                    if row.children.is_empty() {
                        usize::from(row.status() == status)
                    } else {
                        walk(&row.children, status)
                    }
                })
                .sum()
        }
        walk(&self.steps, status)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ActionStatus::Passed | ActionStatus::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{ErrorCategory, ErrorInfo};

    #[test]
    fn count_descends_into_group_children() {
        let mut group = StepResult::new("group", "nested_steps", ActionResult::passed());
        group.children = vec![
            StepResult::new("group -> a", "log", ActionResult::passed()),
            StepResult::new("group -> b", "log", ActionResult::skipped()),
        ];
        let failing = StepResult::new(
            "broken",
            "http",
            ActionResult::error(ErrorInfo::new(ErrorCategory::Network, "CONNECTION_REFUSED", "dial tcp")),
        );
        let result = TestResult {
            name: "t".into(),
            status: ActionStatus::Error,
            duration_ms: 0,
            setup_steps: vec![],
            steps: vec![group, failing],
            teardown_steps: vec![],
            first_error: None,
        };
        assert_eq!(result.count(ActionStatus::Passed), 1);
        assert_eq!(result.count(ActionStatus::Skipped), 1);
        assert_eq!(result.count(ActionStatus::Error), 1);
        assert!(!result.is_success());
    }
}
