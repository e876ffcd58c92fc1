//! The three-field outcome record returned for every action.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a single action as reported back to the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Not started yet
    #[default]
    Idle,
    /// In progress
    Running,
    /// Finished normally
    Succeeded,
    /// Finished with an expected or unexpected failure
    Failed,
}

impl StepStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Idle => "idle",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an action.
///
/// `action_log` accumulates diagnostics; failure reasons land there. When the
/// owning request is a file result, `action_msg` holds the artifact path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    /// Final status of the action
    pub action_response: StepStatus,
    /// Human-readable outcome, or the artifact path
    pub action_msg: String,
    /// Diagnostics and failure reasons
    pub action_log: String,
}

impl StepResult {
    /// Result with every field given.
    pub fn new(
        action_response: StepStatus,
        action_msg: impl Into<String>,
        action_log: impl Into<String>,
    ) -> Self {
        Self {
            action_response,
            action_msg: action_msg.into(),
            action_log: action_log.into(),
        }
    }

    /// Succeeded with `msg`.
    pub fn succeeded(msg: impl Into<String>) -> Self {
        Self::new(StepStatus::Succeeded, msg, "")
    }

    /// Failed; `reason` goes to `action_log`.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::new(StepStatus::Failed, "", reason)
    }

    /// Whether the action succeeded.
    pub fn is_success(&self) -> bool {
        self.action_response == StepStatus::Succeeded
    }

    /// Appends `text` verbatim to `action_log`.
    pub fn append_log(&mut self, text: &str) {
        self.action_log.push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle_and_empty() {
        let result = StepResult::default();
        assert_eq!(result.action_response, StepStatus::Idle);
        assert!(result.action_msg.is_empty());
        assert!(result.action_log.is_empty());
    }

    #[test]
    fn test_json_shape() {
        let result = StepResult::failed("Module is Busy");
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "action_response": "failed",
                "action_msg": "",
                "action_log": "Module is Busy",
            })
        );
    }

    #[test]
    fn test_failure_reason_goes_to_log() {
        let mut result = StepResult::failed("Errors occurred during plate read: ");
        result.append_log("lid open");
        assert!(!result.is_success());
        assert_eq!(result.action_log, "Errors occurred during plate read: lid open");
    }
}
