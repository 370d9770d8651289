//! Shared result types passed between the sandbox engine, the orchestrator
//! and the CLI.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal state of one sandbox run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    TimedOut,
    ResourceExceeded,
    Crashed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::TimedOut => "timed_out",
            RunStatus::ResourceExceeded => "resource_exceeded",
            RunStatus::Crashed => "crashed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of running agent code once.
///
/// `output` is only set when the code returned a value. `logs` holds every
/// line collected before the run ended, including on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub status: RunStatus,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn completed(output: Option<Value>, logs: Vec<String>, duration_ms: u64) -> Self {
        Self {
            output,
            logs,
            error: None,
            status: RunStatus::Completed,
            duration_ms,
        }
    }

    pub fn failed(
        status: RunStatus,
        error: impl Into<String>,
        logs: Vec<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            output: None,
            logs,
            error: Some(error.into()),
            status,
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status == RunStatus::Completed
    }

    /// Error class prefix (`IsolationTimeout`, `RuntimeException`, ...).
    pub fn error_class(&self) -> Option<&str> {
        self.error
            .as_deref()
            .map(|e| e.split_once(':').map(|(class, _)| class).unwrap_or(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialized_shape() {
        let r = ExecutionResult::completed(Some(json!({"n": 1})), vec!["hi".into()], 12);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["status"], "completed");
        assert_eq!(v["output"]["n"], 1);
        assert!(v.get("error").is_none());
    }

    #[test]
    fn test_error_class() {
        let r = ExecutionResult::failed(
            RunStatus::TimedOut,
            "IsolationTimeout: exceeded 2s wall clock",
            vec![],
            2000,
        );
        assert!(!r.is_success());
        assert_eq!(r.error_class(), Some("IsolationTimeout"));
        assert_eq!(r.output, None);
    }
}
