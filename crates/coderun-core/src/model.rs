//! Submission and result types exchanged with callers of the sandbox.

use serde::{Deserialize, Serialize};

/// Status code reported for an execution that was killed at its deadline.
/// Real process exit codes are always in `0..=255`.
pub const TIMEOUT_SENTINEL: i64 = -1;

pub const TIMEOUT_MESSAGE: &str = "Execution timed out";

/// Source text to run. Content is never validated; the sandbox boundary is
/// the defence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceSubmission {
    pub code: String,
}

impl SourceSubmission {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The interpreter exited on its own, with any exit code.
    Completed,
    /// The instance was killed when the deadline elapsed.
    TimedOut,
}

/// Outcome of one execution attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i64,
    pub status: ExecutionStatus,
}

impl ExecutionResult {
    pub fn completed(stdout: impl Into<String>, stderr: impl Into<String>, returncode: i64) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            returncode,
            status: ExecutionStatus::Completed,
        }
    }

    /// Output captured before the kill is kept when the engine could still
    /// deliver it.
    pub fn timed_out(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        let stderr = stderr.into();
        let stderr = if stderr.is_empty() {
            TIMEOUT_MESSAGE.to_string()
        } else {
            format!("{}\n{}", stderr.trim_end(), TIMEOUT_MESSAGE)
        };
        Self {
            stdout: stdout.into(),
            stderr,
            returncode: TIMEOUT_SENTINEL,
            status: ExecutionStatus::TimedOut,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed && self.returncode == 0
    }

    pub fn is_timeout(&self) -> bool {
        self.status == ExecutionStatus::TimedOut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_completed_result_serializes_reference_shape() {
        let result = ExecutionResult::completed("hello\n", "", 0);
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(
            value,
            json!({
                "stdout": "hello\n",
                "stderr": "",
                "returncode": 0,
                "status": "completed"
            })
        );
        assert!(result.is_success());
    }

    #[test]
    fn test_timeout_result_uses_sentinel() {
        let result = ExecutionResult::timed_out("", "");

        assert_eq!(result.returncode, TIMEOUT_SENTINEL);
        assert_eq!(result.stderr, TIMEOUT_MESSAGE);
        assert_eq!(result.status, ExecutionStatus::TimedOut);
        assert!(result.is_timeout());
        assert!(!result.is_success());
    }

    #[test]
    fn test_timeout_keeps_partial_stderr() {
        let result = ExecutionResult::timed_out("tick\n", "warning\n");
        assert_eq!(result.stdout, "tick\n");
        assert_eq!(result.stderr, "warning\nExecution timed out");
    }

    #[test]
    fn test_nonzero_exit_is_not_success() {
        let result = ExecutionResult::completed("", "ZeroDivisionError", 1);
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert!(!result.is_success());
    }
}
