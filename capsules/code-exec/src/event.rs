use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exit code reported when the supervisor stopped a program for exceeding its time budget.
///
/// Real exit codes are always non-negative: signal deaths are reported as `128 + signal`.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// One record of an execution's event sequence.
///
/// Progress records and the terminal result travel over the same channel so
/// that their relative order is fixed by the sequence itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecEvent {
    Progress(ProgressEvent),
    Result(ExecutionResult),
}

impl ExecEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecEvent::Result(_))
    }

    pub fn as_result(&self) -> Option<&ExecutionResult> {
        match self {
            ExecEvent::Result(result) => Some(result),
            ExecEvent::Progress(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStage {
    Connecting,
    Connected,
    SandboxInitializing,
    Executing,
    Finalizing,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStage::Connecting => "connecting",
            ProgressStage::Connected => "connected",
            ProgressStage::SandboxInitializing => "sandbox-initializing",
            ProgressStage::Executing => "executing",
            ProgressStage::Finalizing => "finalizing",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            ProgressStage::Connecting => "Preparing workspace...",
            ProgressStage::Connected => "Workspace ready.",
            ProgressStage::SandboxInitializing => "Setting up gVisor sandbox...",
            ProgressStage::Executing => "Executing code...",
            ProgressStage::Finalizing => "Collecting results...",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(stage: ProgressStage) -> Self {
        Self {
            stage,
            message: stage.message().to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// How an accepted execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecStatus {
    /// The program exited with status 0.
    Ok,
    /// The program ran to completion with a non-zero status.
    Error,
    /// The program exceeded its wall-clock budget and was stopped.
    Timeout,
    /// The program was killed by a signal the supervisor did not send.
    Interrupted,
    /// Scratch storage could not be prepared.
    StorageError,
    /// The isolation runtime could not be started.
    SandboxError,
    InternalError,
}

impl ExecStatus {
    /// Statuses that describe the sandboxed program rather than the host environment.
    pub fn is_program_outcome(&self) -> bool {
        matches!(
            self,
            ExecStatus::Ok | ExecStatus::Error | ExecStatus::Timeout | ExecStatus::Interrupted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

/// Terminal record of an execution. Exactly one is produced per accepted request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub language: String,
    pub status: ExecStatus,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Absent only when no process was ever started.
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    pub duration_ms: f64,
    /// Populated only when the supervisor itself failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_result() -> ExecutionResult {
        ExecutionResult {
            execution_id: "exec-1".to_string(),
            language: "python".to_string(),
            status: ExecStatus::Ok,
            stdout: "hello\n".to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            timed_out: false,
            truncated: false,
            duration_ms: 12.5,
            error: None,
        }
    }

    #[test]
    fn progress_records_are_tagged_with_kebab_case_stage() {
        let event = ExecEvent::Progress(ProgressEvent::new(ProgressStage::SandboxInitializing));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "progress");
        assert_eq!(value["stage"], "sandbox-initializing");
        assert_eq!(value["message"], "Setting up gVisor sandbox...");
        assert!(value["timestamp"].is_string());
        assert!(!event.is_terminal());
    }

    #[test]
    fn terminal_record_carries_result_fields() {
        let event = ExecEvent::Result(sample_result());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "result");
        assert_eq!(value["status"], "OK");
        assert_eq!(value["exit_code"], 0);
        assert_eq!(value["stdout"], "hello\n");
        assert!(value.get("error").is_none());
        assert!(value.get("truncated").is_none());
        assert!(event.is_terminal());
    }

    #[test]
    fn failed_launch_serializes_null_exit_code_and_error() {
        let mut result = sample_result();
        result.status = ExecStatus::SandboxError;
        result.stdout.clear();
        result.exit_code = None;
        result.error = Some(ErrorInfo {
            code: "EXEC_LAUNCH_ERROR".to_string(),
            message: "runsc missing".to_string(),
        });

        let value = serde_json::to_value(ExecEvent::Result(result)).unwrap();
        assert_eq!(value["status"], "SANDBOX_ERROR");
        assert_eq!(value["exit_code"], json!(null));
        assert_eq!(value["error"]["code"], "EXEC_LAUNCH_ERROR");
    }

    #[test]
    fn program_outcomes_exclude_environment_failures() {
        assert!(ExecStatus::Timeout.is_program_outcome());
        assert!(ExecStatus::Error.is_program_outcome());
        assert!(!ExecStatus::SandboxError.is_program_outcome());
        assert!(!ExecStatus::StorageError.is_program_outcome());
    }
}
