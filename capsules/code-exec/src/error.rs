use std::io;

use thiserror::Error;

use crate::event::{ErrorInfo, ExecStatus};

/// Failures raised by the execution core.
///
/// Only `Validation`, `UnsupportedLanguage` and `Busy` ever reach the caller
/// as an `Err`; every other variant is folded into the terminal result of
/// the execution it belongs to.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Invalid execution request: {message}")]
    Validation { message: String },
    #[error("Unsupported language '{language}'")]
    UnsupportedLanguage { language: String },
    #[error("{message}: {source}")]
    Workspace {
        message: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to launch isolation runtime {runtime}: {source}")]
    Launch {
        runtime: String,
        #[source]
        source: io::Error,
    },
    #[error("Execution capacity exhausted ({limit} concurrent executions)")]
    Busy { limit: usize },
    #[error("Internal supervisor error: {message}")]
    Internal { message: String },
}

impl ExecError {
    pub fn validation(message: impl Into<String>) -> Self {
        ExecError::Validation {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ExecError::Internal {
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ExecError::Validation { .. } => "EXEC_INVALID_REQUEST",
            ExecError::UnsupportedLanguage { .. } => "EXEC_UNSUPPORTED_LANGUAGE",
            ExecError::Workspace { .. } => "EXEC_WORKSPACE_ERROR",
            ExecError::Launch { .. } => "EXEC_LAUNCH_ERROR",
            ExecError::Busy { .. } => "EXEC_BUSY",
            ExecError::Internal { .. } => "EXEC_INTERNAL_ERROR",
        }
    }

    /// True for request problems that are rejected before any resource is allocated.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ExecError::Validation { .. } | ExecError::UnsupportedLanguage { .. }
        )
    }

    /// Terminal status reported when this error aborts an accepted execution.
    pub fn status(&self) -> ExecStatus {
        match self {
            ExecError::Workspace { .. } => ExecStatus::StorageError,
            ExecError::Launch { .. } => ExecStatus::SandboxError,
            _ => ExecStatus::InternalError,
        }
    }

    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}
