//! Supervised execution of untrusted code inside an external isolation runtime.
//!
//! A request's code is written into a private scratch workspace, run under the
//! isolation runtime with networking disabled, and reported back as an ordered
//! stream of progress records ending in exactly one terminal result. The
//! workspace and the process never outlive the request: timeouts and callers
//! that go away both take the same termination path.

pub mod config;
pub mod encoder;
pub mod error;
pub mod event;
pub mod gate;
pub mod language;
pub mod launcher;
pub mod request;
pub mod service;
pub mod supervisor;
pub mod workspace;

pub use config::ExecConfig;
pub use error::ExecError;
pub use event::{
    ErrorInfo, ExecEvent, ExecStatus, ExecutionResult, ProgressEvent, ProgressStage,
    TIMEOUT_EXIT_CODE,
};
pub use gate::{ConcurrencyGate, GatePolicy};
pub use language::{LanguageProfile, LanguageRegistry, FILE_PLACEHOLDER};
pub use launcher::{Launcher, ResourceLimits};
pub use request::ExecutionRequest;
pub use service::{ExecutionService, ExecutionStream};
pub use supervisor::SupervisorState;
pub use workspace::{Workspace, WorkspaceManager};
