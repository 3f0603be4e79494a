//! Per-request state machine driving one execution from workspace to result.

use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ExecError;
use crate::event::{
    ErrorInfo, ExecEvent, ExecStatus, ExecutionResult, ProgressEvent, ProgressStage,
    TIMEOUT_EXIT_CODE,
};
use crate::gate::{ConcurrencyGate, GatePermit};
use crate::language::LanguageProfile;
use crate::launcher::{Launcher, ProcessHandle, ResourceLimits};
use crate::request::ExecutionRequest;
use crate::workspace::{Workspace, WorkspaceManager};

const READ_CHUNK: usize = 8 * 1024;
/// How long output readers may keep going once the process group is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Process-wide collaborators shared by every supervisor.
#[derive(Debug)]
pub struct ExecutionContext {
    pub workspaces: WorkspaceManager,
    pub launcher: Launcher,
    pub gate: ConcurrencyGate,
    pub limits: ResourceLimits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    WorkspaceReady,
    Launching,
    Running,
    Finalizing,
    Done,
    Aborted,
}

impl SupervisorState {
    /// Transitions form a single forward path; `Aborted` is reachable from
    /// every non-terminal state before `Finalizing`.
    pub fn can_transition_to(&self, next: SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Idle, WorkspaceReady)
                | (WorkspaceReady, Launching)
                | (Launching, Running)
                | (Running, Finalizing)
                | (Finalizing, Done)
                | (Idle | WorkspaceReady | Launching | Running, Aborted)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SupervisorState::Done | SupervisorState::Aborted)
    }
}

/// Drives one accepted request. The only writer of its event channel.
pub struct Supervisor {
    context: Arc<ExecutionContext>,
    execution_id: String,
    request: ExecutionRequest,
    profile: LanguageProfile,
    permit: Option<GatePermit>,
    events: mpsc::Sender<ExecEvent>,
    state: SupervisorState,
    started: Instant,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

enum Trigger {
    Exited(io::Result<ExitStatus>),
    Deadline,
    Cancelled,
}

struct Outcome {
    exit: io::Result<ExitStatus>,
    timed_out: bool,
    stdout: Capture,
    stderr: Capture,
}

impl Supervisor {
    /// `permit` is already held when the gate rejects instead of queueing;
    /// otherwise the supervisor waits for one after the workspace is ready.
    pub fn new(
        context: Arc<ExecutionContext>,
        execution_id: String,
        request: ExecutionRequest,
        profile: LanguageProfile,
        permit: Option<GatePermit>,
        events: mpsc::Sender<ExecEvent>,
    ) -> Self {
        Self {
            context,
            execution_id,
            request,
            profile,
            permit,
            events,
            state: SupervisorState::Idle,
            started: Instant::now(),
            cancelled: false,
        }
    }

    /// Run to a terminal state, emitting progress records and finally the result.
    pub async fn run(mut self) -> SupervisorState {
        self.emit_progress(ProgressStage::Connecting).await;

        let acquired = self
            .context
            .workspaces
            .acquire(&self.execution_id, &self.request.code, &self.profile)
            .await;
        let workspace = match acquired {
            Ok(workspace) => workspace,
            Err(err) => return self.abort(err, None).await,
        };
        self.transition(SupervisorState::WorkspaceReady);
        self.emit_progress(ProgressStage::Connected).await;

        if self.permit.is_none() {
            let gate = self.context.gate.clone();
            let admitted = tokio::select! {
                permit = gate.acquire() => Some(permit),
                _ = self.events.closed() => None,
            };
            match admitted {
                Some(Ok(permit)) => self.permit = Some(permit),
                Some(Err(err)) => return self.abort(err, Some(workspace)).await,
                None => return self.abandon(workspace).await,
            }
        }

        if self.cancelled || self.events.is_closed() {
            return self.abandon(workspace).await;
        }

        self.transition(SupervisorState::Launching);
        self.emit_progress(ProgressStage::SandboxInitializing).await;

        let launched = self
            .context
            .launcher
            .launch(&workspace, &self.profile, self.context.limits);
        let mut process = match launched {
            Ok(process) => process,
            Err(err) => return self.abort(err, Some(workspace)).await,
        };
        self.transition(SupervisorState::Running);
        debug!(pid = ?process.pid(), "isolated process started");
        self.emit_progress(ProgressStage::Executing).await;

        let outcome = self.supervise(&mut process).await;
        drop(process);
        self.finalize(workspace, outcome).await
    }

    /// Race the exit against the deadline and the caller going away, then
    /// collect whatever output was captured.
    async fn supervise(&mut self, process: &mut ProcessHandle) -> Outcome {
        let limits = process.limits();
        let mut stdout = spawn_reader(process.take_stdout(), limits.max_output_bytes);
        let mut stderr = spawn_reader(process.take_stderr(), limits.max_output_bytes);

        let trigger = tokio::select! {
            status = process.wait() => Trigger::Exited(status),
            _ = tokio::time::sleep(limits.timeout) => Trigger::Deadline,
            _ = self.events.closed() => Trigger::Cancelled,
        };

        let (exit, timed_out) = match trigger {
            Trigger::Exited(status) => (status, false),
            Trigger::Deadline => {
                warn!(
                    timeout = %humantime::format_duration(limits.timeout),
                    "execution exceeded its time budget; terminating"
                );
                (process.terminate(limits.kill_grace).await, true)
            }
            Trigger::Cancelled => {
                self.cancelled = true;
                info!("caller went away; terminating execution");
                (process.terminate(limits.kill_grace).await, false)
            }
        };
        process.kill_stragglers();

        Outcome {
            exit,
            timed_out,
            stdout: collect(&mut stdout, "stdout").await,
            stderr: collect(&mut stderr, "stderr").await,
        }
    }

    async fn finalize(mut self, mut workspace: Workspace, outcome: Outcome) -> SupervisorState {
        self.transition(SupervisorState::Finalizing);
        self.permit.take();
        self.emit_progress(ProgressStage::Finalizing).await;

        if let Err(err) = workspace.release_async().await {
            warn!(error = %err, "failed to release workspace");
        }

        let result = self.assemble(outcome);
        self.transition(SupervisorState::Done);
        info!(
            status = ?result.status,
            exit_code = ?result.exit_code,
            duration_ms = result.duration_ms,
            truncated = result.truncated,
            "execution finished"
        );
        self.emit(ExecEvent::Result(result)).await;
        self.state
    }

    async fn abort(mut self, err: ExecError, workspace: Option<Workspace>) -> SupervisorState {
        match err {
            ExecError::Workspace { .. } | ExecError::Launch { .. } => {
                error!(code = err.code(), error = %err, "execution aborted")
            }
            _ => warn!(code = err.code(), error = %err, "execution aborted"),
        }

        self.transition(SupervisorState::Aborted);
        self.permit.take();
        if let Some(mut workspace) = workspace {
            if let Err(release_err) = workspace.release_async().await {
                warn!(error = %release_err, "failed to release workspace");
            }
        }

        let result = ExecutionResult {
            execution_id: self.execution_id.clone(),
            language: self.profile.name.clone(),
            status: err.status(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            timed_out: false,
            truncated: false,
            duration_ms: self.elapsed_ms(),
            error: Some(err.info()),
        };
        self.emit(ExecEvent::Result(result)).await;
        self.state
    }

    /// The caller disappeared before anything was launched.
    async fn abandon(mut self, mut workspace: Workspace) -> SupervisorState {
        info!("caller went away before launch; abandoning execution");
        self.transition(SupervisorState::Aborted);
        self.permit.take();
        if let Err(err) = workspace.release_async().await {
            warn!(error = %err, "failed to release workspace");
        }
        self.state
    }

    fn assemble(&self, outcome: Outcome) -> ExecutionResult {
        let (status, exit_code, error) = classify(&outcome.exit, outcome.timed_out);
        ExecutionResult {
            execution_id: self.execution_id.clone(),
            language: self.profile.name.clone(),
            status,
            stdout: String::from_utf8_lossy(&outcome.stdout.bytes).into_owned(),
            stderr: String::from_utf8_lossy(&outcome.stderr.bytes).into_owned(),
            exit_code,
            timed_out: outcome.timed_out,
            truncated: outcome.stdout.truncated || outcome.stderr.truncated,
            duration_ms: self.elapsed_ms(),
            error,
        }
    }

    fn transition(&mut self, next: SupervisorState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal supervisor transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(from = ?self.state, to = ?next, "supervisor state change");
        self.state = next;
    }

    async fn emit_progress(&mut self, stage: ProgressStage) {
        self.emit(ExecEvent::Progress(ProgressEvent::new(stage))).await;
    }

    async fn emit(&mut self, event: ExecEvent) {
        if self.cancelled {
            return;
        }
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped");
            self.cancelled = true;
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

fn classify(
    exit: &io::Result<ExitStatus>,
    timed_out: bool,
) -> (ExecStatus, Option<i32>, Option<ErrorInfo>) {
    if timed_out {
        return (ExecStatus::Timeout, Some(TIMEOUT_EXIT_CODE), None);
    }

    let status = match exit {
        Ok(status) => status,
        Err(err) => {
            let err = ExecError::internal(format!("failed to wait for process: {}", err));
            return (err.status(), None, Some(err.info()));
        }
    };

    match status.code() {
        Some(0) => (ExecStatus::Ok, Some(0), None),
        Some(code) => (ExecStatus::Error, Some(code), None),
        None => (ExecStatus::Interrupted, signal_exit_code(status), None),
    }
}

#[cfg(unix)]
fn signal_exit_code(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|signal| 128 + signal)
}

#[cfg(not(unix))]
fn signal_exit_code(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Read a stream to EOF, keeping at most `cap` bytes. Excess output is still
/// consumed so the writer never blocks on a full pipe.
fn spawn_reader<R>(reader: Option<R>, cap: usize) -> JoinHandle<io::Result<Capture>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut capture = Capture::default();
        let Some(mut reader) = reader else {
            return Ok(capture);
        };

        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let read = reader.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            let room = cap.saturating_sub(capture.bytes.len());
            if read > room {
                capture.truncated = true;
            }
            capture.bytes.extend_from_slice(&chunk[..read.min(room)]);
        }
        Ok(capture)
    })
}

async fn collect(task: &mut JoinHandle<io::Result<Capture>>, stream: &'static str) -> Capture {
    match tokio::time::timeout(DRAIN_TIMEOUT, &mut *task).await {
        Ok(Ok(Ok(capture))) => capture,
        Ok(Ok(Err(err))) => {
            warn!(stream, error = %err, "failed to read process output");
            Capture::default()
        }
        Ok(Err(err)) => {
            warn!(stream, error = %err, "output reader task failed");
            Capture::default()
        }
        Err(_) => {
            task.abort();
            warn!(stream, "output stream still open after process exit; discarding");
            Capture::default()
        }
    }
}
