//! Entry point used by request coordinators: validate, admit, supervise.

use anyhow::{Context as _, Result};
use futures_util::{Stream, StreamExt};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::config::ExecConfig;
use crate::error::ExecError;
use crate::event::{ExecEvent, ExecutionResult};
use crate::gate::{ConcurrencyGate, GatePolicy};
use crate::launcher::Launcher;
use crate::request::ExecutionRequest;
use crate::supervisor::{ExecutionContext, Supervisor, SupervisorState};
use crate::workspace::WorkspaceManager;

/// Shared handle for submitting executions. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ExecutionService {
    config: Arc<ExecConfig>,
    context: Arc<ExecutionContext>,
}

impl ExecutionService {
    pub fn new(config: ExecConfig) -> Result<Self> {
        config
            .validate()
            .context("invalid execution configuration")?;

        let context = ExecutionContext {
            workspaces: WorkspaceManager::new(config.scratch_root.clone()),
            launcher: Launcher::new(&config),
            gate: ConcurrencyGate::new(config.max_concurrency, config.gate_policy),
            limits: config.limits(),
        };

        Ok(Self {
            config: Arc::new(config),
            context: Arc::new(context),
        })
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.context.gate
    }

    /// Resolve the isolation runtime without starting anything.
    pub fn preflight(&self) -> Result<PathBuf, ExecError> {
        self.context.launcher.preflight()
    }

    /// Accept `request` and start supervising it.
    ///
    /// Validation failures and, under the reject policy, a full gate are
    /// returned here before any workspace exists. Everything after that is
    /// reported in-band as the stream's terminal record.
    pub fn submit(&self, request: ExecutionRequest) -> Result<ExecutionStream, ExecError> {
        let profile = request
            .validate(&self.config.languages, &self.config.default_language)?
            .clone();

        let permit = match self.context.gate.policy() {
            GatePolicy::Reject => Some(self.context.gate.try_admit()?),
            GatePolicy::Queue => None,
        };

        let execution_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.config.event_buffer);
        let span = info_span!(
            "execution",
            execution = %execution_id,
            language = %profile.name
        );

        debug!(execution = %execution_id, language = %profile.name, "execution accepted");
        let supervisor = Supervisor::new(
            Arc::clone(&self.context),
            execution_id.clone(),
            request,
            profile,
            permit,
            tx,
        );
        let supervision = tokio::spawn(supervisor.run().instrument(span));

        Ok(ExecutionStream {
            execution_id,
            events: rx,
            supervision,
        })
    }

    /// Submit and wait for the terminal result, discarding progress records.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        let mut stream = self.submit(request)?;
        let mut terminal = None;
        while let Some(event) = stream.next().await {
            if let ExecEvent::Result(result) = event {
                terminal = Some(result);
            }
        }
        terminal.ok_or_else(|| ExecError::internal("execution ended without a result"))
    }
}

/// Ordered events of one execution, ending with its result.
///
/// Dropping the stream cancels the execution: the isolated process is
/// terminated and its workspace removed.
#[derive(Debug)]
pub struct ExecutionStream {
    execution_id: String,
    events: mpsc::Receiver<ExecEvent>,
    supervision: JoinHandle<SupervisorState>,
}

impl ExecutionStream {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Cancel the execution and return the supervisor task so callers can
    /// wait for cleanup to finish.
    pub fn cancel(self) -> JoinHandle<SupervisorState> {
        let ExecutionStream {
            events,
            supervision,
            ..
        } = self;
        drop(events);
        supervision
    }
}

impl Stream for ExecutionStream {
    type Item = ExecEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}
