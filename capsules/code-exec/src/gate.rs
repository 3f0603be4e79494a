//! Process-wide bound on simultaneously running isolated processes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::error::ExecError;

/// What happens to a request when every slot is taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatePolicy {
    /// Wait for a slot before launching.
    #[default]
    Queue,
    /// Refuse the request up front with `ExecError::Busy`.
    Reject,
}

impl FromStr for GatePolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "queue" => Ok(GatePolicy::Queue),
            "reject" => Ok(GatePolicy::Reject),
            other => Err(format!(
                "unknown gate policy '{}' (expected 'queue' or 'reject')",
                other
            )),
        }
    }
}

impl fmt::Display for GatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatePolicy::Queue => f.write_str("queue"),
            GatePolicy::Reject => f.write_str("reject"),
        }
    }
}

/// Counting semaphore handed to each supervisor at construction.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
    policy: GatePolicy,
}

/// A held slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    pub fn new(limit: usize, policy: GatePolicy) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            policy,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn policy(&self) -> GatePolicy {
        self.policy
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Take a slot without waiting.
    pub fn try_admit(&self) -> Result<GatePermit, ExecError> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(GatePermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) => Err(ExecError::Busy { limit: self.limit }),
            Err(TryAcquireError::Closed) => Err(ExecError::internal("concurrency gate closed")),
        }
    }

    /// Wait for a slot.
    pub async fn acquire(&self) -> Result<GatePermit, ExecError> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map(|permit| GatePermit { _permit: permit })
            .map_err(|_| ExecError::internal("concurrency gate closed"))
    }
}
