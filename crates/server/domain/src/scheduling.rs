//! Background scheduler port.
//!
//! The scheduler only ever carries identifiers. Whatever runs a job reloads
//! the current state from the store, so a job can be delivered more than once
//! or arbitrarily late without acting on stale data.

use async_trait::async_trait;
use courier_shared::{DeliveryId, EnvelopeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Work item handed to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "job", content = "id", rename_all = "snake_case")]
pub enum ScheduledJob {
    /// Run every handler of an envelope
    Orchestrate(EnvelopeId),
    /// Run the single handler of an outbox delivery
    ProcessDelivery(DeliveryId),
}

impl fmt::Display for ScheduledJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduledJob::Orchestrate(id) => write!(f, "orchestrate:{id}"),
            ScheduledJob::ProcessDelivery(id) => write!(f, "process-delivery:{id}"),
        }
    }
}

/// Identificador de un job encolado
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler is shut down")]
    ShutDown,

    #[error("Scheduler queue is full ({capacity} jobs)")]
    QueueFull { capacity: usize },

    #[error("Scheduler backend error: {message}")]
    Backend { message: String },
}

/// Error returned by a job run. Retryable errors ask the scheduler to run
/// the same job again later.
///
/// `retry_after` is set when the job itself knows when it is due again (an
/// envelope with a recorded `next_attempt_at`). The scheduler then waits
/// exactly that long instead of using its own backoff.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("Retryable job failure: {message}")]
    Retryable {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Job failed: {message}")]
    Fatal { message: String },
}

impl JobError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn retry_after(message: impl Into<String>, delay: Duration) -> Self {
        Self::Retryable {
            message: message.into(),
            retry_after: Some(delay),
        }
    }

    /// Delay requested by the job, if any.
    pub fn requested_delay(&self) -> Option<Duration> {
        match self {
            JobError::Retryable { retry_after, .. } => *retry_after,
            JobError::Fatal { .. } => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Retryable { .. })
    }
}

#[async_trait]
pub trait BackgroundScheduler: Send + Sync {
    async fn enqueue(&self, job: ScheduledJob) -> Result<JobId, SchedulerError>;
}

/// Callback the scheduler invokes for each job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: ScheduledJob, cancel: CancellationToken) -> Result<(), JobError>;
}
