//! Errores de la capa de aplicación

use chrono::{DateTime, Utc};
use courier_domain::{EnvelopeError, EnvelopeId, RepositoryError, SchedulerError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid command: {0}")]
    InvalidCommand(#[from] EnvelopeError),

    #[error("Envelope store error: {0}")]
    Repository(#[from] RepositoryError),

    /// The envelope is durable; the retry sweep will schedule it later.
    #[error("Envelope {envelope_id} was persisted but could not be scheduled: {source}")]
    Scheduling {
        envelope_id: EnvelopeId,
        #[source]
        source: SchedulerError,
    },
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(
        "Envelope {envelope_id}: {failed} of {total} handlers failed on attempt {attempt}; retry scheduled for {next_attempt_at:?}"
    )]
    RetryScheduled {
        envelope_id: EnvelopeId,
        attempt: u32,
        failed: usize,
        total: usize,
        next_attempt_at: Option<DateTime<Utc>>,
    },

    #[error("Orchestration of envelope {envelope_id} was cancelled before it started")]
    Cancelled { envelope_id: EnvelopeId },

    #[error("Envelope store error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Envelope state error: {0}")]
    Envelope(#[from] EnvelopeError),
}

impl OrchestrationError {
    /// Whether the scheduler should run the same job again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, OrchestrationError::Envelope(_))
    }

    /// Time left until the envelope's recorded `next_attempt_at`, for
    /// errors that carry one. Already overdue attempts give zero.
    pub fn retry_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            OrchestrationError::RetryScheduled {
                next_attempt_at: Some(at),
                ..
            } => Some((*at - now).to_std().unwrap_or(Duration::ZERO)),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Event could not be serialized: {message}")]
    Serialization { message: String },

    #[error("Outbox store error: {0}")]
    Repository(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        let retry = OrchestrationError::RetryScheduled {
            envelope_id: EnvelopeId::new(),
            attempt: 1,
            failed: 1,
            total: 2,
            next_attempt_at: None,
        };
        assert!(retry.is_retryable());
        assert!(retry.to_string().contains("1 of 2 handlers failed"));
        assert!(retry.to_string().contains("retry scheduled for"));
        assert!(OrchestrationError::from(RepositoryError::unavailable("down")).is_retryable());

        let terminal = OrchestrationError::from(EnvelopeError::AlreadyDeadLettered {
            envelope_id: EnvelopeId::new(),
        });
        assert!(!terminal.is_retryable());
    }

    #[test]
    fn test_retry_delay_follows_next_attempt_at() {
        let now = Utc::now();
        let scheduled = |next_attempt_at| OrchestrationError::RetryScheduled {
            envelope_id: EnvelopeId::new(),
            attempt: 2,
            failed: 1,
            total: 1,
            next_attempt_at,
        };

        assert_eq!(
            scheduled(Some(now + chrono::Duration::seconds(900))).retry_delay(now),
            Some(Duration::from_secs(900))
        );
        assert_eq!(
            scheduled(Some(now - chrono::Duration::seconds(5))).retry_delay(now),
            Some(Duration::ZERO)
        );
        assert_eq!(scheduled(None).retry_delay(now), None);
        assert_eq!(
            OrchestrationError::from(RepositoryError::unavailable("down")).retry_delay(now),
            None
        );
    }
}
