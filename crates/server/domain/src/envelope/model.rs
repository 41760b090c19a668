//! CommandEnvelope aggregate.
//!
//! ```text
//!            begin_attempt            all handlers ok
//! Pending ───────────────► Processing ────────────────► Completed
//!    ▲                         │
//!    │ requeue                 │ record_attempt_failure
//!    │                         ▼
//!    └──────────────────── Failed ──(retries exhausted / unresolvable)──► DeadLettered
//! ```
//!
//! Completed and DeadLettered are terminal. Every transition appends to the
//! execution log and never rewrites earlier entries.

use super::execution_log::{ActionType, ExecutionLogEntry, ExecutionStatus, HandlerFailure};
use super::retry_policy::RetryPolicy;
use crate::command::{Command, CommandTypeDescriptor, IdempotencyError, IdempotencyKey};
use chrono::{DateTime, Utc};
use courier_shared::{CorrelationId, EnvelopeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Message stored on the DeadLetter log entry.
pub const DEAD_LETTER_MESSAGE: &str = "Envelope moved to dead letter; no further attempts will be made";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvelopeStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    DeadLettered,
}

impl EnvelopeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EnvelopeStatus::Completed | EnvelopeStatus::DeadLettered)
    }
}

impl fmt::Display for EnvelopeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnvelopeStatus::Pending => "PENDING",
            EnvelopeStatus::Processing => "PROCESSING",
            EnvelopeStatus::Completed => "COMPLETED",
            EnvelopeStatus::Failed => "FAILED",
            EnvelopeStatus::DeadLettered => "DEAD_LETTERED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Envelope {envelope_id} is dead-lettered; no further attempts may be recorded")]
    AlreadyDeadLettered { envelope_id: EnvelopeId },

    #[error("Envelope {envelope_id} is {status}; cannot {action}")]
    InvalidTransition {
        envelope_id: EnvelopeId,
        status: EnvelopeStatus,
        action: &'static str,
    },

    #[error("Command could not be serialized: {message}")]
    Serialization { message: String },

    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    id: EnvelopeId,
    correlation_id: CorrelationId,
    idempotency_key: IdempotencyKey,
    command_type: CommandTypeDescriptor,
    payload: String,
    status: EnvelopeStatus,
    created_at: DateTime<Utc>,
    scheduled_at: DateTime<Utc>,
    next_attempt_at: Option<DateTime<Utc>>,
    last_attempt_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    execution_logs: Vec<ExecutionLogEntry>,
}

impl CommandEnvelope {
    pub fn new(
        command_type: CommandTypeDescriptor,
        payload: String,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) -> Result<Self, EnvelopeError> {
        let idempotency_key = IdempotencyKey::derive(&correlation_id)?;
        Ok(Self {
            id: EnvelopeId::new(),
            correlation_id,
            idempotency_key,
            command_type,
            payload,
            status: EnvelopeStatus::Pending,
            created_at: now,
            scheduled_at: now,
            next_attempt_at: None,
            last_attempt_at: None,
            completed_at: None,
            execution_logs: Vec::new(),
        })
    }

    /// Serializes `command` into a new Pending envelope. Commands without a
    /// correlation id get a fresh one.
    pub fn for_command<C: Command>(command: &C, now: DateTime<Utc>) -> Result<Self, EnvelopeError> {
        let payload = serde_json::to_string(command).map_err(|e| EnvelopeError::Serialization {
            message: e.to_string(),
        })?;
        let correlation_id = command.correlation_id().unwrap_or_default();
        Self::new(C::command_type(), payload, correlation_id, now)
    }

    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn idempotency_key(&self) -> &IdempotencyKey {
        &self.idempotency_key
    }

    pub fn command_type(&self) -> &CommandTypeDescriptor {
        &self.command_type
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn status(&self) -> EnvelopeStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn scheduled_at(&self) -> DateTime<Utc> {
        self.scheduled_at
    }

    pub fn next_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.next_attempt_at
    }

    pub fn last_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.last_attempt_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn execution_logs(&self) -> &[ExecutionLogEntry] {
        &self.execution_logs
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of finished attempts (successful or not).
    pub fn attempt_count(&self) -> u32 {
        self.execution_logs
            .iter()
            .filter(|entry| entry.action_type == ActionType::Execute)
            .count() as u32
    }

    pub fn should_retry(&self) -> bool {
        self.status == EnvelopeStatus::Failed && RetryPolicy::STANDARD.can_retry(self.attempt_count())
    }

    /// Latest of the last hand-off to the scheduler and the last attempt start.
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        match self.last_attempt_at {
            Some(started) if started > self.scheduled_at => started,
            _ => self.scheduled_at,
        }
    }

    /// Failed with a retry time already in the past.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == EnvelopeStatus::Failed
            && self.next_attempt_at.is_some_and(|at| at <= now)
    }

    /// Moves to Processing and returns the number of the attempt that starts.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> Result<u32, EnvelopeError> {
        self.ensure_open("begin an attempt")?;
        self.status = EnvelopeStatus::Processing;
        self.last_attempt_at = Some(now);
        self.next_attempt_at = None;
        Ok(self.attempt_count())
    }

    /// Appends the outcome of a single handler run within `attempt_number`.
    pub fn record_handler_outcome(
        &mut self,
        handler_type_name: &str,
        attempt_number: u32,
        failure: Option<&HandlerFailure>,
        now: DateTime<Utc>,
    ) -> Result<(), EnvelopeError> {
        self.ensure_open("record a handler execution")?;
        let status = if failure.is_some() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Succeeded
        };
        let mut entry = ExecutionLogEntry::new(
            self.id,
            ActionType::HandlerExecution,
            status,
            attempt_number,
            now,
        )
        .with_handler(handler_type_name);
        if let Some(failure) = failure {
            entry = entry.with_failure(failure);
        }
        self.execution_logs.push(entry);
        Ok(())
    }

    /// Records a failed attempt and computes when the next one is due.
    ///
    /// Dead-lettered envelopes reject the call; completed envelopes ignore it.
    pub fn record_attempt_failure(
        &mut self,
        message: impl Into<String>,
        details: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), EnvelopeError> {
        match self.status {
            EnvelopeStatus::DeadLettered => {
                return Err(EnvelopeError::AlreadyDeadLettered {
                    envelope_id: self.id,
                });
            }
            EnvelopeStatus::Completed => return Ok(()),
            _ => {}
        }

        let attempt_index = self.attempt_count();
        self.execution_logs.push(
            ExecutionLogEntry::new(
                self.id,
                ActionType::Execute,
                ExecutionStatus::Failed,
                attempt_index,
                now,
            )
            .with_error(message, details),
        );
        self.status = EnvelopeStatus::Failed;
        self.last_attempt_at = Some(now);
        self.next_attempt_at = RetryPolicy::STANDARD.next_attempt_at(attempt_index, now);
        Ok(())
    }

    /// Parks the envelope permanently. Calling it on a terminal envelope
    /// does nothing.
    pub fn mark_dead_lettered(&mut self, reason: Option<String>, now: DateTime<Utc>) {
        if self.is_terminal() {
            return;
        }
        self.execution_logs.push(
            ExecutionLogEntry::new(
                self.id,
                ActionType::DeadLetter,
                ExecutionStatus::DeadLettered,
                self.attempt_count(),
                now,
            )
            .with_error(DEAD_LETTER_MESSAGE, reason),
        );
        self.status = EnvelopeStatus::DeadLettered;
        self.next_attempt_at = None;
        self.completed_at = Some(now);
    }

    /// Marks the envelope done. Terminal envelopes are left untouched.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        if self.is_terminal() {
            return;
        }
        self.execution_logs.push(ExecutionLogEntry::new(
            self.id,
            ActionType::Execute,
            ExecutionStatus::Succeeded,
            self.attempt_count(),
            now,
        ));
        self.status = EnvelopeStatus::Completed;
        self.completed_at = Some(now);
        self.last_attempt_at = Some(now);
        self.next_attempt_at = None;
    }

    /// Hands a failed envelope back for another attempt.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> Result<(), EnvelopeError> {
        if !self.should_retry() {
            return Err(EnvelopeError::InvalidTransition {
                envelope_id: self.id,
                status: self.status,
                action: "requeue",
            });
        }
        self.execution_logs.push(ExecutionLogEntry::new(
            self.id,
            ActionType::Retry,
            ExecutionStatus::Requeued,
            self.attempt_count(),
            now,
        ));
        self.status = EnvelopeStatus::Pending;
        self.next_attempt_at = None;
        self.scheduled_at = now;
        Ok(())
    }

    /// Records that the envelope was handed to the scheduler again.
    pub fn touch_scheduled(&mut self, now: DateTime<Utc>) {
        self.scheduled_at = now;
    }

    fn ensure_open(&self, action: &'static str) -> Result<(), EnvelopeError> {
        match self.status {
            EnvelopeStatus::DeadLettered => Err(EnvelopeError::AlreadyDeadLettered {
                envelope_id: self.id,
            }),
            EnvelopeStatus::Completed => Err(EnvelopeError::InvalidTransition {
                envelope_id: self.id,
                status: self.status,
                action,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::execution_log::FailureKind;
    use chrono::Duration;

    fn envelope(now: DateTime<Utc>) -> CommandEnvelope {
        CommandEnvelope::new(
            CommandTypeDescriptor::from_identifier("billing::SendInvoice"),
            "{}".to_string(),
            CorrelationId::new(),
            now,
        )
        .unwrap()
    }

    #[test]
    fn test_new_envelope_is_pending() {
        let now = Utc::now();
        let envelope = envelope(now);
        assert_eq!(envelope.status(), EnvelopeStatus::Pending);
        assert_eq!(envelope.attempt_count(), 0);
        assert_eq!(envelope.next_attempt_at(), None);
        assert!(envelope.execution_logs().is_empty());
        assert!(!envelope.should_retry());
    }

    #[test]
    fn test_nil_correlation_rejected() {
        let result = CommandEnvelope::new(
            CommandTypeDescriptor::from_identifier("billing::SendInvoice"),
            "{}".to_string(),
            CorrelationId::from_uuid(uuid::Uuid::nil()),
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(EnvelopeError::Idempotency(IdempotencyError::NilCorrelationId))
        ));
    }

    #[test]
    fn test_retry_schedule_over_four_failures() {
        let now = Utc::now();
        let mut envelope = envelope(now);

        let expected = [
            (Some(now + Duration::seconds(60)), true),
            (Some(now + Duration::seconds(300)), true),
            (Some(now + Duration::seconds(900)), true),
            (None, false),
        ];
        for (attempt, (next, retry)) in expected.into_iter().enumerate() {
            envelope
                .record_attempt_failure(format!("boom {attempt}"), None, now)
                .unwrap();
            assert_eq!(envelope.status(), EnvelopeStatus::Failed);
            assert_eq!(envelope.next_attempt_at(), next, "attempt {attempt}");
            assert_eq!(envelope.should_retry(), retry, "attempt {attempt}");
        }

        let numbers: Vec<u32> = envelope
            .execution_logs()
            .iter()
            .map(|entry| entry.attempt_number)
            .collect();
        assert_eq!(numbers, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_dead_letter_is_idempotent() {
        let now = Utc::now();
        let mut envelope = envelope(now);
        envelope.mark_dead_lettered(Some("unknown type".into()), now);
        envelope.mark_dead_lettered(None, now);

        let dead_letters: Vec<_> = envelope
            .execution_logs()
            .iter()
            .filter(|entry| entry.action_type == ActionType::DeadLetter)
            .collect();
        assert_eq!(dead_letters.len(), 1);
        assert_eq!(dead_letters[0].error_message.as_deref(), Some(DEAD_LETTER_MESSAGE));
        assert_eq!(dead_letters[0].error_details.as_deref(), Some("unknown type"));
        assert_eq!(envelope.status(), EnvelopeStatus::DeadLettered);
        assert_eq!(envelope.completed_at(), Some(now));
        assert_eq!(envelope.next_attempt_at(), None);
    }

    #[test]
    fn test_complete_after_dead_letter_is_noop() {
        let now = Utc::now();
        let mut envelope = envelope(now);
        envelope.mark_dead_lettered(None, now);
        let before = envelope.execution_logs().len();

        envelope.mark_completed(now + chrono::Duration::seconds(30));

        assert_eq!(envelope.status(), EnvelopeStatus::DeadLettered);
        assert_eq!(envelope.completed_at(), Some(now));
        assert_eq!(envelope.execution_logs().len(), before);
    }

    #[test]
    fn test_failure_after_dead_letter_is_rejected() {
        let now = Utc::now();
        let mut envelope = envelope(now);
        envelope.mark_dead_lettered(None, now);

        let err = envelope.record_attempt_failure("late", None, now).unwrap_err();
        assert!(matches!(err, EnvelopeError::AlreadyDeadLettered { .. }));
        assert!(envelope.begin_attempt(now).is_err());
    }

    #[test]
    fn test_failure_after_completion_is_ignored() {
        let now = Utc::now();
        let mut envelope = envelope(now);
        envelope.mark_completed(now);

        envelope.record_attempt_failure("late", None, now).unwrap();
        assert_eq!(envelope.status(), EnvelopeStatus::Completed);
        assert_eq!(envelope.attempt_count(), 1);
    }

    #[test]
    fn test_completion_records_success() {
        let now = Utc::now();
        let mut envelope = envelope(now);
        envelope.record_attempt_failure("first try", None, now).unwrap();
        envelope.begin_attempt(now).unwrap();
        envelope.mark_completed(now);

        assert_eq!(envelope.status(), EnvelopeStatus::Completed);
        assert_eq!(envelope.completed_at(), Some(now));
        assert_eq!(envelope.next_attempt_at(), None);
        let last = envelope.execution_logs().last().unwrap();
        assert_eq!(last.action_type, ActionType::Execute);
        assert_eq!(last.status, ExecutionStatus::Succeeded);
        assert_eq!(last.attempt_number, 1);
    }

    #[test]
    fn test_handler_outcomes_share_attempt_number() {
        let now = Utc::now();
        let mut envelope = envelope(now);
        let attempt = envelope.begin_attempt(now).unwrap();
        let failure = HandlerFailure::new(FailureKind::HandlerPanicked, "panicked", "index out of bounds");

        envelope
            .record_handler_outcome("billing::Mailer", attempt, None, now)
            .unwrap();
        envelope
            .record_handler_outcome("billing::Ledger", attempt, Some(&failure), now)
            .unwrap();

        let entries = envelope.execution_logs();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.attempt_number == 0));
        assert!(entries.iter().all(|e| e.action_type == ActionType::HandlerExecution));
        assert_eq!(entries[1].handler_type_name.as_deref(), Some("billing::Ledger"));
        assert_eq!(entries[1].error_kind, Some(FailureKind::HandlerPanicked));
        // Handler rows do not count as attempts.
        assert_eq!(envelope.attempt_count(), 0);
    }

    #[test]
    fn test_requeue_only_when_retry_remains() {
        let now = Utc::now();
        let mut envelope = envelope(now);
        assert!(envelope.requeue(now).is_err());

        envelope.record_attempt_failure("boom", None, now).unwrap();
        let later = now + Duration::seconds(120);
        assert!(envelope.is_due(later));
        envelope.requeue(later).unwrap();

        assert_eq!(envelope.status(), EnvelopeStatus::Pending);
        assert_eq!(envelope.next_attempt_at(), None);
        assert_eq!(envelope.scheduled_at(), later);
        assert_eq!(
            envelope.execution_logs().last().map(|e| e.action_type),
            Some(ActionType::Retry)
        );
    }

    #[test]
    fn test_log_is_append_only_across_transitions() {
        let now = Utc::now();
        let mut envelope = envelope(now);
        envelope.record_attempt_failure("one", None, now).unwrap();
        let snapshot = envelope.execution_logs().to_vec();

        envelope.requeue(now).unwrap();
        envelope.begin_attempt(now).unwrap();
        envelope.record_attempt_failure("two", None, now).unwrap();

        assert_eq!(&envelope.execution_logs()[..snapshot.len()], snapshot.as_slice());
    }
}
