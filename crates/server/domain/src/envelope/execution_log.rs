//! Append-only audit trail of an envelope.

use chrono::{DateTime, Utc};
use courier_shared::EnvelopeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What kind of event an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    /// One whole attempt (all handlers) finished
    Execute,
    /// A failed envelope was handed back to the scheduler
    Retry,
    /// The envelope was parked permanently
    DeadLetter,
    /// A single handler finished within an attempt
    HandlerExecution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Succeeded,
    Failed,
    Requeued,
    DeadLettered,
}

/// Why a handler execution did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    HandlerFailed,
    HandlerPanicked,
    Cancelled,
    TimedOut,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::HandlerFailed => "HandlerFailed",
            FailureKind::HandlerPanicked => "HandlerPanicked",
            FailureKind::Cancelled => "Cancelled",
            FailureKind::TimedOut => "TimedOut",
        };
        f.write_str(name)
    }
}

/// Failure captured from one handler run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Full error chain / panic payload
    pub details: String,
}

fn root_cause_type(error: &anyhow::Error) -> Option<&'static str> {
    let root = error.root_cause();
    if root.is::<std::io::Error>() {
        Some("std::io::Error")
    } else if root.is::<serde_json::Error>() {
        Some("serde_json::Error")
    } else {
        None
    }
}

impl HandlerFailure {
    /// `message` is the whole context chain on one line, prefixed with the
    /// root cause's type when it is one we can name.
    pub fn from_error(error: &anyhow::Error) -> Self {
        let chain = format!("{error:#}");
        let message = match root_cause_type(error) {
            Some(type_name) => format!("{type_name}: {chain}"),
            None => chain,
        };
        Self {
            kind: FailureKind::HandlerFailed,
            message,
            details: format!("{error:?}"),
        }
    }

    pub fn new(kind: FailureKind, message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: details.into(),
        }
    }

    /// `"Kind: message"`, the form stored in single-line error columns.
    pub fn summary(&self) -> String {
        format!("{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: Uuid,
    pub envelope_id: EnvelopeId,
    pub action_type: ActionType,
    pub status: ExecutionStatus,
    pub attempt_number: u32,
    pub handler_type_name: Option<String>,
    pub error_kind: Option<FailureKind>,
    pub error_message: Option<String>,
    pub error_details: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionLogEntry {
    pub(crate) fn new(
        envelope_id: EnvelopeId,
        action_type: ActionType,
        status: ExecutionStatus,
        attempt_number: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            envelope_id,
            action_type,
            status,
            attempt_number,
            handler_type_name: None,
            error_kind: None,
            error_message: None,
            error_details: None,
            created_at,
        }
    }

    pub(crate) fn with_handler(mut self, handler_type_name: &str) -> Self {
        self.handler_type_name = Some(handler_type_name.to_string());
        self
    }

    pub(crate) fn with_error(mut self, message: impl Into<String>, details: Option<String>) -> Self {
        self.error_message = Some(message.into());
        self.error_details = details;
        self
    }

    pub(crate) fn with_failure(mut self, failure: &HandlerFailure) -> Self {
        self.error_kind = Some(failure.kind);
        self.error_message = Some(failure.message.clone());
        self.error_details = Some(failure.details.clone());
        self
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Failed | ExecutionStatus::DeadLettered
        )
    }
}
