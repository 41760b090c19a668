//! Durable command envelopes and their audit trail.

pub mod execution_log;
pub mod model;
pub mod repository;
pub mod retry_policy;

pub use execution_log::{ActionType, ExecutionLogEntry, ExecutionStatus, FailureKind, HandlerFailure};
pub use model::{CommandEnvelope, DEAD_LETTER_MESSAGE, EnvelopeError, EnvelopeStatus};
pub use repository::{
    AddOrGetExisting, EnvelopeStats, EnvelopeStore, EnvelopeTransaction, save_envelope,
};
pub use retry_policy::{BACKOFF_SCHEDULE_SECS, MAX_RETRY_ATTEMPTS, RetryPolicy};
