//! Envelope persistence port.
//!
//! Writes go through an explicit transaction handle so that callers decide
//! when changes become visible. Nothing staged in a transaction is visible to
//! readers until `commit` returns successfully.

use super::model::{CommandEnvelope, EnvelopeStatus};
use crate::shared_kernel::RepositoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_shared::{CorrelationId, EnvelopeId};

/// Result of an insert keyed by idempotency key.
#[derive(Debug, Clone)]
pub enum AddOrGetExisting {
    /// The envelope was staged for insertion
    Added(CommandEnvelope),
    /// An envelope with the same idempotency key already exists
    Existing(CommandEnvelope),
}

impl AddOrGetExisting {
    pub fn envelope(&self) -> &CommandEnvelope {
        match self {
            AddOrGetExisting::Added(envelope) | AddOrGetExisting::Existing(envelope) => envelope,
        }
    }

    pub fn was_added(&self) -> bool {
        matches!(self, AddOrGetExisting::Added(_))
    }
}

/// Counts por estado
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvelopeStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

impl EnvelopeStats {
    pub fn record(&mut self, status: EnvelopeStatus) {
        match status {
            EnvelopeStatus::Pending => self.pending += 1,
            EnvelopeStatus::Processing => self.processing += 1,
            EnvelopeStatus::Completed => self.completed += 1,
            EnvelopeStatus::Failed => self.failed += 1,
            EnvelopeStatus::DeadLettered => self.dead_lettered += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed + self.dead_lettered
    }
}

#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn EnvelopeTransaction>, RepositoryError>;

    async fn find_by_id(&self, id: &EnvelopeId) -> Result<Option<CommandEnvelope>, RepositoryError>;

    async fn find_by_correlation_id(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Option<CommandEnvelope>, RepositoryError>;

    /// Failed envelopes whose retry time is at or before `due_before`.
    async fn get_pending_retries(
        &self,
        due_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CommandEnvelope>, RepositoryError>;

    /// Pending or Processing envelopes last scheduled or started before
    /// `older_than`.
    async fn get_stale_in_flight(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CommandEnvelope>, RepositoryError>;

    async fn stats(&self) -> Result<EnvelopeStats, RepositoryError>;
}

#[async_trait]
pub trait EnvelopeTransaction: Send {
    async fn add(&mut self, envelope: CommandEnvelope) -> Result<(), RepositoryError>;

    /// Stages `envelope` unless one with the same idempotency key exists
    /// (committed or staged in this transaction), in which case the
    /// existing one is returned and nothing is staged.
    async fn add_or_get_existing(
        &mut self,
        envelope: CommandEnvelope,
    ) -> Result<AddOrGetExisting, RepositoryError>;

    /// Stages a new version of an existing envelope. The execution log of
    /// the new version must extend the stored one.
    async fn update(&mut self, envelope: &CommandEnvelope) -> Result<(), RepositoryError>;

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError>;
}

/// Persists one new version of `envelope` in its own transaction.
pub async fn save_envelope(
    store: &dyn EnvelopeStore,
    envelope: &CommandEnvelope,
) -> Result<(), RepositoryError> {
    let mut tx = store.begin().await?;
    if let Err(e) = tx.update(envelope).await {
        if let Err(rollback_err) = tx.rollback().await {
            tracing::warn!(error = %rollback_err, "Rollback failed after update error");
        }
        return Err(e);
    }
    tx.commit().await
}
