//! Command Dispatcher
//!
//! Producer side of the pipeline: wraps a command in an envelope, persists it
//! and only then asks the scheduler to orchestrate it.
//!
//! ```text
//! enqueue(cmd) ──► handlers? ──no──► NoHandlers
//!                     │
//!                    yes
//!                     ▼
//!            add_or_get_existing ──existing──► Duplicate (no schedule)
//!                     │
//!                  commit
//!                     ▼
//!        scheduler.enqueue(Orchestrate(id))
//! ```

use crate::error::DispatchError;
use chrono::Utc;
use courier_domain::{
    AddOrGetExisting, BackgroundScheduler, Command, CommandEnvelope, CorrelationId, EnvelopeId,
    EnvelopeStore, HandlerRegistry, RepositoryError, ScheduledJob,
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Nothing is registered for the command type; nothing was stored.
    NoHandlers,
    /// A new envelope was persisted and scheduled.
    Enqueued(EnvelopeId),
    /// An envelope with the same correlation id already existed.
    Duplicate(EnvelopeId),
}

impl EnqueueOutcome {
    pub fn envelope_id(&self) -> Option<EnvelopeId> {
        match self {
            EnqueueOutcome::NoHandlers => None,
            EnqueueOutcome::Enqueued(id) | EnqueueOutcome::Duplicate(id) => Some(*id),
        }
    }
}

pub struct CommandDispatcher {
    store: Arc<dyn EnvelopeStore>,
    scheduler: Arc<dyn BackgroundScheduler>,
    registry: Arc<HandlerRegistry>,
}

impl CommandDispatcher {
    pub fn new(
        store: Arc<dyn EnvelopeStore>,
        scheduler: Arc<dyn BackgroundScheduler>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            store,
            scheduler,
            registry,
        }
    }

    /// Persists `command` and schedules exactly one orchestration for it.
    ///
    /// The envelope is committed before the scheduler sees its id. If
    /// scheduling fails the envelope stays durable and
    /// [`DispatchError::Scheduling`] is returned; the retry sweep picks it up.
    #[tracing::instrument(skip(self, command), fields(command_type = %C::command_type()))]
    pub async fn enqueue<C: Command>(&self, command: &C) -> Result<EnqueueOutcome, DispatchError> {
        if self.registry.handler_count::<C>() == 0 {
            tracing::debug!("No handlers registered; command dropped");
            return Ok(EnqueueOutcome::NoHandlers);
        }

        let envelope = CommandEnvelope::for_command(command, Utc::now())?;
        let correlation_id = envelope.correlation_id();

        let mut tx = self.store.begin().await?;
        let staged = match tx.add_or_get_existing(envelope).await {
            Ok(staged) => staged,
            Err(e) => {
                let _ = tx.rollback().await;
                return Err(e.into());
            }
        };

        let envelope_id = match staged {
            AddOrGetExisting::Existing(existing) => {
                tx.rollback().await?;
                tracing::warn!(
                    envelope_id = %existing.id(),
                    correlation_id = %correlation_id,
                    status = %existing.status(),
                    "Duplicate enqueue absorbed"
                );
                return Ok(EnqueueOutcome::Duplicate(existing.id()));
            }
            AddOrGetExisting::Added(envelope) => envelope.id(),
        };

        if let Err(e) = tx.commit().await {
            return self.resolve_commit_conflict(e, &correlation_id).await;
        }

        self.scheduler
            .enqueue(ScheduledJob::Orchestrate(envelope_id))
            .await
            .map_err(|source| DispatchError::Scheduling {
                envelope_id,
                source,
            })?;

        tracing::info!(
            envelope_id = %envelope_id,
            correlation_id = %correlation_id,
            "Command enqueued"
        );
        Ok(EnqueueOutcome::Enqueued(envelope_id))
    }

    /// A concurrent enqueue with the same key won the race; report its
    /// envelope as the duplicate.
    async fn resolve_commit_conflict(
        &self,
        error: RepositoryError,
        correlation_id: &CorrelationId,
    ) -> Result<EnqueueOutcome, DispatchError> {
        if !error.is_conflict() {
            return Err(error.into());
        }
        match self.store.find_by_correlation_id(correlation_id).await? {
            Some(existing) => {
                tracing::warn!(
                    envelope_id = %existing.id(),
                    correlation_id = %correlation_id,
                    "Concurrent duplicate enqueue absorbed"
                );
                Ok(EnqueueOutcome::Duplicate(existing.id()))
            }
            None => Err(error.into()),
        }
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
