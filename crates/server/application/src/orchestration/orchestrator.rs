//! Orchestrator - runs every handler of one envelope.
//!
//! Flujo de una ejecución:
//! 1. Load the envelope; missing or terminal envelopes are a no-op.
//! 2. Resolve the persisted type and decode the payload. Either failing is
//!    permanent: the envelope is dead-lettered without a retry.
//! 3. Run all exact-type handlers concurrently (bounded by a semaphore), each
//!    in its own execution scope, and log one entry per handler.
//! 4. Complete, schedule a retry, or dead-letter once retries are exhausted.
//!
//! Store failures are propagated untouched so the scheduler's own retry
//! re-runs the whole job against fresh state.

use super::execution::invoke_guarded;
use crate::error::OrchestrationError;
use chrono::Utc;
use courier_domain::{
    CommandEnvelope, EnvelopeId, EnvelopeStatus, EnvelopeStore, ErasedCommandHandler,
    ExecutionScope, HandlerFailure, HandlerRegistry, save_envelope,
};
use courier_shared::config::OrchestratorConfig;
use futures::future::join_all;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// How an orchestration pass ended, when it did not ask for a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationOutcome {
    NotFound,
    AlreadyTerminal(EnvelopeStatus),
    Completed { handlers: usize },
    DeadLettered { reason: String },
}

pub struct Orchestrator {
    store: Arc<dyn EnvelopeStore>,
    registry: Arc<HandlerRegistry>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn EnvelopeStore>,
        registry: Arc<HandlerRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    #[tracing::instrument(skip(self, cancel), fields(envelope_id = %envelope_id))]
    pub async fn orchestrate(
        &self,
        envelope_id: EnvelopeId,
        cancel: CancellationToken,
    ) -> Result<OrchestrationOutcome, OrchestrationError> {
        if cancel.is_cancelled() {
            return Err(OrchestrationError::Cancelled { envelope_id });
        }

        let Some(mut envelope) = self.store.find_by_id(&envelope_id).await? else {
            tracing::warn!("Envelope not found; nothing to orchestrate");
            return Ok(OrchestrationOutcome::NotFound);
        };

        if envelope.is_terminal() {
            tracing::debug!(status = %envelope.status(), "Envelope already terminal; skipping");
            return Ok(OrchestrationOutcome::AlreadyTerminal(envelope.status()));
        }

        let resolved = match self
            .registry
            .resolve(envelope.command_type().identifier())
            .and_then(|descriptor| self.registry.decode(&descriptor, envelope.payload()))
        {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!(
                    command_type = %envelope.command_type(),
                    error = %e,
                    "Envelope cannot be resolved; dead-lettering without retry"
                );
                return self.dead_letter(envelope, e.to_string()).await;
            }
        };

        let handlers = self.registry.handlers_for_type(&resolved.descriptor);
        if handlers.is_empty() {
            envelope.mark_completed(Utc::now());
            save_envelope(self.store.as_ref(), &envelope).await?;
            tracing::info!("No handlers registered any more; envelope completed");
            return Ok(OrchestrationOutcome::Completed { handlers: 0 });
        }

        let attempt = envelope.begin_attempt(Utc::now())?;
        save_envelope(self.store.as_ref(), &envelope).await?;

        tracing::info!(
            command_type = %resolved.descriptor,
            attempt,
            handlers = handlers.len(),
            "Running envelope handlers"
        );

        let outcomes = self.run_handlers(handlers, resolved.command, &cancel).await;
        self.finish_attempt(envelope, attempt, outcomes).await
    }

    async fn run_handlers(
        &self,
        handlers: Vec<Arc<dyn ErasedCommandHandler>>,
        command: Arc<dyn Any + Send + Sync>,
        cancel: &CancellationToken,
    ) -> Vec<(&'static str, Result<(), HandlerFailure>)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_handler_concurrency.max(1)));
        let timeout = self.config.handler_timeout();

        let runs = handlers.into_iter().map(|handler| {
            let semaphore = Arc::clone(&semaphore);
            let command = Arc::clone(&command);
            let cancel = cancel.clone();
            async move {
                let name = handler.handler_name();
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            name,
                            Err(HandlerFailure::new(
                                courier_domain::FailureKind::Cancelled,
                                "handler concurrency gate closed",
                                String::new(),
                            )),
                        );
                    }
                };

                let scope_token = cancel.child_token();
                let invocation = async move {
                    let scope = ExecutionScope::new(scope_token);
                    handler.handle_erased(command.as_ref(), &scope).await
                };
                (name, invoke_guarded(invocation, timeout, cancel).await)
            }
        });

        join_all(runs).await
    }

    async fn finish_attempt(
        &self,
        mut envelope: CommandEnvelope,
        attempt: u32,
        outcomes: Vec<(&'static str, Result<(), HandlerFailure>)>,
    ) -> Result<OrchestrationOutcome, OrchestrationError> {
        let now = Utc::now();
        let total = outcomes.len();
        let mut failures = Vec::new();

        for (name, outcome) in &outcomes {
            envelope.record_handler_outcome(name, attempt, outcome.as_ref().err(), now)?;
            match outcome {
                Ok(()) => tracing::debug!(handler = name, "Handler succeeded"),
                Err(failure) => {
                    tracing::warn!(
                        handler = name,
                        kind = %failure.kind,
                        error = %failure.message,
                        "Handler failed"
                    );
                    failures.push(format!("{name}: {}", failure.summary()));
                }
            }
        }

        if failures.is_empty() {
            envelope.mark_completed(now);
            save_envelope(self.store.as_ref(), &envelope).await?;
            tracing::info!(handlers = total, "Envelope completed");
            return Ok(OrchestrationOutcome::Completed { handlers: total });
        }

        let failed = failures.len();
        let message = format!("{failed} of {total} handlers failed");
        envelope.record_attempt_failure(message.clone(), Some(failures.join("\n")), now)?;

        if envelope.should_retry() {
            save_envelope(self.store.as_ref(), &envelope).await?;
            tracing::warn!(
                attempt,
                failed,
                total,
                next_attempt_at = ?envelope.next_attempt_at(),
                "Envelope attempt failed; retry scheduled"
            );
            return Err(OrchestrationError::RetryScheduled {
                envelope_id: envelope.id(),
                attempt,
                failed,
                total,
                next_attempt_at: envelope.next_attempt_at(),
            });
        }

        tracing::error!(attempt, failed, total, "Retries exhausted");
        self.dead_letter(envelope, message).await
    }

    async fn dead_letter(
        &self,
        mut envelope: CommandEnvelope,
        reason: String,
    ) -> Result<OrchestrationOutcome, OrchestrationError> {
        envelope.mark_dead_lettered(Some(reason.clone()), Utc::now());
        save_envelope(self.store.as_ref(), &envelope).await?;
        tracing::error!(reason = %reason, "Envelope dead-lettered");
        Ok(OrchestrationOutcome::DeadLettered { reason })
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish()
    }
}
