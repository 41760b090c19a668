//! Delivery Processor
//!
//! Runs the single handler behind one outbox delivery. The delivery row is
//! its own retry ledger: handler failures are recorded on it and never
//! surface as errors, so the scheduler does not retry on top of the sweep.

use crate::error::OutboxError;
use crate::orchestration::invoke_guarded;
use chrono::{DateTime, Utc};
use courier_domain::{
    DeliveryId, EventHandlerRegistry, ExecutionScope, FailureKind, HandlerFailure, OutboxDelivery,
    OutboxStore,
};
use courier_shared::config::OrchestratorConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    NotFound,
    AlreadySucceeded,
    /// Retries are used up; the delivery is left as it is
    Exhausted,
    Succeeded,
    Failed {
        attempts: u32,
        next_attempt_at: Option<DateTime<Utc>>,
    },
}

pub struct DeliveryProcessor {
    store: Arc<dyn OutboxStore>,
    registry: Arc<EventHandlerRegistry>,
    config: OrchestratorConfig,
}

impl DeliveryProcessor {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        registry: Arc<EventHandlerRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    #[tracing::instrument(skip(self, cancel), fields(delivery_id = %delivery_id))]
    pub async fn process(
        &self,
        delivery_id: DeliveryId,
        cancel: CancellationToken,
    ) -> Result<DeliveryOutcome, OutboxError> {
        let Some(mut delivery) = self.store.find_delivery(&delivery_id).await? else {
            tracing::warn!("Delivery not found");
            return Ok(DeliveryOutcome::NotFound);
        };
        if delivery.is_succeeded() {
            tracing::debug!("Delivery already succeeded; skipping");
            return Ok(DeliveryOutcome::AlreadySucceeded);
        }
        if delivery.is_exhausted() {
            tracing::debug!(attempts = delivery.attempts, "Delivery exhausted; skipping");
            return Ok(DeliveryOutcome::Exhausted);
        }

        let result = self.invoke(&delivery, cancel).await?;
        let now = Utc::now();
        let outcome = match result {
            Ok(()) => {
                delivery.mark_succeeded(now);
                tracing::info!(handler = %delivery.handler_name, "Delivery succeeded");
                DeliveryOutcome::Succeeded
            }
            Err(failure) => {
                delivery.record_failure(&failure, now);
                if delivery.is_exhausted() {
                    tracing::error!(
                        handler = %delivery.handler_name,
                        attempts = delivery.attempts,
                        error = %failure.summary(),
                        "Delivery retries exhausted"
                    );
                } else {
                    tracing::warn!(
                        handler = %delivery.handler_name,
                        attempts = delivery.attempts,
                        next_attempt_at = ?delivery.next_attempt_at,
                        error = %failure.summary(),
                        "Delivery failed; retry scheduled"
                    );
                }
                DeliveryOutcome::Failed {
                    attempts: delivery.attempts,
                    next_attempt_at: delivery.next_attempt_at,
                }
            }
        };

        let mut tx = self.store.begin().await?;
        if let Err(e) = tx.update_delivery(&delivery).await {
            let _ = tx.rollback().await;
            return Err(e.into());
        }
        tx.commit().await?;

        Ok(outcome)
    }

    /// A missing message or handler counts as a failed attempt.
    async fn invoke(
        &self,
        delivery: &OutboxDelivery,
        cancel: CancellationToken,
    ) -> Result<Result<(), HandlerFailure>, OutboxError> {
        let Some(message) = self.store.find_message(&delivery.message_id).await? else {
            return Ok(Err(HandlerFailure::new(
                FailureKind::HandlerFailed,
                format!("outbox message {} not found", delivery.message_id),
                String::new(),
            )));
        };

        let Some(handler) = self
            .registry
            .find(&message.event_type, &delivery.handler_name)
        else {
            return Ok(Err(HandlerFailure::new(
                FailureKind::HandlerFailed,
                format!(
                    "no handler '{}' subscribed to {}",
                    delivery.handler_name, message.event_type
                ),
                String::new(),
            )));
        };

        let scope_token = cancel.child_token();
        let payload = message.payload;
        let invocation = async move {
            let scope = ExecutionScope::new(scope_token);
            handler.handle_payload(&payload, &scope).await
        };
        Ok(invoke_guarded(invocation, self.config.handler_timeout(), cancel).await)
    }
}

impl std::fmt::Debug for DeliveryProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryProcessor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
