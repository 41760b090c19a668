//! Scheduler callback router
//!
//! The [`BackgroundScheduler`](courier_domain::BackgroundScheduler) only
//! knows job ids; this handler turns each job back into an orchestration or
//! a delivery run and tells the scheduler whether running it again helps.

use crate::error::OutboxError;
use crate::orchestration::Orchestrator;
use crate::outbox::DeliveryProcessor;
use async_trait::async_trait;
use chrono::Utc;
use courier_domain::{JobError, JobHandler, ScheduledJob};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct DispatchJobHandler {
    orchestrator: Arc<Orchestrator>,
    deliveries: Arc<DeliveryProcessor>,
}

impl DispatchJobHandler {
    pub fn new(orchestrator: Arc<Orchestrator>, deliveries: Arc<DeliveryProcessor>) -> Self {
        Self {
            orchestrator,
            deliveries,
        }
    }
}

#[async_trait]
impl JobHandler for DispatchJobHandler {
    async fn run(&self, job: ScheduledJob, cancel: CancellationToken) -> Result<(), JobError> {
        match job {
            ScheduledJob::Orchestrate(envelope_id) => {
                match self.orchestrator.orchestrate(envelope_id, cancel).await {
                    Ok(outcome) => {
                        tracing::debug!(envelope_id = %envelope_id, outcome = ?outcome, "Orchestration finished");
                        Ok(())
                    }
                    Err(e) if e.is_retryable() => match e.retry_delay(Utc::now()) {
                        Some(delay) => Err(JobError::retry_after(e.to_string(), delay)),
                        None => Err(JobError::retryable(e.to_string())),
                    },
                    Err(e) => Err(JobError::Fatal {
                        message: e.to_string(),
                    }),
                }
            }
            ScheduledJob::ProcessDelivery(delivery_id) => {
                match self.deliveries.process(delivery_id, cancel).await {
                    Ok(outcome) => {
                        tracing::debug!(delivery_id = %delivery_id, outcome = ?outcome, "Delivery run finished");
                        Ok(())
                    }
                    Err(e @ OutboxError::Repository(_)) => Err(JobError::retryable(e.to_string())),
                    Err(e) => Err(JobError::Fatal {
                        message: e.to_string(),
                    }),
                }
            }
        }
    }
}

impl std::fmt::Debug for DispatchJobHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchJobHandler")
            .field("orchestrator", &self.orchestrator)
            .field("deliveries", &self.deliveries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_domain::{
        CommandTypeDescriptor, CorrelationId, DeliveryId, EnvelopeId, EnvelopeStore,
        EventHandlerRegistry, HandlerRegistry,
    };
    use courier_infrastructure::{InMemoryEnvelopeStore, InMemoryOutboxStore};
    use courier_shared::config::OrchestratorConfig;

    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    struct ChargeCard {
        cents: u64,
    }

    impl courier_domain::Command for ChargeCard {}

    #[derive(Clone)]
    struct GatewayDown;

    #[async_trait]
    impl courier_domain::CommandHandler<ChargeCard> for GatewayDown {
        async fn handle(&self, _command: &ChargeCard, _cancel: &CancellationToken) -> anyhow::Result<()> {
            anyhow::bail!("payment gateway timeout")
        }
    }

    fn router(envelopes: &InMemoryEnvelopeStore, outbox: &InMemoryOutboxStore) -> DispatchJobHandler {
        router_with(envelopes, outbox, HandlerRegistry::new())
    }

    fn router_with(
        envelopes: &InMemoryEnvelopeStore,
        outbox: &InMemoryOutboxStore,
        registry: HandlerRegistry,
    ) -> DispatchJobHandler {
        let orchestrator = Orchestrator::new(
            Arc::new(envelopes.clone()),
            Arc::new(registry),
            OrchestratorConfig::default(),
        );
        let deliveries = DeliveryProcessor::new(
            Arc::new(outbox.clone()),
            Arc::new(EventHandlerRegistry::new()),
            OrchestratorConfig::default(),
        );
        DispatchJobHandler::new(Arc::new(orchestrator), Arc::new(deliveries))
    }

    #[tokio::test]
    async fn test_missing_targets_are_not_errors() {
        let router = router(&InMemoryEnvelopeStore::new(), &InMemoryOutboxStore::new());

        assert!(router
            .run(ScheduledJob::Orchestrate(EnvelopeId::new()), CancellationToken::new())
            .await
            .is_ok());
        assert!(router
            .run(ScheduledJob::ProcessDelivery(DeliveryId::new()), CancellationToken::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_store_outage_is_retryable() {
        let envelopes = InMemoryEnvelopeStore::new();
        let outbox = InMemoryOutboxStore::new();
        envelopes.set_unavailable(true);
        outbox.set_unavailable(true);
        let router = router(&envelopes, &outbox);

        let orchestrate = router
            .run(ScheduledJob::Orchestrate(EnvelopeId::new()), CancellationToken::new())
            .await;
        let deliver = router
            .run(ScheduledJob::ProcessDelivery(DeliveryId::new()), CancellationToken::new())
            .await;

        assert!(orchestrate.unwrap_err().is_retryable());
        assert!(deliver.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_unknown_command_type_is_dead_lettered_not_retried() {
        let envelopes = InMemoryEnvelopeStore::new();
        let envelope = courier_domain::CommandEnvelope::new(
            CommandTypeDescriptor::from_identifier("legacy::RetiredCommand"),
            "{}".to_string(),
            CorrelationId::new(),
            chrono::Utc::now(),
        )
        .unwrap();
        let mut tx = envelopes.begin().await.unwrap();
        tx.add(envelope.clone()).await.unwrap();
        tx.commit().await.unwrap();

        let router = router(&envelopes, &InMemoryOutboxStore::new());
        let result = router
            .run(ScheduledJob::Orchestrate(envelope.id()), CancellationToken::new())
            .await;

        assert!(result.is_ok());
        let stored = envelopes.find_by_id(&envelope.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), courier_domain::EnvelopeStatus::DeadLettered);
    }

    #[tokio::test]
    async fn test_failed_attempt_asks_for_the_envelope_delay() {
        let envelopes = InMemoryEnvelopeStore::new();
        let envelope =
            courier_domain::CommandEnvelope::for_command(&ChargeCard { cents: 1_200 }, chrono::Utc::now())
                .unwrap();
        let mut tx = envelopes.begin().await.unwrap();
        tx.add(envelope.clone()).await.unwrap();
        tx.commit().await.unwrap();

        let mut registry = HandlerRegistry::new();
        registry.register::<ChargeCard, _>(GatewayDown);
        let router = router_with(&envelopes, &InMemoryOutboxStore::new(), registry);

        let error = router
            .run(ScheduledJob::Orchestrate(envelope.id()), CancellationToken::new())
            .await
            .unwrap_err();

        let delay = error.requested_delay().unwrap();
        assert!(delay <= std::time::Duration::from_secs(60));
        assert!(delay > std::time::Duration::from_secs(55));
        assert!(error.to_string().contains("retry scheduled for"));
    }
}
