//! Outbox Dispatcher
//!
//! Polls Pending outbox messages and fans each one out into one delivery per
//! subscribed handler. Creating the deliveries and marking the message
//! Processed happen in one transaction; every delivery is then handed to the
//! scheduler. A lost hand-off is recovered by the delivery sweep.

use crate::error::OutboxError;
use chrono::Utc;
use courier_domain::{
    BackgroundScheduler, DeliveryId, EventHandlerRegistry, OutboxDelivery, OutboxMessage,
    OutboxStore, OutboxTransaction, RepositoryError, ScheduledJob,
};
use courier_shared::config::OutboxRelayConfig;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxDispatchReport {
    pub messages: usize,
    pub deliveries: usize,
    pub failed_messages: usize,
    pub schedule_failures: usize,
}

pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    registry: Arc<EventHandlerRegistry>,
    scheduler: Arc<dyn BackgroundScheduler>,
    config: OutboxRelayConfig,
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        registry: Arc<EventHandlerRegistry>,
        scheduler: Arc<dyn BackgroundScheduler>,
        config: OutboxRelayConfig,
    ) -> Self {
        Self {
            store,
            registry,
            scheduler,
            config,
        }
    }

    /// Run the relay loop until a shutdown signal arrives
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            "Starting outbox dispatcher"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.dispatch_pending().await {
                        Ok(report) if report.messages > 0 => tracing::info!(
                            messages = report.messages,
                            deliveries = report.deliveries,
                            failed_messages = report.failed_messages,
                            schedule_failures = report.schedule_failures,
                            "Outbox batch dispatched"
                        ),
                        Ok(_) => {}
                        Err(e) => tracing::warn!("Error processing outbox batch: {}", e),
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Outbox dispatcher shutting down");
                    break;
                }
            }
        }
    }

    /// Process a batch of pending messages
    pub async fn dispatch_pending(&self) -> Result<OutboxDispatchReport, OutboxError> {
        let pending = self.store.get_pending_messages(self.config.batch_size).await?;
        let mut report = OutboxDispatchReport::default();

        if pending.is_empty() {
            tracing::debug!("No pending outbox messages");
            return Ok(report);
        }

        for message in pending {
            let message_id = message.id;
            let event_type = message.event_type.clone();
            match self.fan_out(message).await {
                Ok(deliveries) => {
                    report.messages += 1;
                    report.deliveries += deliveries.len();
                    tracing::debug!(
                        message_id = %message_id,
                        event_type = %event_type,
                        deliveries = deliveries.len(),
                        "Outbox message fanned out"
                    );
                    report.schedule_failures += self.schedule(&deliveries).await;
                }
                Err(e) => {
                    tracing::error!(
                        message_id = %message_id,
                        event_type = %event_type,
                        error = %e,
                        "Failed to fan out outbox message"
                    );
                    report.failed_messages += 1;
                }
            }
        }

        Ok(report)
    }

    async fn fan_out(&self, mut message: OutboxMessage) -> Result<Vec<DeliveryId>, RepositoryError> {
        let now = Utc::now();
        let deliveries: Vec<OutboxDelivery> = self
            .registry
            .handler_names(&message.event_type)
            .into_iter()
            .map(|name| OutboxDelivery::new(message.id, name, now))
            .collect();
        message.mark_processed(now);

        let mut tx = self.store.begin().await?;
        if let Err(e) = stage_fan_out(tx.as_mut(), &message, &deliveries).await {
            let _ = tx.rollback().await;
            return Err(e);
        }
        tx.commit().await?;

        Ok(deliveries.iter().map(|delivery| delivery.id).collect())
    }

    async fn schedule(&self, deliveries: &[DeliveryId]) -> usize {
        let mut failures = 0;
        for delivery_id in deliveries {
            if let Err(e) = self
                .scheduler
                .enqueue(ScheduledJob::ProcessDelivery(*delivery_id))
                .await
            {
                tracing::warn!(delivery_id = %delivery_id, error = %e, "Failed to schedule delivery");
                failures += 1;
            }
        }
        failures
    }
}

async fn stage_fan_out(
    tx: &mut dyn OutboxTransaction,
    message: &OutboxMessage,
    deliveries: &[OutboxDelivery],
) -> Result<(), RepositoryError> {
    tx.insert_deliveries(deliveries).await?;
    tx.update_message(message).await
}

impl std::fmt::Debug for OutboxDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxDispatcher")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::OutboxWriter;
    use async_trait::async_trait;
    use courier_domain::{DomainEvent, EventHandler, OutboxStatus};
    use courier_infrastructure::{InMemoryOutboxStore, RecordingScheduler};
    use serde::{Deserialize, Serialize};
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Serialize, Deserialize)]
    struct ParcelDelivered {
        parcel: u32,
    }

    impl DomainEvent for ParcelDelivered {}

    #[derive(Debug, Serialize, Deserialize)]
    struct ParcelLost {
        parcel: u32,
    }

    impl DomainEvent for ParcelLost {}

    #[derive(Clone)]
    struct NotifyRecipient;

    #[async_trait]
    impl EventHandler<ParcelDelivered> for NotifyRecipient {
        fn name() -> &'static str {
            "notify-recipient"
        }

        async fn handle(&self, _event: &ParcelDelivered, _cancel: &CancellationToken) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Clone)]
    struct CloseShipment;

    #[async_trait]
    impl EventHandler<ParcelDelivered> for CloseShipment {
        fn name() -> &'static str {
            "close-shipment"
        }

        async fn handle(&self, _event: &ParcelDelivered, _cancel: &CancellationToken) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn dispatcher() -> (OutboxDispatcher, InMemoryOutboxStore, RecordingScheduler) {
        let store = InMemoryOutboxStore::new();
        let scheduler = RecordingScheduler::new();
        let mut registry = EventHandlerRegistry::new();
        registry
            .subscribe::<ParcelDelivered, _>(NotifyRecipient)
            .subscribe::<ParcelDelivered, _>(CloseShipment);
        let dispatcher = OutboxDispatcher::new(
            Arc::new(store.clone()),
            Arc::new(registry),
            Arc::new(scheduler.clone()),
            OutboxRelayConfig::default(),
        );
        (dispatcher, store, scheduler)
    }

    #[tokio::test]
    async fn test_creates_one_delivery_per_handler() {
        let (dispatcher, store, scheduler) = dispatcher();
        let writer = OutboxWriter::new(Arc::new(store.clone()));
        let message_id = writer
            .publish(&ParcelDelivered { parcel: 42 })
            .await
            .unwrap()
            .message_id();

        let report = dispatcher.dispatch_pending().await.unwrap();

        assert_eq!(report.messages, 1);
        assert_eq!(report.deliveries, 2);
        let deliveries = store.deliveries_for_message(&message_id).await.unwrap();
        let mut names: Vec<_> = deliveries.iter().map(|d| d.handler_name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["close-shipment", "notify-recipient"]);

        let message = store.find_message(&message_id).await.unwrap().unwrap();
        assert_eq!(message.status, OutboxStatus::Processed);

        let jobs = scheduler.jobs();
        assert_eq!(jobs.len(), 2);
        for delivery in &deliveries {
            assert!(jobs.contains(&ScheduledJob::ProcessDelivery(delivery.id)));
        }

        // Processed messages are not picked up again.
        let again = dispatcher.dispatch_pending().await.unwrap();
        assert_eq!(again, OutboxDispatchReport::default());
    }

    #[tokio::test]
    async fn test_message_without_subscribers_is_processed() {
        let (dispatcher, store, scheduler) = dispatcher();
        let writer = OutboxWriter::new(Arc::new(store.clone()));
        let message_id = writer
            .publish(&ParcelLost { parcel: 7 })
            .await
            .unwrap()
            .message_id();

        let report = dispatcher.dispatch_pending().await.unwrap();

        assert_eq!(report.messages, 1);
        assert_eq!(report.deliveries, 0);
        let message = store.find_message(&message_id).await.unwrap().unwrap();
        assert_eq!(message.status, OutboxStatus::Processed);
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_schedule_failure_keeps_deliveries() {
        let (dispatcher, store, scheduler) = dispatcher();
        let writer = OutboxWriter::new(Arc::new(store.clone()));
        writer.publish(&ParcelDelivered { parcel: 1 }).await.unwrap();
        scheduler.set_failing(true);

        let report = dispatcher.dispatch_pending().await.unwrap();

        assert_eq!(report.deliveries, 2);
        assert_eq!(report.schedule_failures, 2);
        assert_eq!(store.deliveries().len(), 2);
    }

    #[tokio::test]
    async fn test_store_unavailable_propagates() {
        let (dispatcher, store, _scheduler) = dispatcher();
        store.set_unavailable(true);

        let result = dispatcher.dispatch_pending().await;

        assert!(matches!(
            result,
            Err(OutboxError::Repository(RepositoryError::Unavailable { .. }))
        ));
    }
}
