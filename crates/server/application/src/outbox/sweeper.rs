//! Delivery Sweeper
//!
//! Hands due deliveries back to the scheduler: failed ones whose retry time
//! has come, and fresh ones whose first hand-off was lost.

use chrono::{DateTime, Utc};
use courier_domain::{BackgroundScheduler, OutboxDelivery, OutboxStore, RepositoryError, ScheduledJob};
use courier_shared::config::SweeperConfig;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySweepReport {
    pub scheduled: usize,
    pub schedule_failures: usize,
}

pub struct DeliverySweeper {
    store: Arc<dyn OutboxStore>,
    scheduler: Arc<dyn BackgroundScheduler>,
    config: SweeperConfig,
}

impl DeliverySweeper {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        scheduler: Arc<dyn BackgroundScheduler>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            config,
        }
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = self.config.interval_ms,
            batch_size = self.config.batch_size,
            "Starting delivery sweeper"
        );

        let mut interval = tokio::time::interval(self.config.interval());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep_once(Utc::now()).await {
                        Ok(report) if report.scheduled > 0 => {
                            tracing::info!(
                                scheduled = report.scheduled,
                                schedule_failures = report.schedule_failures,
                                "Delivery sweep finished"
                            );
                            self.log_stats().await;
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!("Error sweeping deliveries: {}", e),
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Delivery sweeper shutting down");
                    break;
                }
            }
        }
    }

    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<DeliverySweepReport, RepositoryError> {
        let grace = chrono::Duration::from_std(self.config.orphan_grace())
            .unwrap_or_else(|_| chrono::Duration::zero());
        let due = self
            .store
            .get_due_deliveries(now, now - grace, self.config.batch_size)
            .await?;
        let mut report = DeliverySweepReport::default();

        for mut delivery in due {
            delivery.mark_scheduled(now);
            self.persist(&delivery).await?;

            match self
                .scheduler
                .enqueue(ScheduledJob::ProcessDelivery(delivery.id))
                .await
            {
                Ok(_) => {
                    tracing::debug!(
                        delivery_id = %delivery.id,
                        handler = %delivery.handler_name,
                        attempts = delivery.attempts,
                        "Delivery scheduled"
                    );
                    report.scheduled += 1;
                }
                Err(e) => {
                    tracing::warn!(delivery_id = %delivery.id, error = %e, "Failed to schedule delivery");
                    report.schedule_failures += 1;
                }
            }
        }

        Ok(report)
    }

    async fn persist(&self, delivery: &OutboxDelivery) -> Result<(), RepositoryError> {
        let mut tx = self.store.begin().await?;
        if let Err(e) = tx.update_delivery(delivery).await {
            let _ = tx.rollback().await;
            return Err(e);
        }
        tx.commit().await
    }

    async fn log_stats(&self) {
        match self.store.stats().await {
            Ok(stats) => tracing::debug!(
                pending_messages = stats.pending_messages,
                processed_messages = stats.processed_messages,
                pending_deliveries = stats.pending_deliveries,
                succeeded_deliveries = stats.succeeded_deliveries,
                exhausted_deliveries = stats.exhausted_deliveries,
                "Outbox statistics"
            ),
            Err(e) => tracing::debug!("Outbox statistics unavailable: {}", e),
        }
    }
}

impl std::fmt::Debug for DeliverySweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliverySweeper")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
