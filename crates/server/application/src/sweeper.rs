//! Retry Sweeper
//!
//! Safety net for envelopes the scheduler lost track of:
//!
//! - Failed envelopes whose `next_attempt_at` is overdue by more than the
//!   orphan grace are requeued (a `Retry` row is appended) and scheduled.
//! - Pending or Processing envelopes with no activity for longer than the
//!   grace are scheduled again (crash between commit and schedule, or a
//!   worker that died mid-attempt).
//!
//! Every envelope is committed before its job is handed to the scheduler.

use chrono::{DateTime, Utc};
use courier_domain::{
    BackgroundScheduler, CommandEnvelope, EnvelopeStore, RepositoryError, ScheduledJob,
    save_envelope,
};
use courier_shared::config::SweeperConfig;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub rescheduled: usize,
    /// Envelopes skipped because a concurrent writer changed them first
    pub skipped: usize,
    pub schedule_failures: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.requeued == 0 && self.rescheduled == 0 && self.skipped == 0
    }
}

pub struct RetrySweeper {
    store: Arc<dyn EnvelopeStore>,
    scheduler: Arc<dyn BackgroundScheduler>,
    config: SweeperConfig,
}

impl RetrySweeper {
    pub fn new(
        store: Arc<dyn EnvelopeStore>,
        scheduler: Arc<dyn BackgroundScheduler>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            config,
        }
    }

    /// Run the sweep loop until a shutdown signal arrives
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = self.config.interval_ms,
            batch_size = self.config.batch_size,
            orphan_grace_secs = self.config.orphan_grace_secs,
            "Starting envelope retry sweeper"
        );

        let mut interval = tokio::time::interval(self.config.interval());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep_once(Utc::now()).await {
                        Ok(report) if !report.is_empty() => {
                            tracing::info!(
                                requeued = report.requeued,
                                rescheduled = report.rescheduled,
                                skipped = report.skipped,
                                schedule_failures = report.schedule_failures,
                                "Envelope sweep finished"
                            );
                            self.log_stats().await;
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!("Error sweeping envelopes: {}", e),
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Envelope retry sweeper shutting down");
                    break;
                }
            }
        }
    }

    /// One pass over overdue and stale envelopes.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, RepositoryError> {
        let grace = chrono::Duration::from_std(self.config.orphan_grace())
            .unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = now - grace;
        let mut report = SweepReport::default();
        let mut to_schedule = Vec::new();

        let overdue = self
            .store
            .get_pending_retries(cutoff, self.config.batch_size)
            .await?;
        for mut envelope in overdue {
            if let Err(e) = envelope.requeue(now) {
                tracing::debug!(envelope_id = %envelope.id(), error = %e, "Envelope not requeueable");
                continue;
            }
            if self.persist(&envelope, &mut report).await? {
                tracing::info!(
                    envelope_id = %envelope.id(),
                    attempt = envelope.attempt_count(),
                    "Overdue envelope requeued"
                );
                report.requeued += 1;
                to_schedule.push(envelope);
            }
        }

        let stale = self
            .store
            .get_stale_in_flight(cutoff, self.config.batch_size)
            .await?;
        for mut envelope in stale {
            envelope.touch_scheduled(now);
            if self.persist(&envelope, &mut report).await? {
                tracing::warn!(
                    envelope_id = %envelope.id(),
                    status = %envelope.status(),
                    "Stale envelope rescheduled"
                );
                report.rescheduled += 1;
                to_schedule.push(envelope);
            }
        }

        for envelope in to_schedule {
            if let Err(e) = self
                .scheduler
                .enqueue(ScheduledJob::Orchestrate(envelope.id()))
                .await
            {
                tracing::warn!(envelope_id = %envelope.id(), error = %e, "Failed to schedule envelope");
                report.schedule_failures += 1;
            }
        }

        Ok(report)
    }

    /// Saves one envelope; `false` when a concurrent writer got there first.
    async fn persist(
        &self,
        envelope: &CommandEnvelope,
        report: &mut SweepReport,
    ) -> Result<bool, RepositoryError> {
        match save_envelope(self.store.as_ref(), envelope).await {
            Ok(()) => Ok(true),
            Err(e @ RepositoryError::Unavailable { .. }) => Err(e),
            Err(e) => {
                tracing::debug!(envelope_id = %envelope.id(), error = %e, "Envelope changed during sweep; skipping");
                report.skipped += 1;
                Ok(false)
            }
        }
    }

    async fn log_stats(&self) {
        match self.store.stats().await {
            Ok(stats) => tracing::debug!(
                pending = stats.pending,
                processing = stats.processing,
                completed = stats.completed,
                failed = stats.failed,
                dead_lettered = stats.dead_lettered,
                "Envelope statistics"
            ),
            Err(e) => tracing::debug!("Envelope statistics unavailable: {}", e),
        }
    }
}

impl std::fmt::Debug for RetrySweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrySweeper")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
