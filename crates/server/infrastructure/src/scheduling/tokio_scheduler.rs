//! # Tokio Scheduler
//!
//! In-process [`BackgroundScheduler`] backed by a bounded mpsc channel.
//!
//! ```text
//! enqueue ──► mpsc::Sender ──► worker loop ──► tokio::spawn(JobHandler::run)
//!                  ▲                                   │
//!                  └──── sleep(retry delay) ◄──────────┘ retryable error
//! ```
//!
//! Every job runs on its own task. A retryable error that names its own
//! delay (`JobError::retry_after`) is re-enqueued after exactly that delay;
//! the job owns that schedule and its bound. Any other retryable error uses
//! the shared retry policy, at most `MAX_RETRY_ATTEMPTS` times.

use async_trait::async_trait;
use courier_domain::{BackgroundScheduler, JobHandler, JobId, RetryPolicy, ScheduledJob, SchedulerError};
use courier_shared::config::SchedulerConfig;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
struct QueuedJob {
    id: JobId,
    job: ScheduledJob,
    failures: u32,
}

#[derive(Debug, Clone)]
pub struct TokioScheduler {
    sender: mpsc::Sender<QueuedJob>,
    shutdown: CancellationToken,
}

impl TokioScheduler {
    /// Spawns the worker loop on the current runtime.
    pub fn start(handler: Arc<dyn JobHandler>, config: &SchedulerConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_depth.max(1));
        let shutdown = CancellationToken::new();

        let worker = Worker {
            handler,
            retry_sender: sender.downgrade(),
            shutdown: shutdown.clone(),
            policy: RetryPolicy::STANDARD,
        };
        tokio::spawn(worker.run(receiver));

        tracing::info!(queue_depth = config.queue_depth, "Tokio scheduler started");
        Self { sender, shutdown }
    }

    /// Stops accepting jobs and cancels running ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl BackgroundScheduler for TokioScheduler {
    async fn enqueue(&self, job: ScheduledJob) -> Result<JobId, SchedulerError> {
        if self.shutdown.is_cancelled() {
            return Err(SchedulerError::ShutDown);
        }
        let id = JobId::new();
        self.sender
            .send(QueuedJob {
                id,
                job,
                failures: 0,
            })
            .await
            .map_err(|_| SchedulerError::ShutDown)?;
        tracing::debug!(job_id = %id, job = %job, "Job enqueued");
        Ok(id)
    }
}

#[derive(Clone)]
struct Worker {
    handler: Arc<dyn JobHandler>,
    retry_sender: mpsc::WeakSender<QueuedJob>,
    shutdown: CancellationToken,
    policy: RetryPolicy,
}

impl Worker {
    async fn run(self, mut receiver: mpsc::Receiver<QueuedJob>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Tokio scheduler shutting down");
                    break;
                }
                queued = receiver.recv() => {
                    let Some(queued) = queued else {
                        tracing::debug!("Scheduler channel closed");
                        break;
                    };
                    tokio::spawn(self.clone().execute(queued));
                }
            }
        }
    }

    async fn execute(self, queued: QueuedJob) {
        let result = self.handler.run(queued.job, self.shutdown.child_token()).await;
        let error = match result {
            Ok(()) => {
                tracing::debug!(job_id = %queued.id, job = %queued.job, "Job finished");
                return;
            }
            Err(e) => e,
        };

        if !error.is_retryable() {
            tracing::error!(job_id = %queued.id, job = %queued.job, error = %error, "Job failed permanently");
            return;
        }

        let (delay, failures) = match error.requested_delay() {
            Some(delay) => (delay, queued.failures),
            None => {
                let Some(delay) = self.policy.delay_for_attempt(queued.failures) else {
                    tracing::error!(
                        job_id = %queued.id,
                        job = %queued.job,
                        failures = queued.failures + 1,
                        error = %error,
                        "Job retries exhausted; giving up"
                    );
                    return;
                };
                (delay, queued.failures + 1)
            }
        };

        tracing::warn!(
            job_id = %queued.id,
            job = %queued.job,
            retry_in_secs = delay.as_secs(),
            error = %error,
            "Job failed; retrying"
        );

        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                let Some(sender) = self.retry_sender.upgrade() else {
                    return;
                };
                let retry = QueuedJob { failures, ..queued };
                if sender.send(retry).await.is_err() {
                    tracing::warn!(job_id = %queued.id, "Scheduler closed before retry");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_domain::{EnvelopeId, JobError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct ScriptedHandler {
        calls: AtomicU32,
        fail_first: u32,
        error: JobError,
        done: mpsc::UnboundedSender<(ScheduledJob, u32)>,
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        async fn run(&self, job: ScheduledJob, _cancel: CancellationToken) -> Result<(), JobError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let _ = self.done.send((job, call));
            if call <= self.fail_first {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    fn scheduler(fail_first: u32, error: JobError) -> (TokioScheduler, Arc<ScriptedHandler>, mpsc::UnboundedReceiver<(ScheduledJob, u32)>) {
        let (done, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(ScriptedHandler {
            calls: AtomicU32::new(0),
            fail_first,
            error,
            done,
        });
        let scheduler = TokioScheduler::start(handler.clone(), &SchedulerConfig::default());
        (scheduler, handler, rx)
    }

    #[tokio::test]
    async fn test_runs_enqueued_job() {
        let (scheduler, _handler, mut rx) = scheduler(0, JobError::retryable("unused"));
        let job = ScheduledJob::Orchestrate(EnvelopeId::new());
        scheduler.enqueue(job).await.unwrap();

        let (ran, call) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ran, job);
        assert_eq!(call, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_is_retried_after_backoff() {
        let (scheduler, _handler, mut rx) = scheduler(1, JobError::retryable("db down"));
        let started = tokio::time::Instant::now();
        scheduler
            .enqueue(ScheduledJob::Orchestrate(EnvelopeId::new()))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().1, 1);
        assert_eq!(rx.recv().await.unwrap().1, 2);
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let (scheduler, handler, _rx) = scheduler(u32::MAX, JobError::retryable("always"));
        scheduler
            .enqueue(ScheduledJob::Orchestrate(EnvelopeId::new()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(60 + 300 + 900 + 3600)).await;
        // First run plus three retries.
        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let (scheduler, handler, _rx) = scheduler(1, JobError::Fatal {
            message: "corrupt".into(),
        });
        scheduler
            .enqueue(ScheduledJob::Orchestrate(EnvelopeId::new()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    /// Returns the scripted errors in order, then succeeds.
    struct SequencedHandler {
        script: parking_lot::Mutex<std::collections::VecDeque<JobError>>,
        runs: mpsc::UnboundedSender<tokio::time::Instant>,
    }

    #[async_trait]
    impl JobHandler for SequencedHandler {
        async fn run(&self, _job: ScheduledJob, _cancel: CancellationToken) -> Result<(), JobError> {
            let _ = self.runs.send(tokio::time::Instant::now());
            match self.script.lock().pop_front() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }
    }

    fn sequenced(script: Vec<JobError>) -> (TokioScheduler, mpsc::UnboundedReceiver<tokio::time::Instant>) {
        let (runs, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(SequencedHandler {
            script: parking_lot::Mutex::new(script.into()),
            runs,
        });
        (TokioScheduler::start(handler, &SchedulerConfig::default()), rx)
    }

    fn assert_gap(from: tokio::time::Instant, to: tokio::time::Instant, secs: u64) {
        let gap = to - from;
        assert!(
            gap >= Duration::from_secs(secs) && gap < Duration::from_secs(secs + 1),
            "expected ~{secs}s between runs, got {gap:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_requested_delay_overrides_backoff() {
        let (scheduler, mut runs) = sequenced(vec![JobError::retry_after(
            "attempt 2 failed",
            Duration::from_secs(900),
        )]);
        scheduler
            .enqueue(ScheduledJob::Orchestrate(EnvelopeId::new()))
            .await
            .unwrap();

        let first = runs.recv().await.unwrap();
        let second = runs.recv().await.unwrap();
        assert_gap(first, second, 900);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_does_not_shift_requested_delays() {
        let (scheduler, mut runs) = sequenced(vec![
            JobError::retryable("store down"),
            JobError::retry_after("attempt 0 failed", Duration::from_secs(60)),
            JobError::retryable("store down"),
        ]);
        scheduler
            .enqueue(ScheduledJob::Orchestrate(EnvelopeId::new()))
            .await
            .unwrap();

        let mut at = Vec::new();
        for _ in 0..4 {
            at.push(runs.recv().await.unwrap());
        }
        assert_gap(at[0], at[1], 60);
        assert_gap(at[1], at[2], 60);
        // The explicit delay did not consume a policy slot.
        assert_gap(at[2], at[3], 300);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown() {
        let (scheduler, _handler, _rx) = scheduler(0, JobError::retryable("unused"));
        scheduler.shutdown();
        let result = scheduler
            .enqueue(ScheduledJob::Orchestrate(EnvelopeId::new()))
            .await;
        assert_eq!(result, Err(SchedulerError::ShutDown));
    }
}
