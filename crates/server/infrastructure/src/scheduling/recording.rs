//! Scheduler that only records what it was asked to run.
//!
//! Backs the `noop` scheduler mode: jobs are never executed in-process and
//! the sweepers are the only thing that moves work forward. Tests use it to
//! assert exactly which jobs were scheduled.

use async_trait::async_trait;
use courier_domain::{BackgroundScheduler, JobId, ScheduledJob, SchedulerError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone, Default)]
pub struct RecordingScheduler {
    jobs: Arc<Mutex<Vec<ScheduledJob>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `enqueue` fail with a backend error until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn jobs(&self) -> Vec<ScheduledJob> {
        self.jobs.lock().clone()
    }

    /// Drains the recorded jobs.
    pub fn take_jobs(&self) -> Vec<ScheduledJob> {
        std::mem::take(&mut *self.jobs.lock())
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BackgroundScheduler for RecordingScheduler {
    async fn enqueue(&self, job: ScheduledJob) -> Result<JobId, SchedulerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SchedulerError::Backend {
                message: "recording scheduler set to fail".to_string(),
            });
        }
        tracing::debug!(job = %job, "Recorded scheduled job");
        self.jobs.lock().push(job);
        Ok(JobId::new())
    }
}
