//! RetryPolicy - fixed backoff schedule shared by envelopes, outbox
//! deliveries and the in-process scheduler.
//!
//! ```text
//! Attempt index   Outcome on failure
//! ─────────────────────────────────────
//!     0           retry in 60s
//!     1           retry in 300s  (5 min)
//!     2           retry in 900s  (15 min)
//!     3           no further retry -> dead letter
//! ```
//!
//! The schedule has no jitter: the next attempt time is a pure function of
//! the attempt index and the failure time.

use chrono::{DateTime, Duration, Utc};

/// Delays (seconds) applied after the 1st, 2nd and 3rd failed attempt.
pub const BACKOFF_SCHEDULE_SECS: [u64; 3] = [60, 300, 900];

/// Retries allowed after the first attempt; four attempts in total.
pub const MAX_RETRY_ATTEMPTS: u32 = BACKOFF_SCHEDULE_SECS.len() as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    schedule: &'static [u64],
}

impl RetryPolicy {
    pub const STANDARD: RetryPolicy = RetryPolicy {
        schedule: &BACKOFF_SCHEDULE_SECS,
    };

    pub const fn max_retry_attempts(&self) -> u32 {
        self.schedule.len() as u32
    }

    /// Delay before the attempt following failed attempt `attempt_index`
    /// (0-based). `None` once the schedule is exhausted.
    pub fn delay_for_attempt(&self, attempt_index: u32) -> Option<std::time::Duration> {
        self.schedule
            .get(attempt_index as usize)
            .map(|secs| std::time::Duration::from_secs(*secs))
    }

    pub fn next_attempt_at(&self, attempt_index: u32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .get(attempt_index as usize)
            .map(|secs| now + Duration::seconds(*secs as i64))
    }

    /// True while `attempts_made` failed attempts still leave a retry.
    pub fn can_retry(&self, attempts_made: u32) -> bool {
        attempts_made <= self.max_retry_attempts()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::STANDARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule() {
        let policy = RetryPolicy::STANDARD;
        let now = Utc::now();

        assert_eq!(policy.next_attempt_at(0, now), Some(now + Duration::seconds(60)));
        assert_eq!(policy.next_attempt_at(1, now), Some(now + Duration::seconds(300)));
        assert_eq!(policy.next_attempt_at(2, now), Some(now + Duration::seconds(900)));
        assert_eq!(policy.next_attempt_at(3, now), None);
    }

    #[test]
    fn test_std_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for_attempt(1),
            Some(std::time::Duration::from_secs(300))
        );
        assert_eq!(policy.delay_for_attempt(7), None);
    }

    #[test]
    fn test_can_retry_boundary() {
        let policy = RetryPolicy::STANDARD;
        assert_eq!(policy.max_retry_attempts(), MAX_RETRY_ATTEMPTS);
        assert!(policy.can_retry(1));
        assert!(policy.can_retry(3));
        assert!(!policy.can_retry(4));
    }
}
