//! Outbox Message and Delivery Model
//!
//! An [`OutboxMessage`] is an event written in the same transaction as the
//! business change that raised it. The outbox dispatcher fans each message out
//! into one [`OutboxDelivery`] per subscribed handler; deliveries are then
//! processed and retried independently of each other.

use crate::command::EventTypeDescriptor;
use crate::envelope::{HandlerFailure, RetryPolicy};
use chrono::{DateTime, Utc};
use courier_shared::{CorrelationId, DeliveryId, OutboxMessageId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutboxStatus {
    /// Written, deliveries not created yet
    Pending,
    /// Deliveries created
    Processed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: OutboxMessageId,
    pub event_type: EventTypeDescriptor,
    pub payload: String,
    pub correlation_id: Option<CorrelationId>,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    pub fn new(
        event_type: EventTypeDescriptor,
        payload: String,
        correlation_id: Option<CorrelationId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OutboxMessageId::new(),
            event_type,
            payload,
            correlation_id,
            status: OutboxStatus::Pending,
            created_at: now,
            processed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Processed;
        self.processed_at = Some(now);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Succeeded,
}

/// One (message, handler) pair.
///
/// A delivery that has failed more times than the retry policy allows stays
/// Pending with no next attempt; it is exhausted and never picked up again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxDelivery {
    pub id: DeliveryId,
    pub message_id: OutboxMessageId,
    pub handler_name: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OutboxDelivery {
    pub fn new(message_id: OutboxMessageId, handler_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: DeliveryId::new(),
            message_id,
            handler_name: handler_name.into(),
            status: DeliveryStatus::Pending,
            attempts: 0,
            next_attempt_at: None,
            last_error: None,
            scheduled_at: now,
            processed_at: None,
            created_at: now,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == DeliveryStatus::Succeeded
    }

    pub fn is_exhausted(&self) -> bool {
        self.status == DeliveryStatus::Pending && !RetryPolicy::STANDARD.can_retry(self.attempts)
    }

    /// Whether a sweep should hand this delivery to the scheduler: a retry is
    /// due, or the last hand-off happened before `stale_before` and nothing
    /// has been heard since.
    pub fn is_due(&self, now: DateTime<Utc>, stale_before: DateTime<Utc>) -> bool {
        if self.status != DeliveryStatus::Pending || self.is_exhausted() {
            return false;
        }
        match self.next_attempt_at {
            Some(at) => at <= now,
            None => self.scheduled_at <= stale_before,
        }
    }

    pub fn mark_succeeded(&mut self, now: DateTime<Utc>) {
        self.status = DeliveryStatus::Succeeded;
        self.processed_at = Some(now);
        self.next_attempt_at = None;
        self.last_error = None;
    }

    /// Counts a failed attempt and computes the next one from the shared
    /// retry schedule.
    pub fn record_failure(&mut self, failure: &HandlerFailure, now: DateTime<Utc>) {
        let attempt_index = self.attempts;
        self.attempts += 1;
        self.last_error = Some(failure.summary());
        self.next_attempt_at = RetryPolicy::STANDARD.next_attempt_at(attempt_index, now);
    }

    pub fn mark_scheduled(&mut self, now: DateTime<Utc>) {
        self.scheduled_at = now;
        self.next_attempt_at = None;
    }
}
