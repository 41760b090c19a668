//! Outbox Store Port
//!
//! Messages are written through [`OutboxTransaction`] so that an event can be
//! committed atomically with the business change that produced it.

use super::model::{DeliveryStatus, OutboxDelivery, OutboxMessage, OutboxStatus};
use crate::shared_kernel::RepositoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_shared::{DeliveryId, OutboxMessageId};

/// Estadísticas del outbox
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboxStats {
    pub pending_messages: u64,
    pub processed_messages: u64,
    pub pending_deliveries: u64,
    pub succeeded_deliveries: u64,
    pub exhausted_deliveries: u64,
}

impl OutboxStats {
    pub fn record_message(&mut self, message: &OutboxMessage) {
        match message.status {
            OutboxStatus::Pending => self.pending_messages += 1,
            OutboxStatus::Processed => self.processed_messages += 1,
        }
    }

    pub fn record_delivery(&mut self, delivery: &OutboxDelivery) {
        match delivery.status {
            DeliveryStatus::Succeeded => self.succeeded_deliveries += 1,
            DeliveryStatus::Pending if delivery.is_exhausted() => self.exhausted_deliveries += 1,
            DeliveryStatus::Pending => self.pending_deliveries += 1,
        }
    }
}

/// Result of inserting a message that carries a correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageInsert {
    Inserted(OutboxMessageId),
    /// A message with the same correlation id was already written
    Duplicate(OutboxMessageId),
}

impl MessageInsert {
    pub fn message_id(&self) -> OutboxMessageId {
        match self {
            MessageInsert::Inserted(id) | MessageInsert::Duplicate(id) => *id,
        }
    }
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn OutboxTransaction>, RepositoryError>;

    async fn find_message(&self, id: &OutboxMessageId) -> Result<Option<OutboxMessage>, RepositoryError>;

    async fn find_delivery(&self, id: &DeliveryId) -> Result<Option<OutboxDelivery>, RepositoryError>;

    async fn deliveries_for_message(
        &self,
        message_id: &OutboxMessageId,
    ) -> Result<Vec<OutboxDelivery>, RepositoryError>;

    /// Oldest Pending messages first.
    async fn get_pending_messages(&self, limit: usize) -> Result<Vec<OutboxMessage>, RepositoryError>;

    /// Deliveries for which [`OutboxDelivery::is_due`] holds.
    async fn get_due_deliveries(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxDelivery>, RepositoryError>;

    async fn stats(&self) -> Result<OutboxStats, RepositoryError>;
}

#[async_trait]
pub trait OutboxTransaction: Send {
    /// Stages `message`. Messages with a correlation id are deduplicated
    /// against both committed and staged messages.
    async fn insert_message(&mut self, message: OutboxMessage) -> Result<MessageInsert, RepositoryError>;

    async fn update_message(&mut self, message: &OutboxMessage) -> Result<(), RepositoryError>;

    async fn insert_deliveries(&mut self, deliveries: &[OutboxDelivery]) -> Result<(), RepositoryError>;

    async fn update_delivery(&mut self, delivery: &OutboxDelivery) -> Result<(), RepositoryError>;

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError>;
}
