//! In-memory outbox store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_domain::{
    CorrelationId, DeliveryId, MessageInsert, OutboxDelivery, OutboxMessage, OutboxMessageId,
    OutboxStats, OutboxStore, OutboxTransaction, RepositoryError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct OutboxTables {
    messages: HashMap<OutboxMessageId, OutboxMessage>,
    by_correlation: HashMap<CorrelationId, OutboxMessageId>,
    deliveries: HashMap<DeliveryId, OutboxDelivery>,
}

#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    tables: Arc<Mutex<OutboxTables>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<OutboxMessage> {
        let mut messages: Vec<_> = self.tables.lock().messages.values().cloned().collect();
        messages.sort_by_key(|m| m.created_at);
        messages
    }

    pub fn deliveries(&self) -> Vec<OutboxDelivery> {
        let mut deliveries: Vec<_> = self.tables.lock().deliveries.values().cloned().collect();
        deliveries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.handler_name.cmp(&b.handler_name))
        });
        deliveries
    }
}

fn check_available(flag: &AtomicBool) -> Result<(), RepositoryError> {
    if flag.load(Ordering::SeqCst) {
        Err(RepositoryError::unavailable("in-memory outbox store is offline"))
    } else {
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn begin(&self) -> Result<Box<dyn OutboxTransaction>, RepositoryError> {
        check_available(&self.unavailable)?;
        Ok(Box::new(InMemoryOutboxTransaction {
            tables: Arc::clone(&self.tables),
            unavailable: Arc::clone(&self.unavailable),
            staged: Vec::new(),
        }))
    }

    async fn find_message(&self, id: &OutboxMessageId) -> Result<Option<OutboxMessage>, RepositoryError> {
        check_available(&self.unavailable)?;
        Ok(self.tables.lock().messages.get(id).cloned())
    }

    async fn find_delivery(&self, id: &DeliveryId) -> Result<Option<OutboxDelivery>, RepositoryError> {
        check_available(&self.unavailable)?;
        Ok(self.tables.lock().deliveries.get(id).cloned())
    }

    async fn deliveries_for_message(
        &self,
        message_id: &OutboxMessageId,
    ) -> Result<Vec<OutboxDelivery>, RepositoryError> {
        check_available(&self.unavailable)?;
        Ok(self
            .deliveries()
            .into_iter()
            .filter(|d| d.message_id == *message_id)
            .collect())
    }

    async fn get_pending_messages(&self, limit: usize) -> Result<Vec<OutboxMessage>, RepositoryError> {
        check_available(&self.unavailable)?;
        Ok(self
            .messages()
            .into_iter()
            .filter(OutboxMessage::is_pending)
            .take(limit)
            .collect())
    }

    async fn get_due_deliveries(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxDelivery>, RepositoryError> {
        check_available(&self.unavailable)?;
        let mut due: Vec<_> = self
            .tables
            .lock()
            .deliveries
            .values()
            .filter(|d| d.is_due(now, stale_before))
            .cloned()
            .collect();
        due.sort_by_key(|d| d.next_attempt_at.unwrap_or(d.scheduled_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn stats(&self) -> Result<OutboxStats, RepositoryError> {
        check_available(&self.unavailable)?;
        let tables = self.tables.lock();
        let mut stats = OutboxStats::default();
        tables.messages.values().for_each(|m| stats.record_message(m));
        tables.deliveries.values().for_each(|d| stats.record_delivery(d));
        Ok(stats)
    }
}

enum StagedOutboxWrite {
    InsertMessage(OutboxMessage),
    UpdateMessage(OutboxMessage),
    InsertDelivery(OutboxDelivery),
    UpdateDelivery(OutboxDelivery),
}

pub struct InMemoryOutboxTransaction {
    tables: Arc<Mutex<OutboxTables>>,
    unavailable: Arc<AtomicBool>,
    staged: Vec<StagedOutboxWrite>,
}

impl InMemoryOutboxTransaction {
    fn staged_message_with_correlation(&self, correlation_id: &CorrelationId) -> Option<OutboxMessageId> {
        self.staged.iter().find_map(|write| match write {
            StagedOutboxWrite::InsertMessage(m) if m.correlation_id.as_ref() == Some(correlation_id) => {
                Some(m.id)
            }
            _ => None,
        })
    }

    fn message_known(&self, id: &OutboxMessageId) -> bool {
        self.staged
            .iter()
            .any(|w| matches!(w, StagedOutboxWrite::InsertMessage(m) if m.id == *id))
            || self.tables.lock().messages.contains_key(id)
    }

    fn delivery_known(&self, id: &DeliveryId) -> bool {
        self.staged
            .iter()
            .any(|w| matches!(w, StagedOutboxWrite::InsertDelivery(d) if d.id == *id))
            || self.tables.lock().deliveries.contains_key(id)
    }
}

#[async_trait]
impl OutboxTransaction for InMemoryOutboxTransaction {
    async fn insert_message(&mut self, message: OutboxMessage) -> Result<MessageInsert, RepositoryError> {
        check_available(&self.unavailable)?;
        if let Some(correlation_id) = message.correlation_id {
            if let Some(existing) = self.staged_message_with_correlation(&correlation_id) {
                return Ok(MessageInsert::Duplicate(existing));
            }
            if let Some(existing) = self.tables.lock().by_correlation.get(&correlation_id) {
                return Ok(MessageInsert::Duplicate(*existing));
            }
        }
        let id = message.id;
        self.staged.push(StagedOutboxWrite::InsertMessage(message));
        Ok(MessageInsert::Inserted(id))
    }

    async fn update_message(&mut self, message: &OutboxMessage) -> Result<(), RepositoryError> {
        check_available(&self.unavailable)?;
        if !self.message_known(&message.id) {
            return Err(RepositoryError::NotFound {
                entity: "outbox message",
                id: message.id.to_string(),
            });
        }
        self.staged.push(StagedOutboxWrite::UpdateMessage(message.clone()));
        Ok(())
    }

    async fn insert_deliveries(&mut self, deliveries: &[OutboxDelivery]) -> Result<(), RepositoryError> {
        check_available(&self.unavailable)?;
        for delivery in deliveries {
            if !self.message_known(&delivery.message_id) {
                return Err(RepositoryError::NotFound {
                    entity: "outbox message",
                    id: delivery.message_id.to_string(),
                });
            }
        }
        self.staged.extend(
            deliveries
                .iter()
                .cloned()
                .map(StagedOutboxWrite::InsertDelivery),
        );
        Ok(())
    }

    async fn update_delivery(&mut self, delivery: &OutboxDelivery) -> Result<(), RepositoryError> {
        check_available(&self.unavailable)?;
        if !self.delivery_known(&delivery.id) {
            return Err(RepositoryError::NotFound {
                entity: "outbox delivery",
                id: delivery.id.to_string(),
            });
        }
        self.staged.push(StagedOutboxWrite::UpdateDelivery(delivery.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let InMemoryOutboxTransaction {
            tables,
            unavailable,
            staged,
        } = *self;
        check_available(&unavailable)?;
        let mut tables = tables.lock();

        for write in &staged {
            if let StagedOutboxWrite::InsertMessage(message) = write {
                if let Some(correlation_id) = &message.correlation_id {
                    if tables.by_correlation.contains_key(correlation_id) {
                        return Err(RepositoryError::Conflict {
                            constraint: "outbox_correlation_id",
                            value: correlation_id.to_string(),
                        });
                    }
                }
            }
        }

        for write in staged {
            match write {
                StagedOutboxWrite::InsertMessage(message) => {
                    if let Some(correlation_id) = message.correlation_id {
                        tables.by_correlation.insert(correlation_id, message.id);
                    }
                    tables.messages.insert(message.id, message);
                }
                StagedOutboxWrite::UpdateMessage(message) => {
                    tables.messages.insert(message.id, message);
                }
                StagedOutboxWrite::InsertDelivery(delivery)
                | StagedOutboxWrite::UpdateDelivery(delivery) => {
                    tables.deliveries.insert(delivery.id, delivery);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_domain::{EventTypeDescriptor, FailureKind, HandlerFailure};

    fn message(correlation_id: Option<CorrelationId>) -> OutboxMessage {
        OutboxMessage::new(
            EventTypeDescriptor::from_identifier("orders::OrderShipped"),
            r#"{"order_id":1}"#.to_string(),
            correlation_id,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_message_dedup_by_correlation() {
        let store = InMemoryOutboxStore::new();
        let correlation = CorrelationId::new();

        let mut tx = store.begin().await.unwrap();
        let first = tx.insert_message(message(Some(correlation))).await.unwrap();
        let second = tx.insert_message(message(Some(correlation))).await.unwrap();
        assert!(matches!(first, MessageInsert::Inserted(_)));
        assert!(matches!(second, MessageInsert::Duplicate(id) if id == first.message_id()));
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let third = tx.insert_message(message(Some(correlation))).await.unwrap();
        assert!(matches!(third, MessageInsert::Duplicate(_)));
        tx.commit().await.unwrap();

        assert_eq!(store.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_uncorrelated_messages_never_dedup() {
        let store = InMemoryOutboxStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_message(message(None)).await.unwrap();
        tx.insert_message(message(None)).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.get_pending_messages(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_deliveries_require_message() {
        let store = InMemoryOutboxStore::new();
        let mut tx = store.begin().await.unwrap();
        let orphan = OutboxDelivery::new(OutboxMessageId::new(), "h", Utc::now());
        let err = tx.insert_deliveries(&[orphan]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_message_and_deliveries_commit_together() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let mut msg = message(None);

        let mut tx = store.begin().await.unwrap();
        tx.insert_message(msg.clone()).await.unwrap();
        tx.commit().await.unwrap();

        let deliveries = vec![
            OutboxDelivery::new(msg.id, "a", now),
            OutboxDelivery::new(msg.id, "b", now),
        ];
        let mut tx = store.begin().await.unwrap();
        tx.insert_deliveries(&deliveries).await.unwrap();
        msg.mark_processed(now);
        tx.update_message(&msg).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(store.deliveries().is_empty());
        assert_eq!(store.get_pending_messages(10).await.unwrap().len(), 1);

        let mut tx = store.begin().await.unwrap();
        tx.insert_deliveries(&deliveries).await.unwrap();
        tx.update_message(&msg).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.deliveries_for_message(&msg.id).await.unwrap().len(), 2);
        assert!(store.get_pending_messages(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_due_deliveries_and_stats() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let msg = message(None);
        let mut failing = OutboxDelivery::new(msg.id, "failing", now);
        failing.record_failure(&HandlerFailure::new(FailureKind::HandlerFailed, "x", ""), now);
        let fresh = OutboxDelivery::new(msg.id, "fresh", now);

        let mut tx = store.begin().await.unwrap();
        tx.insert_message(msg).await.unwrap();
        tx.insert_deliveries(&[failing.clone(), fresh]).await.unwrap();
        tx.commit().await.unwrap();

        let later = now + chrono::Duration::seconds(61);
        let due = store
            .get_due_deliveries(later, now - chrono::Duration::seconds(300), 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, failing.id);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending_messages, 1);
        assert_eq!(stats.pending_deliveries, 2);
    }
}
