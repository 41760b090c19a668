//! Outbox Writer
//!
//! Writes domain events into the outbox inside the caller's transaction, so
//! the event exists if and only if the business change committed.

use crate::error::OutboxError;
use chrono::Utc;
use courier_domain::{DomainEvent, MessageInsert, OutboxMessage, OutboxStore, OutboxTransaction};
use std::sync::Arc;

/// Stages `event` in `tx`.
///
/// Events carrying a correlation id already present in the outbox are not
/// written again; the existing message id is returned as
/// [`MessageInsert::Duplicate`].
pub async fn write_event<E: DomainEvent>(
    tx: &mut dyn OutboxTransaction,
    event: &E,
) -> Result<MessageInsert, OutboxError> {
    let payload = serde_json::to_string(event).map_err(|e| OutboxError::Serialization {
        message: e.to_string(),
    })?;
    let message = OutboxMessage::new(E::event_type(), payload, event.correlation_id(), Utc::now());
    let event_type = message.event_type.clone();

    let inserted = tx.insert_message(message).await?;
    match &inserted {
        MessageInsert::Inserted(id) => {
            tracing::debug!(message_id = %id, event_type = %event_type, "Event written to outbox")
        }
        MessageInsert::Duplicate(id) => {
            tracing::warn!(message_id = %id, event_type = %event_type, "Duplicate event absorbed by outbox")
        }
    }
    Ok(inserted)
}

/// Convenience wrapper that owns a single-event transaction.
pub struct OutboxWriter {
    store: Arc<dyn OutboxStore>,
}

impl OutboxWriter {
    pub fn new(store: Arc<dyn OutboxStore>) -> Self {
        Self { store }
    }

    pub async fn publish<E: DomainEvent>(&self, event: &E) -> Result<MessageInsert, OutboxError> {
        let mut tx = self.store.begin().await?;
        let inserted = match write_event(tx.as_mut(), event).await {
            Ok(inserted) => inserted,
            Err(e) => {
                let _ = tx.rollback().await;
                return Err(e);
            }
        };
        tx.commit().await?;
        Ok(inserted)
    }
}

impl std::fmt::Debug for OutboxWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxWriter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_domain::{CorrelationId, OutboxStatus};
    use courier_infrastructure::InMemoryOutboxStore;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct InvoiceIssued {
        invoice: String,
        correlation: Option<CorrelationId>,
    }

    impl DomainEvent for InvoiceIssued {
        fn correlation_id(&self) -> Option<CorrelationId> {
            self.correlation
        }
    }

    #[tokio::test]
    async fn test_publish_writes_pending_message() {
        let store = InMemoryOutboxStore::new();
        let writer = OutboxWriter::new(Arc::new(store.clone()));

        let inserted = writer
            .publish(&InvoiceIssued {
                invoice: "INV-7".into(),
                correlation: None,
            })
            .await
            .unwrap();

        let message = store.find_message(&inserted.message_id()).await.unwrap().unwrap();
        assert_eq!(message.status, OutboxStatus::Pending);
        assert_eq!(message.event_type, InvoiceIssued::event_type());
        assert!(message.payload.contains("INV-7"));
    }

    #[tokio::test]
    async fn test_correlated_events_are_written_once() {
        let store = InMemoryOutboxStore::new();
        let writer = OutboxWriter::new(Arc::new(store.clone()));
        let correlation = Some(CorrelationId::new());
        let event = InvoiceIssued {
            invoice: "INV-8".into(),
            correlation,
        };

        let first = writer.publish(&event).await.unwrap();
        let second = writer.publish(&event).await.unwrap();

        assert!(matches!(first, MessageInsert::Inserted(_)));
        assert_eq!(second, MessageInsert::Duplicate(first.message_id()));
        assert_eq!(store.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_event() {
        let store = InMemoryOutboxStore::new();
        let mut tx = store.begin().await.unwrap();
        write_event(
            tx.as_mut(),
            &InvoiceIssued {
                invoice: "INV-9".into(),
                correlation: None,
            },
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        assert!(store.messages().is_empty());
    }
}
