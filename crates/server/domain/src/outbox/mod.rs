//! Transactional outbox: events written with business data, fanned out into
//! per-handler deliveries.

pub mod event;
pub mod model;
pub mod repository;

pub use event::{DomainEvent, ErasedEventHandler, EventHandler, EventHandlerRegistry};
pub use model::{DeliveryStatus, OutboxDelivery, OutboxMessage, OutboxStatus};
pub use repository::{MessageInsert, OutboxStats, OutboxStore, OutboxTransaction};
