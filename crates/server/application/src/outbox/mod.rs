//! Transactional outbox pipeline
//!
//! ```text
//! write_event ─► OutboxMessage(Pending) ─► OutboxDispatcher ─► OutboxDelivery × handlers
//!                                                                   │
//!                              DeliverySweeper ◄── retry due ◄── DeliveryProcessor
//! ```

pub mod dispatcher;
pub mod processor;
pub mod sweeper;
pub mod writer;

pub use dispatcher::{OutboxDispatchReport, OutboxDispatcher};
pub use processor::{DeliveryOutcome, DeliveryProcessor};
pub use sweeper::{DeliverySweepReport, DeliverySweeper};
pub use writer::{OutboxWriter, write_event};
