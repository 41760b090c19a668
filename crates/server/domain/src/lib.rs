// Courier - Domain Layer
// Bounded contexts:
// - command: Command/handler traits, type descriptors, idempotency keys, registry
// - envelope: CommandEnvelope aggregate, execution log, retry policy, store port
// - outbox: Outbox messages/deliveries, event handlers, store port
// - scheduling: Background scheduler port and job contract
// - shared_kernel: Errors shared by every persistence port

pub mod command;
pub mod envelope;
pub mod outbox;
pub mod scheduling;
pub mod shared_kernel;

pub use command::*;
pub use envelope::*;
pub use outbox::*;
pub use scheduling::*;
pub use shared_kernel::*;

pub use courier_shared::{CorrelationId, DeliveryId, EnvelopeId, OutboxMessageId};
