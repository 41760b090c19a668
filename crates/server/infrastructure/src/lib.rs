// Courier Dispatch - Infrastructure Layer
// Adaptadores concretos de los puertos del dominio

// Persistencia en memoria (envelopes + outbox)
pub mod persistence;

// Planificación de trabajos en segundo plano
pub mod scheduling;

// Logging estructurado
pub mod observability;

pub use observability::init_tracing;
pub use persistence::{
    InMemoryEnvelopeStore, InMemoryEnvelopeTransaction, InMemoryOutboxStore,
    InMemoryOutboxTransaction,
};
pub use scheduling::{RecordingScheduler, TokioScheduler};
