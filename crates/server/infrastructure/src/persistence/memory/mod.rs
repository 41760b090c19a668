//! In-memory adapters for the envelope and outbox ports.
//!
//! Used by the single-process server and as test doubles; a relational
//! adapter would implement the same traits with row-level transactions.

pub mod envelope_store;
pub mod outbox_store;

pub use envelope_store::{InMemoryEnvelopeStore, InMemoryEnvelopeTransaction};
pub use outbox_store::{InMemoryOutboxStore, InMemoryOutboxTransaction};
