//! Command capability and handler contracts.
//!
//! A command is any serializable value that can be persisted inside a
//! [`CommandEnvelope`](crate::envelope::CommandEnvelope) and later handed to
//! every handler registered for its exact type.
//!
//! # Ejemplo
//!
//! ```ignore
//! #[derive(Debug, Serialize, Deserialize)]
//! struct SendInvoice { invoice_id: Uuid, correlation: CorrelationId }
//!
//! impl Command for SendInvoice {
//!     fn correlation_id(&self) -> Option<CorrelationId> {
//!         Some(self.correlation)
//!     }
//! }
//! ```

pub mod descriptor;
pub mod erased;
pub mod error;
pub mod idempotency;
pub mod registry;
pub mod scope;

pub use descriptor::{CommandTypeDescriptor, EventTypeDescriptor, TypeDescriptor};
pub use erased::ErasedCommandHandler;
pub use error::{CommandTypeError, IdempotencyError};
pub use idempotency::IdempotencyKey;
pub use registry::{HandlerRegistry, ResolvedCommand};
pub use scope::ExecutionScope;

use async_trait::async_trait;
use courier_shared::CorrelationId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tokio_util::sync::CancellationToken;

/// Capability implemented by every value that can be enqueued.
///
/// `correlation_id` is the caller's deduplication handle: two enqueues
/// carrying the same id collapse into one envelope. Commands that return
/// `None` get a fresh random id and are never deduplicated.
pub trait Command: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {
    fn correlation_id(&self) -> Option<CorrelationId> {
        None
    }

    /// Stable identifier persisted with the envelope and used to match
    /// handlers. Defaults to the fully qualified Rust type path.
    ///
    /// The default comes from `std::any::type_name`, whose output is not
    /// guaranteed across compiler versions, and it changes whenever the type
    /// moves between modules. Commands that can sit in the store across a
    /// redeploy should override it with a literal:
    ///
    /// ```ignore
    /// fn command_type() -> CommandTypeDescriptor {
    ///     CommandTypeDescriptor::from_identifier("billing.SendInvoice")
    /// }
    /// ```
    fn command_type() -> CommandTypeDescriptor
    where
        Self: Sized,
    {
        CommandTypeDescriptor::of::<Self>()
    }
}

/// Handler for one exact command type.
///
/// Handlers are built fresh for every execution (see [`ExecutionScope`]), so
/// they may hold per-execution state without synchronizing with siblings.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    /// Name recorded in the execution log for this handler.
    fn name() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }

    async fn handle(&self, command: &C, cancel: &CancellationToken) -> anyhow::Result<()>;
}
