//! Type erasure for command handlers.
//!
//! The orchestrator only knows the persisted descriptor of a command, never
//! its Rust type, so handlers are stored behind an object-safe trait that
//! accepts the decoded command as `Arc<dyn Any>`.

use super::scope::ExecutionScope;
use super::{Command, CommandHandler};
use anyhow::anyhow;
use async_trait::async_trait;
use std::any::Any;
use std::marker::PhantomData;

/// Object-safe handler entry stored in the registry.
#[async_trait]
pub trait ErasedCommandHandler: Send + Sync {
    /// Name recorded in the execution log.
    fn handler_name(&self) -> &'static str;

    /// Builds a fresh handler from `scope` and runs it against `command`.
    async fn handle_erased(
        &self,
        command: &(dyn Any + Send + Sync),
        scope: &ExecutionScope,
    ) -> anyhow::Result<()>;
}

/// Wraps a factory producing concrete `CommandHandler<C>` values.
pub(crate) struct ScopedHandler<C, H, F> {
    factory: F,
    _phantom: PhantomData<fn() -> (C, H)>,
}

impl<C, H, F> ScopedHandler<C, H, F> {
    pub(crate) fn new(factory: F) -> Self {
        Self {
            factory,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<C, H, F> ErasedCommandHandler for ScopedHandler<C, H, F>
where
    C: Command,
    H: CommandHandler<C>,
    F: Fn(&ExecutionScope) -> H + Send + Sync + 'static,
{
    fn handler_name(&self) -> &'static str {
        H::name()
    }

    async fn handle_erased(
        &self,
        command: &(dyn Any + Send + Sync),
        scope: &ExecutionScope,
    ) -> anyhow::Result<()> {
        let command = command.downcast_ref::<C>().ok_or_else(|| {
            anyhow!(
                "command type mismatch: handler expects {}",
                std::any::type_name::<C>()
            )
        })?;

        let handler = (self.factory)(scope);
        handler.handle(command, scope.cancellation()).await
    }
}
