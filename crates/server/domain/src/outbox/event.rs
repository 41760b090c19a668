//! Domain events and their handlers.
//!
//! Unlike commands, every event handler gets its own delivery record, so a
//! handler is addressed by `(event type, handler name)` and decodes the
//! payload itself.

use crate::command::{EventTypeDescriptor, ExecutionScope};
use anyhow::Context;
use async_trait::async_trait;
use courier_shared::CorrelationId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub trait DomainEvent: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {
    /// Deduplication handle for the outbox; `None` disables deduplication.
    fn correlation_id(&self) -> Option<CorrelationId> {
        None
    }

    /// Persisted identifier of the event type. Same caveat as
    /// `Command::command_type`: override it with a literal for events that
    /// outlive a compiler upgrade.
    fn event_type() -> EventTypeDescriptor
    where
        Self: Sized,
    {
        EventTypeDescriptor::of::<Self>()
    }
}

#[async_trait]
pub trait EventHandler<E: DomainEvent>: Send + Sync + 'static {
    /// Name persisted on each delivery; must be unique per event type.
    fn name() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }

    async fn handle(&self, event: &E, cancel: &CancellationToken) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ErasedEventHandler: Send + Sync {
    fn handler_name(&self) -> &'static str;

    /// Decodes `payload` and runs a handler built from `scope`.
    async fn handle_payload(&self, payload: &str, scope: &ExecutionScope) -> anyhow::Result<()>;
}

struct ScopedEventHandler<E, H, F> {
    factory: F,
    _phantom: PhantomData<fn() -> (E, H)>,
}

#[async_trait]
impl<E, H, F> ErasedEventHandler for ScopedEventHandler<E, H, F>
where
    E: DomainEvent,
    H: EventHandler<E>,
    F: Fn(&ExecutionScope) -> H + Send + Sync + 'static,
{
    fn handler_name(&self) -> &'static str {
        H::name()
    }

    async fn handle_payload(&self, payload: &str, scope: &ExecutionScope) -> anyhow::Result<()> {
        let event: E = serde_json::from_str(payload)
            .with_context(|| format!("decoding {}", std::any::type_name::<E>()))?;
        let handler = (self.factory)(scope);
        handler.handle(&event, scope.cancellation()).await
    }
}

/// Subscriptions per event type, in registration order.
#[derive(Default)]
pub struct EventHandlerRegistry {
    handlers: HashMap<EventTypeDescriptor, Vec<Arc<dyn ErasedEventHandler>>>,
}

impl EventHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<E, H>(&mut self, handler: H) -> &mut Self
    where
        E: DomainEvent,
        H: EventHandler<E> + Clone,
    {
        self.subscribe_scoped::<E, H, _>(move |_scope: &ExecutionScope| handler.clone())
    }

    /// Registers a handler factory. A second registration under the same
    /// handler name replaces the first one.
    pub fn subscribe_scoped<E, H, F>(&mut self, factory: F) -> &mut Self
    where
        E: DomainEvent,
        H: EventHandler<E>,
        F: Fn(&ExecutionScope) -> H + Send + Sync + 'static,
    {
        let handler: Arc<dyn ErasedEventHandler> = Arc::new(ScopedEventHandler::<E, H, F> {
            factory,
            _phantom: PhantomData,
        });
        let entries = self.handlers.entry(E::event_type()).or_default();
        if let Some(existing) = entries
            .iter_mut()
            .find(|existing| existing.handler_name() == handler.handler_name())
        {
            tracing::warn!(
                event_type = %E::event_type(),
                handler = handler.handler_name(),
                "Replacing event handler registered under the same name"
            );
            *existing = handler;
        } else {
            entries.push(handler);
        }
        self
    }

    /// Names of the handlers subscribed to `event_type`.
    pub fn handler_names(&self, event_type: &EventTypeDescriptor) -> Vec<&'static str> {
        self.handlers
            .get(event_type)
            .map(|entries| entries.iter().map(|h| h.handler_name()).collect())
            .unwrap_or_default()
    }

    pub fn find(
        &self,
        event_type: &EventTypeDescriptor,
        handler_name: &str,
    ) -> Option<Arc<dyn ErasedEventHandler>> {
        self.handlers
            .get(event_type)?
            .iter()
            .find(|h| h.handler_name() == handler_name)
            .cloned()
    }
}

impl std::fmt::Debug for EventHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (event_type, entries) in &self.handlers {
            let names: Vec<_> = entries.iter().map(|h| h.handler_name()).collect();
            map.entry(&event_type.identifier(), &names);
        }
        map.finish()
    }
}
