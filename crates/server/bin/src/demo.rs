//! Demo command and event wired by the server so a fresh process has
//! something to dispatch. `Ping` runs one command handler, which publishes
//! `Ponged` through the outbox; `LogPong` consumes it.

use async_trait::async_trait;
use courier_application::OutboxWriter;
use courier_domain::{
    Command, CommandHandler, CorrelationId, DomainEvent, EventHandler, EventHandlerRegistry,
    HandlerRegistry,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    pub message: String,
    pub correlation: CorrelationId,
}

impl Ping {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            correlation: CorrelationId::new(),
        }
    }
}

impl Command for Ping {
    fn correlation_id(&self) -> Option<CorrelationId> {
        Some(self.correlation)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ponged {
    pub message: String,
    pub correlation: CorrelationId,
}

impl DomainEvent for Ponged {
    fn correlation_id(&self) -> Option<CorrelationId> {
        Some(self.correlation)
    }
}

#[derive(Clone)]
pub struct PingHandler {
    outbox: Arc<OutboxWriter>,
}

#[async_trait]
impl CommandHandler<Ping> for PingHandler {
    fn name() -> &'static str {
        "ping"
    }

    async fn handle(&self, command: &Ping, _cancel: &CancellationToken) -> anyhow::Result<()> {
        tracing::info!(message = %command.message, "Ping received");
        self.outbox
            .publish(&Ponged {
                message: command.message.clone(),
                correlation: command.correlation,
            })
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct LogPong;

#[async_trait]
impl EventHandler<Ponged> for LogPong {
    fn name() -> &'static str {
        "log-pong"
    }

    async fn handle(&self, event: &Ponged, _cancel: &CancellationToken) -> anyhow::Result<()> {
        tracing::info!(message = %event.message, correlation_id = %event.correlation, "Pong delivered");
        Ok(())
    }
}

/// Registers the demo handlers.
pub fn register(
    commands: &mut HandlerRegistry,
    events: &mut EventHandlerRegistry,
    outbox: Arc<OutboxWriter>,
) {
    commands.register::<Ping, _>(PingHandler { outbox });
    events.subscribe::<Ponged, _>(LogPong);
}
