//! Server Startup Module
//!
//! Builds the stores, registries and scheduler, then spawns the three relay
//! loops (retry sweep, outbox dispatch, delivery sweep).

pub mod shutdown;

use crate::demo;
use courier_application::{
    CommandDispatcher, DeliveryProcessor, DeliverySweeper, DispatchJobHandler, Orchestrator,
    OutboxDispatcher, OutboxWriter, RetrySweeper,
};
use courier_domain::{BackgroundScheduler, EventHandlerRegistry, HandlerRegistry};
use courier_infrastructure::{
    InMemoryEnvelopeStore, InMemoryOutboxStore, RecordingScheduler, TokioScheduler,
};
use courier_shared::config::{DispatchConfig, SchedulerMode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use shutdown::{SHUTDOWN_TIMEOUT, wait_for_signal};

/// Everything a running server owns
pub struct Runtime {
    pub dispatcher: Arc<CommandDispatcher>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    scheduler: Option<TokioScheduler>,
}

impl Runtime {
    /// Stops the relay loops, then the scheduler workers.
    pub async fn shutdown(self, limit: Duration) -> bool {
        let clean = shutdown::drain(&self.shutdown_tx, self.tasks, limit).await;
        if let Some(scheduler) = self.scheduler {
            scheduler.shutdown();
        }
        clean
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("tasks", &self.tasks.len())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

/// Wire every component and start the background loops.
pub fn start(config: DispatchConfig) -> Runtime {
    info!("Starting courier dispatch server");

    let envelopes = InMemoryEnvelopeStore::new();
    let outbox = InMemoryOutboxStore::new();
    let writer = Arc::new(OutboxWriter::new(Arc::new(outbox.clone())));

    let mut commands = HandlerRegistry::new();
    let mut events = EventHandlerRegistry::new();
    demo::register(&mut commands, &mut events, writer);
    let commands = Arc::new(commands);
    let events = Arc::new(events);

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(envelopes.clone()),
        Arc::clone(&commands),
        config.orchestrator.clone(),
    ));
    let deliveries = Arc::new(DeliveryProcessor::new(
        Arc::new(outbox.clone()),
        Arc::clone(&events),
        config.orchestrator.clone(),
    ));

    let (scheduler, workers): (Arc<dyn BackgroundScheduler>, Option<TokioScheduler>) =
        match config.scheduler.mode {
            SchedulerMode::Tokio => {
                let router = Arc::new(DispatchJobHandler::new(orchestrator, deliveries));
                let scheduler = TokioScheduler::start(router, &config.scheduler);
                info!(queue_depth = config.scheduler.queue_depth, "  ✓ Tokio scheduler started");
                (Arc::new(scheduler.clone()), Some(scheduler))
            }
            SchedulerMode::Noop => {
                warn!("  ⚠ Noop scheduler: jobs are recorded but never executed");
                (Arc::new(RecordingScheduler::new()), None)
            }
        };

    let dispatcher = Arc::new(CommandDispatcher::new(
        Arc::new(envelopes.clone()),
        Arc::clone(&scheduler),
        commands,
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut tasks = Vec::new();

    let retry_sweeper = RetrySweeper::new(
        Arc::new(envelopes),
        Arc::clone(&scheduler),
        config.sweeper.clone(),
    );
    let rx = shutdown_tx.subscribe();
    tasks.push((
        "retry-sweeper",
        tokio::spawn(async move { retry_sweeper.run(rx).await }),
    ));

    let outbox_dispatcher = OutboxDispatcher::new(
        Arc::new(outbox.clone()),
        events,
        Arc::clone(&scheduler),
        config.outbox.clone(),
    );
    let rx = shutdown_tx.subscribe();
    tasks.push((
        "outbox-dispatcher",
        tokio::spawn(async move { outbox_dispatcher.run(rx).await }),
    ));

    let delivery_sweeper = DeliverySweeper::new(Arc::new(outbox), scheduler, config.sweeper);
    let rx = shutdown_tx.subscribe();
    tasks.push((
        "delivery-sweeper",
        tokio::spawn(async move { delivery_sweeper.run(rx).await }),
    ));

    info!("  ✓ {} background loops running", tasks.len());

    Runtime {
        dispatcher,
        shutdown_tx,
        tasks,
        scheduler: workers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::Ping;
    use courier_application::EnqueueOutcome;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let runtime = start(DispatchConfig::default());

        let outcome = runtime.dispatcher.enqueue(&Ping::new("hola")).await.unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Enqueued(_)));

        assert!(runtime.shutdown(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_noop_mode_records_jobs() {
        let mut config = DispatchConfig::default();
        config.scheduler.mode = SchedulerMode::Noop;
        let runtime = start(config);

        let outcome = runtime.dispatcher.enqueue(&Ping::new("silencio")).await.unwrap();
        assert!(outcome.envelope_id().is_some());

        assert!(runtime.shutdown(Duration::from_secs(5)).await);
    }
}
