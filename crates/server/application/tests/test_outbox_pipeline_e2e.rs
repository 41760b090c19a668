//! Test E2E del outbox transaccional
//! write_event → dispatcher → deliveries → scheduler → handlers

use async_trait::async_trait;
use courier_application::{
    DeliveryProcessor, DeliverySweeper, DispatchJobHandler, Orchestrator, OutboxDispatcher,
    OutboxWriter,
};
use courier_domain::{
    CorrelationId, DomainEvent, EventHandler, EventHandlerRegistry, HandlerRegistry,
    OutboxDelivery, OutboxStore,
};
use courier_infrastructure::{InMemoryEnvelopeStore, InMemoryOutboxStore, TokioScheduler};
use courier_shared::config::{OrchestratorConfig, OutboxRelayConfig, SchedulerConfig, SweeperConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize, Deserialize)]
struct AccountOpened {
    account: String,
    correlation: CorrelationId,
}

impl DomainEvent for AccountOpened {
    fn correlation_id(&self) -> Option<CorrelationId> {
        Some(self.correlation)
    }
}

#[derive(Clone)]
struct WelcomeEmail {
    sent: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl EventHandler<AccountOpened> for WelcomeEmail {
    fn name() -> &'static str {
        "welcome-email"
    }

    async fn handle(&self, event: &AccountOpened, _cancel: &CancellationToken) -> anyhow::Result<()> {
        let _ = self.sent.send(event.account.clone());
        Ok(())
    }
}

/// Always fails; its sibling delivery must still succeed.
#[derive(Clone)]
struct CrmSync {
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl EventHandler<AccountOpened> for CrmSync {
    fn name() -> &'static str {
        "crm-sync"
    }

    async fn handle(&self, _event: &AccountOpened, _cancel: &CancellationToken) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("crm rate limited")
    }
}

struct Pipeline {
    outbox: InMemoryOutboxStore,
    writer: OutboxWriter,
    dispatcher: OutboxDispatcher,
    sweeper: DeliverySweeper,
    scheduler: TokioScheduler,
    sent: mpsc::UnboundedReceiver<String>,
    crm_calls: Arc<AtomicU32>,
}

fn pipeline() -> Pipeline {
    let outbox = InMemoryOutboxStore::new();
    let (sent_tx, sent) = mpsc::unbounded_channel();
    let crm_calls = Arc::new(AtomicU32::new(0));

    let mut events = EventHandlerRegistry::new();
    events
        .subscribe::<AccountOpened, _>(WelcomeEmail { sent: sent_tx })
        .subscribe::<AccountOpened, _>(CrmSync {
            calls: Arc::clone(&crm_calls),
        });
    let events = Arc::new(events);

    let orchestrator = Orchestrator::new(
        Arc::new(InMemoryEnvelopeStore::new()),
        Arc::new(HandlerRegistry::new()),
        OrchestratorConfig::default(),
    );
    let deliveries = DeliveryProcessor::new(
        Arc::new(outbox.clone()),
        Arc::clone(&events),
        OrchestratorConfig::default(),
    );
    let router = DispatchJobHandler::new(Arc::new(orchestrator), Arc::new(deliveries));
    let scheduler = TokioScheduler::start(Arc::new(router), &SchedulerConfig::default());

    Pipeline {
        writer: OutboxWriter::new(Arc::new(outbox.clone())),
        dispatcher: OutboxDispatcher::new(
            Arc::new(outbox.clone()),
            events,
            Arc::new(scheduler.clone()),
            OutboxRelayConfig::default(),
        ),
        sweeper: DeliverySweeper::new(
            Arc::new(outbox.clone()),
            Arc::new(scheduler.clone()),
            SweeperConfig::default(),
        ),
        outbox,
        scheduler,
        sent,
        crm_calls,
    }
}

async fn delivery_named(outbox: &InMemoryOutboxStore, name: &str) -> OutboxDelivery {
    outbox
        .deliveries()
        .into_iter()
        .find(|d| d.handler_name == name)
        .unwrap()
}

async fn wait_until<F>(outbox: &InMemoryOutboxStore, name: &str, done: F) -> OutboxDelivery
where
    F: Fn(&OutboxDelivery) -> bool,
{
    for _ in 0..100 {
        let delivery = delivery_named(outbox, name).await;
        if done(&delivery) {
            return delivery;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("delivery for {name} never reached the expected state");
}

#[tokio::test]
async fn test_event_reaches_every_subscriber_independently() {
    let mut p = pipeline();
    let correlation = CorrelationId::new();

    p.writer
        .publish(&AccountOpened {
            account: "acc-1".into(),
            correlation,
        })
        .await
        .unwrap();
    let report = p.dispatcher.dispatch_pending().await.unwrap();
    assert_eq!(report.deliveries, 2);

    let account = tokio::time::timeout(Duration::from_secs(5), p.sent.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account, "acc-1");

    let welcome = wait_until(&p.outbox, "welcome-email", |d| d.is_succeeded()).await;
    assert!(welcome.last_error.is_none());

    let crm = wait_until(&p.outbox, "crm-sync", |d| d.attempts == 1).await;
    assert!(!crm.is_succeeded());
    assert!(crm.last_error.unwrap().contains("crm rate limited"));
    assert!(crm.next_attempt_at.is_some());

    let stats = p.outbox.stats().await.unwrap();
    assert_eq!(stats.processed_messages, 1);
    assert_eq!(stats.succeeded_deliveries, 1);
    assert_eq!(stats.pending_deliveries, 1);
    p.scheduler.shutdown();
}

#[tokio::test]
async fn test_duplicate_event_is_delivered_once() {
    let mut p = pipeline();
    let event = AccountOpened {
        account: "acc-2".into(),
        correlation: CorrelationId::new(),
    };

    p.writer.publish(&event).await.unwrap();
    p.writer.publish(&event).await.unwrap();
    p.dispatcher.dispatch_pending().await.unwrap();

    assert_eq!(p.sent.recv().await.unwrap(), "acc-2");
    wait_until(&p.outbox, "welcome-email", |d| d.is_succeeded()).await;
    assert_eq!(p.outbox.messages().len(), 1);
    assert_eq!(p.outbox.deliveries().len(), 2);
    p.scheduler.shutdown();
}

#[tokio::test]
async fn test_sweeper_retries_failed_delivery_when_due() {
    let p = pipeline();
    p.writer
        .publish(&AccountOpened {
            account: "acc-3".into(),
            correlation: CorrelationId::new(),
        })
        .await
        .unwrap();
    p.dispatcher.dispatch_pending().await.unwrap();
    let crm = wait_until(&p.outbox, "crm-sync", |d| d.attempts == 1).await;
    let due_at = crm.next_attempt_at.unwrap();

    let early = p.sweeper.sweep_once(due_at - chrono::Duration::seconds(1)).await.unwrap();
    assert_eq!(early.scheduled, 0);

    let report = p.sweeper.sweep_once(due_at).await.unwrap();
    assert_eq!(report.scheduled, 1);

    wait_until(&p.outbox, "crm-sync", |d| d.attempts == 2).await;
    assert_eq!(p.crm_calls.load(Ordering::SeqCst), 2);
    p.scheduler.shutdown();
}
