//! In-memory envelope store.
//!
//! Writes are staged per transaction and applied atomically on commit, after
//! re-validating the idempotency-key constraint and the append-only execution
//! log against whatever other transactions committed in the meantime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_domain::{
    AddOrGetExisting, CommandEnvelope, CorrelationId, EnvelopeId, EnvelopeStats, EnvelopeStatus,
    EnvelopeStore, EnvelopeTransaction, IdempotencyKey, RepositoryError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct EnvelopeTables {
    envelopes: HashMap<EnvelopeId, CommandEnvelope>,
    by_key: HashMap<IdempotencyKey, EnvelopeId>,
}

#[derive(Clone, Default)]
pub struct InMemoryEnvelopeStore {
    tables: Arc<Mutex<EnvelopeTables>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryEnvelopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with `RepositoryError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Committed envelopes, oldest first.
    pub fn snapshot(&self) -> Vec<CommandEnvelope> {
        let tables = self.tables.lock();
        let mut envelopes: Vec<_> = tables.envelopes.values().cloned().collect();
        envelopes.sort_by_key(|e| e.created_at());
        envelopes
    }

    pub fn len(&self) -> usize {
        self.tables.lock().envelopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        check_available(&self.unavailable)
    }
}

fn check_available(flag: &AtomicBool) -> Result<(), RepositoryError> {
    if flag.load(Ordering::SeqCst) {
        Err(RepositoryError::unavailable("in-memory envelope store is offline"))
    } else {
        Ok(())
    }
}

/// The new version must carry every stored entry unchanged, in order.
fn ensure_log_extends(stored: &CommandEnvelope, next: &CommandEnvelope) -> Result<(), RepositoryError> {
    let stored_log = stored.execution_logs();
    let next_log = next.execution_logs();
    if next_log.len() < stored_log.len() || next_log[..stored_log.len()] != *stored_log {
        return Err(RepositoryError::AuditTrailRewritten {
            envelope_id: stored.id(),
        });
    }
    Ok(())
}

#[async_trait]
impl EnvelopeStore for InMemoryEnvelopeStore {
    async fn begin(&self) -> Result<Box<dyn EnvelopeTransaction>, RepositoryError> {
        self.check_available()?;
        Ok(Box::new(InMemoryEnvelopeTransaction {
            tables: Arc::clone(&self.tables),
            unavailable: Arc::clone(&self.unavailable),
            staged: Vec::new(),
        }))
    }

    async fn find_by_id(&self, id: &EnvelopeId) -> Result<Option<CommandEnvelope>, RepositoryError> {
        self.check_available()?;
        Ok(self.tables.lock().envelopes.get(id).cloned())
    }

    async fn find_by_correlation_id(
        &self,
        correlation_id: &CorrelationId,
    ) -> Result<Option<CommandEnvelope>, RepositoryError> {
        self.check_available()?;
        let Ok(key) = IdempotencyKey::derive(correlation_id) else {
            return Ok(None);
        };
        let tables = self.tables.lock();
        Ok(tables
            .by_key
            .get(&key)
            .and_then(|id| tables.envelopes.get(id))
            .cloned())
    }

    async fn get_pending_retries(
        &self,
        due_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CommandEnvelope>, RepositoryError> {
        self.check_available()?;
        let tables = self.tables.lock();
        let mut due: Vec<_> = tables
            .envelopes
            .values()
            .filter(|e| e.is_due(due_before))
            .cloned()
            .collect();
        due.sort_by_key(|e| e.next_attempt_at());
        due.truncate(limit);
        Ok(due)
    }

    async fn get_stale_in_flight(
        &self,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CommandEnvelope>, RepositoryError> {
        self.check_available()?;
        let tables = self.tables.lock();
        let mut stale: Vec<_> = tables
            .envelopes
            .values()
            .filter(|e| {
                matches!(e.status(), EnvelopeStatus::Pending | EnvelopeStatus::Processing)
                    && e.last_activity_at() < older_than
            })
            .cloned()
            .collect();
        stale.sort_by_key(|e| e.last_activity_at());
        stale.truncate(limit);
        Ok(stale)
    }

    async fn stats(&self) -> Result<EnvelopeStats, RepositoryError> {
        self.check_available()?;
        let tables = self.tables.lock();
        let mut stats = EnvelopeStats::default();
        for envelope in tables.envelopes.values() {
            stats.record(envelope.status());
        }
        Ok(stats)
    }
}

enum StagedWrite {
    Insert(CommandEnvelope),
    Update(CommandEnvelope),
}

impl StagedWrite {
    fn envelope(&self) -> &CommandEnvelope {
        match self {
            StagedWrite::Insert(e) | StagedWrite::Update(e) => e,
        }
    }
}

pub struct InMemoryEnvelopeTransaction {
    tables: Arc<Mutex<EnvelopeTables>>,
    unavailable: Arc<AtomicBool>,
    staged: Vec<StagedWrite>,
}

impl InMemoryEnvelopeTransaction {
    fn staged_with_key(&self, key: &IdempotencyKey) -> Option<&CommandEnvelope> {
        self.staged.iter().find_map(|write| match write {
            StagedWrite::Insert(e) if e.idempotency_key() == key => Some(e),
            _ => None,
        })
    }

    /// Latest version visible to this transaction.
    fn current(&self, id: &EnvelopeId) -> Option<CommandEnvelope> {
        self.staged
            .iter()
            .rev()
            .map(StagedWrite::envelope)
            .find(|e| e.id() == *id)
            .cloned()
            .or_else(|| self.tables.lock().envelopes.get(id).cloned())
    }
}

#[async_trait]
impl EnvelopeTransaction for InMemoryEnvelopeTransaction {
    async fn add(&mut self, envelope: CommandEnvelope) -> Result<(), RepositoryError> {
        check_available(&self.unavailable)?;
        match self.add_or_get_existing(envelope).await? {
            AddOrGetExisting::Added(_) => Ok(()),
            AddOrGetExisting::Existing(existing) => Err(RepositoryError::Conflict {
                constraint: "idempotency_key",
                value: existing.idempotency_key().to_string(),
            }),
        }
    }

    async fn add_or_get_existing(
        &mut self,
        envelope: CommandEnvelope,
    ) -> Result<AddOrGetExisting, RepositoryError> {
        check_available(&self.unavailable)?;
        let key = envelope.idempotency_key().clone();

        if let Some(existing) = self.staged_with_key(&key) {
            return Ok(AddOrGetExisting::Existing(existing.clone()));
        }
        {
            let tables = self.tables.lock();
            if let Some(existing) = tables.by_key.get(&key).and_then(|id| tables.envelopes.get(id)) {
                return Ok(AddOrGetExisting::Existing(existing.clone()));
            }
        }

        self.staged.push(StagedWrite::Insert(envelope.clone()));
        Ok(AddOrGetExisting::Added(envelope))
    }

    async fn update(&mut self, envelope: &CommandEnvelope) -> Result<(), RepositoryError> {
        check_available(&self.unavailable)?;
        let current = self
            .current(&envelope.id())
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "envelope",
                id: envelope.id().to_string(),
            })?;
        ensure_log_extends(&current, envelope)?;
        self.staged.push(StagedWrite::Update(envelope.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let InMemoryEnvelopeTransaction {
            tables,
            unavailable,
            staged,
        } = *self;
        check_available(&unavailable)?;
        let mut tables = tables.lock();

        // Validate everything before touching the tables.
        let mut inserted: HashMap<EnvelopeId, &CommandEnvelope> = HashMap::new();
        for write in &staged {
            match write {
                StagedWrite::Insert(envelope) => {
                    if tables.by_key.contains_key(envelope.idempotency_key()) {
                        return Err(RepositoryError::Conflict {
                            constraint: "idempotency_key",
                            value: envelope.idempotency_key().to_string(),
                        });
                    }
                    inserted.insert(envelope.id(), envelope);
                }
                StagedWrite::Update(envelope) => {
                    let stored = inserted
                        .get(&envelope.id())
                        .copied()
                        .or_else(|| tables.envelopes.get(&envelope.id()))
                        .ok_or_else(|| RepositoryError::NotFound {
                            entity: "envelope",
                            id: envelope.id().to_string(),
                        })?;
                    ensure_log_extends(stored, envelope)?;
                    inserted.insert(envelope.id(), envelope);
                }
            }
        }

        for write in staged {
            let envelope = match write {
                StagedWrite::Insert(envelope) => {
                    tables
                        .by_key
                        .insert(envelope.idempotency_key().clone(), envelope.id());
                    envelope
                }
                StagedWrite::Update(envelope) => envelope,
            };
            tables.envelopes.insert(envelope.id(), envelope);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        Ok(())
    }
}
