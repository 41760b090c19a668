//! Per-execution dependency scope.
//!
//! Every handler invocation gets its own `ExecutionScope`. Handler factories
//! build their handler from it, and anything resolved through
//! [`ExecutionScope::scoped`] lives exactly as long as that one execution.
//! Process-wide collaborators (store pools, clients) are captured by the
//! factory closure instead and shared on purpose.

use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct ExecutionScope {
    id: Uuid,
    cancellation: CancellationToken,
    instances: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ExecutionScope {
    pub fn new(cancellation: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            cancellation,
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Instance of `T` private to this scope, created on first use.
    pub fn scoped<T: Default + Send + Sync + 'static>(&self) -> Arc<T> {
        self.scoped_with(T::default)
    }

    /// Like [`scoped`](Self::scoped) with an explicit constructor.
    ///
    /// `init` runs without the scope lock held, so it may resolve other
    /// scoped collaborators. If two callers race on the same type the first
    /// stored instance wins and the other one is dropped.
    pub fn scoped_with<T, F>(&self, init: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.lookup::<T>() {
            return existing;
        }

        let built: Arc<T> = Arc::new(init());
        let stored = Arc::clone(
            self.instances
                .lock()
                .entry(TypeId::of::<T>())
                .or_insert_with(|| built.clone()),
        );
        stored.downcast::<T>().unwrap_or(built)
    }

    fn lookup<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let instances = self.instances.lock();
        let existing = Arc::clone(instances.get(&TypeId::of::<T>())?);
        existing.downcast::<T>().ok()
    }
}

impl std::fmt::Debug for ExecutionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionScope")
            .field("id", &self.id)
            .field("instances", &self.instances.lock().len())
            .finish()
    }
}
