//! Per-dispatch execution scope.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;
use uuid::Uuid;

use super::RequestType;

type Resource = Arc<dyn Any + Send + Sync>;
type Disposer = Box<dyn FnOnce() + Send>;

/// Isolated context created for a single dispatch.
///
/// Handlers use the scope to share per-call resources (a transaction, a
/// request-local cache) and to register cleanup. Disposers run in reverse
/// registration order exactly once, when the dispatcher disposes the scope
/// or, if the dispatch future is dropped early, when the scope is dropped.
pub struct ExecutionScope {
    id: Uuid,
    request_type: RequestType,
    resources: Mutex<HashMap<TypeId, Resource>>,
    disposers: Mutex<Vec<Disposer>>,
    disposed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ExecutionScope {
    /// Create a scope for one dispatch of `request_type`.
    pub fn new(request_type: RequestType) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_type,
            resources: Mutex::new(HashMap::new()),
            disposers: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Unique scope identifier, also recorded on the dispatch span.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The request type this scope was created for.
    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    /// Fetch the scope's `T`, creating it with `init` on first use.
    ///
    /// `init` runs without the resource lock held, so it may itself use the
    /// scope's resources. If `init` ends up creating a `T` as well, that
    /// first value is kept.
    pub fn resource<T, F>(&self, init: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        if let Some(existing) = self.get::<T>() {
            return existing;
        }
        let created = Arc::new(init());
        let mut resources = lock(&self.resources);
        let slot = resources
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::clone(&created) as Resource);
        Arc::clone(slot).downcast::<T>().unwrap_or(created)
    }

    /// Fetch the scope's `T` if one was created.
    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        lock(&self.resources)
            .get(&TypeId::of::<T>())
            .and_then(|slot| Arc::clone(slot).downcast::<T>().ok())
    }

    /// Register cleanup to run when the scope is disposed.
    ///
    /// Registering on an already disposed scope runs `disposer` immediately.
    pub fn on_dispose<F>(&self, disposer: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_disposed() {
            disposer();
            return;
        }
        lock(&self.disposers).push(Box::new(disposer));
    }

    /// Whether [`Self::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Run disposers (last registered first) and release scope resources.
    ///
    /// Subsequent calls are no-ops.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let disposers = std::mem::take(&mut *lock(&self.disposers));
        let count = disposers.len();
        for disposer in disposers.into_iter().rev() {
            disposer();
        }
        lock(&self.resources).clear();
        debug!(scope_id = %self.id, request_type = self.request_type.name(), disposers = count, "execution scope disposed");
    }
}

impl Drop for ExecutionScope {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ExecutionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionScope")
            .field("id", &self.id)
            .field("request_type", &self.request_type.name())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
