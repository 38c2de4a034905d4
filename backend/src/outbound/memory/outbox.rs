//! Mutex-guarded outbox store and unit of work.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::outbox::{OutboxMessage, OutboxMessageId, RelayLease, RetryFailure};
use crate::domain::ports::{OutboxStore, OutboxStoreError, UnitOfWork, UnitOfWorkFactory};

type StagedWrite = Box<dyn FnOnce() + Send>;

/// Outbox store holding messages in memory.
///
/// Clones share the same messages, so one handle can serve as the relay's
/// store while another opens units of work.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOutboxStore {
    messages: Arc<Mutex<Vec<OutboxMessage>>>,
}

impl InMemoryOutboxStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored message in insertion order.
    pub fn snapshot(&self) -> Vec<OutboxMessage> {
        self.lock().clone()
    }

    /// Copy of the message with `id`.
    pub fn get(&self, id: OutboxMessageId) -> Option<OutboxMessage> {
        self.lock().iter().find(|message| message.id == id).cloned()
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OutboxMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_message<T>(
        &self,
        id: OutboxMessageId,
        update: impl FnOnce(&mut OutboxMessage) -> T,
    ) -> Result<T, OutboxStoreError> {
        let mut messages = self.lock();
        let message = messages
            .iter_mut()
            .find(|message| message.id == id)
            .ok_or_else(|| OutboxStoreError::not_found(id.to_string()))?;
        Ok(update(message))
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn fetch_unprocessed(
        &self,
        limit: usize,
        max_retries: u32,
        lease: &RelayLease,
    ) -> Result<Vec<OutboxMessage>, OutboxStoreError> {
        let mut messages = self.lock();
        let mut due: Vec<&mut OutboxMessage> = messages
            .iter_mut()
            .filter(|message| message.is_claimable(lease, max_retries))
            .collect();
        due.sort_by_key(|message| message.created_at);

        let claimed: Vec<OutboxMessage> = due
            .into_iter()
            .take(limit)
            .map(|message| {
                message.apply_lease(lease);
                message.clone()
            })
            .collect();
        debug!(owner = %lease.owner, claimed = claimed.len(), "claimed outbox messages");
        Ok(claimed)
    }

    async fn mark_processed(
        &self,
        id: OutboxMessageId,
        processed_at: DateTime<Utc>,
    ) -> Result<(), OutboxStoreError> {
        let updated = self.with_message(id, |message| message.record_success(processed_at))?;
        if !updated {
            debug!(%id, "outbox message already processed");
        }
        Ok(())
    }

    async fn increment_retry(
        &self,
        id: OutboxMessageId,
        failure: &RetryFailure,
    ) -> Result<u32, OutboxStoreError> {
        self.with_message(id, |message| message.record_failure(failure))
    }

    async fn fetch_failed(
        &self,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, OutboxStoreError> {
        let mut failed: Vec<OutboxMessage> = self
            .lock()
            .iter()
            .filter(|message| message.is_dead_letter(max_retries))
            .cloned()
            .collect();
        failed.sort_by_key(|message| message.created_at);
        failed.truncate(limit);
        Ok(failed)
    }
}

#[async_trait]
impl UnitOfWorkFactory for InMemoryOutboxStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, OutboxStoreError> {
        Ok(Box::new(InMemoryUnitOfWork::new(self.clone())))
    }
}

/// Unit of work over an [`InMemoryOutboxStore`].
///
/// Appended messages and staged business writes are applied together on
/// commit; nothing happens on rollback or drop.
pub struct InMemoryUnitOfWork {
    store: InMemoryOutboxStore,
    appended: Vec<OutboxMessage>,
    staged: Vec<StagedWrite>,
}

impl InMemoryUnitOfWork {
    /// Open a unit of work on `store`.
    pub fn new(store: InMemoryOutboxStore) -> Self {
        Self {
            store,
            appended: Vec::new(),
            staged: Vec::new(),
        }
    }

    /// Stage a business write to run when the unit commits.
    pub fn stage<F>(&mut self, write: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.staged.push(Box::new(write));
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn append(&mut self, message: &OutboxMessage) -> Result<(), OutboxStoreError> {
        if self.appended.iter().any(|staged| staged.id == message.id) {
            return Err(OutboxStoreError::query(format!(
                "outbox message {} appended twice",
                message.id
            )));
        }
        self.appended.push(message.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), OutboxStoreError> {
        let Self {
            store,
            appended,
            staged,
        } = *self;
        let mut messages = store.lock();
        if let Some(existing) = appended
            .iter()
            .find(|message| messages.iter().any(|stored| stored.id == message.id))
        {
            return Err(OutboxStoreError::query(format!(
                "duplicate outbox message id {}",
                existing.id
            )));
        }
        let count = appended.len();
        messages.extend(appended);
        drop(messages);
        for write in staged {
            write();
        }
        debug!(appended = count, "in-memory unit of work committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), OutboxStoreError> {
        debug!(
            discarded = self.appended.len(),
            "in-memory unit of work rolled back"
        );
        Ok(())
    }
}
