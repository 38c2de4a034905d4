//! Clock-aware in-memory idempotency cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use mockable::{Clock, DefaultClock};

use crate::domain::idempotency::CacheEntry;
use crate::domain::ports::{IdempotencyCache, IdempotencyCacheError};

struct Slot {
    entry: CacheEntry,
    expires_at: DateTime<Utc>,
}

/// [`IdempotencyCache`] over a `HashMap`, expiring entries by the injected
/// clock.
pub struct InMemoryIdempotencyCache {
    entries: Mutex<HashMap<String, Slot>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryIdempotencyCache {
    /// Create an empty cache reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.utc();
        self.lock()
            .values()
            .filter(|slot| slot.expires_at > now)
            .count()
    }

    #[cfg(test)]
    pub(crate) fn stored_slots(&self) -> usize {
        self.lock().len()
    }

    /// Whether there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the map with expired slots already evicted, so keys that are
    /// written once and never read again do not accumulate.
    fn lock_swept(&self, now: DateTime<Utc>) -> MutexGuard<'_, HashMap<String, Slot>> {
        let mut entries = self.lock();
        entries.retain(|_, slot| slot.expires_at > now);
        entries
    }

    fn slot(&self, entry: &CacheEntry, ttl: Duration) -> Slot {
        let now = self.clock.utc();
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Slot {
            entry: entry.clone(),
            expires_at,
        }
    }
}

impl Default for InMemoryIdempotencyCache {
    fn default() -> Self {
        Self::new(Arc::new(DefaultClock))
    }
}

#[async_trait]
impl IdempotencyCache for InMemoryIdempotencyCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, IdempotencyCacheError> {
        let now = self.clock.utc();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(slot) if slot.expires_at > now => Ok(Some(slot.entry.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<(), IdempotencyCacheError> {
        let slot = self.slot(entry, ttl);
        self.lock_swept(self.clock.utc()).insert(key.to_owned(), slot);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<bool, IdempotencyCacheError> {
        let now = self.clock.utc();
        let slot = self.slot(entry, ttl);
        let mut entries = self.lock_swept(now);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_owned(), slot);
        Ok(true)
    }

    async fn replace_if_unchanged(
        &self,
        key: &str,
        expected: &CacheEntry,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<bool, IdempotencyCacheError> {
        let now = self.clock.utc();
        let slot = self.slot(entry, ttl);
        let mut entries = self.lock_swept(now);
        if entries.get(key).is_none_or(|existing| existing.entry != *expected) {
            return Ok(false);
        }
        entries.insert(key.to_owned(), slot);
        Ok(true)
    }

    async fn remove_if_unchanged(
        &self,
        key: &str,
        expected: &CacheEntry,
    ) -> Result<bool, IdempotencyCacheError> {
        let now = self.clock.utc();
        let mut entries = self.lock_swept(now);
        if entries.get(key).is_none_or(|existing| existing.entry != *expected) {
            return Ok(false);
        }
        entries.remove(key);
        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<(), IdempotencyCacheError> {
        self.lock().remove(key);
        Ok(())
    }
}
