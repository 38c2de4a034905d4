//! Port abstraction for the idempotency response cache.
//!
//! The [`IdempotencyCache`] trait is the key-value store behind the
//! idempotency guard. Adapters must honour the TTL passed on writes and must
//! make the conditional writes ([`IdempotencyCache::set_if_absent`],
//! [`IdempotencyCache::replace_if_unchanged`] and
//! [`IdempotencyCache::remove_if_unchanged`]) atomic: claim mode relies on
//! them to let exactly one concurrent request proceed.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::idempotency::CacheEntry;

use super::define_port_error;

define_port_error! {
    /// Errors raised by idempotency cache adapters.
    pub enum IdempotencyCacheError {
        /// The cache backend was unreachable or rejected the command.
        Backend { message: String } => "idempotency cache backend failed: {message}",
        /// A cache entry could not be encoded or decoded.
        Serialization { message: String } => "idempotency cache serialization failed: {message}",
    }
}

/// Key-value cache with per-entry expiry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyCache: Send + Sync {
    /// Fetch the live entry stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, IdempotencyCacheError>;

    /// Store `entry` under `key` for `ttl`, replacing any existing entry.
    async fn set(
        &self,
        key: &str,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<(), IdempotencyCacheError>;

    /// Store `entry` only when no live entry exists.
    ///
    /// Returns `true` when the entry was written.
    async fn set_if_absent(
        &self,
        key: &str,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<bool, IdempotencyCacheError>;

    /// Replace the live entry under `key` with `entry`, but only while it
    /// still equals `expected`.
    ///
    /// Returns `true` when the entry was written.
    async fn replace_if_unchanged(
        &self,
        key: &str,
        expected: &CacheEntry,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<bool, IdempotencyCacheError>;

    /// Delete the entry under `key`, but only while it still equals
    /// `expected`.
    ///
    /// Returns `true` when an entry was deleted.
    async fn remove_if_unchanged(
        &self,
        key: &str,
        expected: &CacheEntry,
    ) -> Result<bool, IdempotencyCacheError>;

    /// Delete the entry under `key`. Deleting a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<(), IdempotencyCacheError>;
}
