//! Idempotency guard for mutating requests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::domain::Error;
use crate::domain::dispatch::{Dispatcher, Request};
use crate::domain::ports::{IdempotencyCache, IdempotencyCacheError};

use super::{
    CacheEntry, ClaimMode, GuardedResponse, IdempotencyConfig, IdempotencyKey,
    IdempotencyKeyValidationError, IdempotencyRecord, PayloadHash, PayloadHashError,
    ResponseStatus, canonicalize_and_hash,
};

/// Failures surfaced by [`IdempotencyGuard::execute`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IdempotencyError {
    /// The key was missing or malformed. The operation did not run.
    #[error("bad idempotency key: {0}")]
    BadIdempotencyKey(#[from] IdempotencyKeyValidationError),
    /// The operation failed. Nothing was cached.
    #[error(transparent)]
    Operation(Error),
    /// Another request holds the key and did not finish in time.
    #[error("request with idempotency key {key} is still in progress")]
    InProgress {
        /// The contested key.
        key: String,
    },
    /// The cache could not be read, or a claim could not be taken.
    #[error(transparent)]
    Cache(#[from] IdempotencyCacheError),
    /// The request payload could not be fingerprinted.
    #[error(transparent)]
    Payload(#[from] PayloadHashError),
}

impl IdempotencyError {
    /// Convert into the domain error inbound adapters render.
    pub fn into_domain_error(self) -> Error {
        match self {
            Self::BadIdempotencyKey(err) => Error::invalid_request(err.to_string())
                .with_details(json!({ "header": "Idempotency-Key" })),
            Self::Operation(err) => err,
            Self::InProgress { key } => {
                Error::conflict("request with this idempotency key is still in progress")
                    .with_details(json!({ "idempotencyKey": key }))
            }
            Self::Cache(err) => Error::service_unavailable(err.to_string()),
            Self::Payload(err) => Error::invalid_request(err.to_string()),
        }
    }
}

impl From<IdempotencyError> for Error {
    fn from(value: IdempotencyError) -> Self {
        value.into_domain_error()
    }
}

/// A command whose serialised form and response can pass through the guard.
pub trait IdempotentCommand: Request + Serialize {
    /// Status reported for a successful response.
    const SUCCESS_STATUS: ResponseStatus = ResponseStatus::OK;
}

enum Lookup {
    Replay(GuardedResponse),
    Pending,
    Vacant,
    /// An entry that no longer counts: an expired record or a lapsed claim
    /// the cache has not dropped yet.
    Stale(CacheEntry),
}

/// Deduplicates mutating operations by client key.
///
/// On a hit the stored response is returned verbatim without running the
/// operation. On a miss the operation runs and a 2xx response is stored for
/// the configured TTL. See [`ClaimMode`] for the behaviour of concurrent
/// first requests.
pub struct IdempotencyGuard<C: ?Sized> {
    cache: Arc<C>,
    clock: Arc<dyn Clock>,
    config: IdempotencyConfig,
    namespace: String,
}

impl<C> IdempotencyGuard<C>
where
    C: IdempotencyCache + ?Sized,
{
    /// Create a guard storing entries under `namespace:<key>`.
    pub fn new(
        cache: Arc<C>,
        clock: Arc<dyn Clock>,
        config: IdempotencyConfig,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            clock,
            config,
            namespace: namespace.into(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    /// Run `op` at most once per key.
    ///
    /// When the response cannot be cached after `op` succeeded, the failure
    /// is logged and the response is still returned. A retry under the same
    /// key then executes again.
    ///
    /// # Errors
    ///
    /// See [`IdempotencyError`]. Operation failures are returned unmodified
    /// and are never cached.
    pub async fn execute<F, Fut>(
        &self,
        raw_key: Option<&str>,
        payload: &Value,
        op: F,
    ) -> Result<GuardedResponse, IdempotencyError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<GuardedResponse, Error>> + Send,
    {
        let key = IdempotencyKey::from_header(raw_key).inspect_err(|err| {
            debug!(namespace = %self.namespace, error = %err, "rejected idempotency key");
        })?;
        let payload_hash = canonicalize_and_hash(payload)?;
        let cache_key = format!("{}:{}", self.namespace, key.as_uuid());

        match self.config.claim_mode() {
            ClaimMode::CacheOnly => {
                self.execute_cache_only(&key, &cache_key, payload_hash, op)
                    .await
            }
            ClaimMode::ClaimBeforeExecute => {
                self.execute_claimed(&key, &cache_key, payload_hash, op)
                    .await
            }
        }
    }

    /// Dispatch `request` through `dispatcher` under the guard.
    ///
    /// The serialised request is the fingerprinted payload and the
    /// serialised response is the stored body.
    ///
    /// # Errors
    ///
    /// As [`Self::execute`]; dispatch failures become
    /// [`IdempotencyError::Operation`].
    pub async fn dispatch<R>(
        &self,
        dispatcher: &Dispatcher,
        raw_key: Option<&str>,
        request: R,
    ) -> Result<GuardedResponse, IdempotencyError>
    where
        R: IdempotentCommand,
        R::Response: Serialize,
    {
        let payload = serde_json::to_value(&request).map_err(|err| {
            PayloadHashError::Serialization {
                message: err.to_string(),
            }
        })?;
        self.execute(raw_key, &payload, || async move {
            let response = dispatcher.dispatch(request).await?;
            let body = serde_json::to_value(&response).map_err(|err| {
                Error::internal(format!("failed to serialise response: {err}"))
            })?;
            Ok(GuardedResponse::new(R::SUCCESS_STATUS, body))
        })
        .await
    }

    async fn execute_cache_only<F, Fut>(
        &self,
        key: &IdempotencyKey,
        cache_key: &str,
        payload_hash: PayloadHash,
        op: F,
    ) -> Result<GuardedResponse, IdempotencyError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<GuardedResponse, Error>> + Send,
    {
        if let Lookup::Replay(replay) = self.lookup(key, cache_key, &payload_hash).await? {
            return Ok(replay);
        }

        let response = op().await.map_err(IdempotencyError::Operation)?;
        if response.status.is_success() {
            self.store(key, cache_key, payload_hash, &response).await;
        } else {
            debug!(key = %key, status = %response.status, "non-success response not cached");
        }
        Ok(response)
    }

    async fn execute_claimed<F, Fut>(
        &self,
        key: &IdempotencyKey,
        cache_key: &str,
        payload_hash: PayloadHash,
        op: F,
    ) -> Result<GuardedResponse, IdempotencyError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<GuardedResponse, Error>> + Send,
    {
        let stale = match self.lookup(key, cache_key, &payload_hash).await? {
            Lookup::Replay(replay) => return Ok(replay),
            Lookup::Pending => return self.await_winner(key, cache_key, &payload_hash).await,
            Lookup::Vacant => None,
            Lookup::Stale(entry) => Some(entry),
        };

        let claim = CacheEntry::claim(self.clock.utc());
        if !self.try_claim(cache_key, stale.as_ref(), &claim).await? {
            debug!(key = %key, "lost idempotency claim race");
            return self.await_winner(key, cache_key, &payload_hash).await;
        }

        match op().await {
            Ok(response) if response.status.is_success() => {
                if !self.store(key, cache_key, payload_hash, &response).await {
                    self.release(key, cache_key, &claim).await;
                }
                Ok(response)
            }
            Ok(response) => {
                debug!(key = %key, status = %response.status, "non-success response not cached");
                self.release(key, cache_key, &claim).await;
                Ok(response)
            }
            Err(err) => {
                self.release(key, cache_key, &claim).await;
                Err(IdempotencyError::Operation(err))
            }
        }
    }

    /// Take the key for `claim`.
    ///
    /// A stale entry is only displaced while it is still the entry this
    /// request observed; otherwise the key must be free.
    async fn try_claim(
        &self,
        cache_key: &str,
        stale: Option<&CacheEntry>,
        claim: &CacheEntry,
    ) -> Result<bool, IdempotencyError> {
        let ttl = self.config.claim_ttl();
        if let Some(observed) = stale
            && self
                .cache
                .replace_if_unchanged(cache_key, observed, claim, ttl)
                .await?
        {
            return Ok(true);
        }
        Ok(self.cache.set_if_absent(cache_key, claim, ttl).await?)
    }

    async fn await_winner(
        &self,
        key: &IdempotencyKey,
        cache_key: &str,
        payload_hash: &PayloadHash,
    ) -> Result<GuardedResponse, IdempotencyError> {
        for _ in 0..self.config.claim_poll_attempts() {
            tokio::time::sleep(self.config.claim_poll_interval()).await;
            match self.lookup(key, cache_key, payload_hash).await? {
                Lookup::Replay(replay) => return Ok(replay),
                Lookup::Pending => continue,
                Lookup::Vacant | Lookup::Stale(_) => break,
            }
        }
        info!(key = %key, "idempotent request still in progress");
        Err(IdempotencyError::InProgress {
            key: key.to_string(),
        })
    }

    async fn lookup(
        &self,
        key: &IdempotencyKey,
        cache_key: &str,
        payload_hash: &PayloadHash,
    ) -> Result<Lookup, IdempotencyError> {
        let now = self.clock.utc();
        let entry = self.cache.get(cache_key).await.inspect_err(|err| {
            error!(key = %key, error = %err, "idempotency cache read failed");
        })?;

        let lookup = match entry {
            None => Lookup::Vacant,
            Some(CacheEntry::Completed(record)) if !record.is_expired(now) => {
                if record.payload_hash != *payload_hash {
                    warn!(
                        key = %key,
                        stored_hash = %record.payload_hash,
                        request_hash = %payload_hash,
                        "idempotency key reused with a different payload; replaying original response"
                    );
                }
                info!(key = %key, status = %record.status, "replaying idempotent response");
                Lookup::Replay(record.to_replay())
            }
            Some(CacheEntry::Pending { claimed_at, .. })
                if self.config.claim_mode() == ClaimMode::ClaimBeforeExecute
                    && expires_at(claimed_at, self.config.claim_ttl()) > now =>
            {
                Lookup::Pending
            }
            Some(entry) => Lookup::Stale(entry),
        };
        Ok(lookup)
    }

    /// Cache a successful response. Returns whether it was written.
    async fn store(
        &self,
        key: &IdempotencyKey,
        cache_key: &str,
        payload_hash: PayloadHash,
        response: &GuardedResponse,
    ) -> bool {
        let now = self.clock.utc();
        let record = IdempotencyRecord {
            key: key.clone(),
            status: response.status,
            response_payload: response.body.clone(),
            payload_hash,
            created_at: now,
            expires_at: expires_at(now, self.config.ttl()),
        };
        match self
            .cache
            .set(cache_key, &CacheEntry::Completed(record), self.config.ttl())
            .await
        {
            Ok(()) => {
                debug!(key = %key, status = %response.status, "cached idempotent response");
                true
            }
            Err(err) => {
                error!(
                    key = %key,
                    status = %response.status,
                    error = %err,
                    "failed to cache idempotent response after success; a retry will execute again"
                );
                false
            }
        }
    }

    /// Drop `claim` unless another request has displaced it.
    async fn release(&self, key: &IdempotencyKey, cache_key: &str, claim: &CacheEntry) {
        match self.cache.remove_if_unchanged(cache_key, claim).await {
            Ok(true) => {}
            Ok(false) => debug!(key = %key, "idempotency claim already displaced"),
            Err(err) => {
                warn!(key = %key, error = %err, "failed to release idempotency claim; it will lapse");
            }
        }
    }
}

fn expires_at(from: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| from.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
#[path = "guard_tests.rs"]
mod tests;
