//! Redis-backed `IdempotencyCache`.
//!
//! Entries are stored as JSON strings under the guard's namespaced keys.
//! Expiry is delegated to Redis through `PX` so the cache never serves a
//! stale record, and claims use `SET NX PX` so only one caller wins.
//! Conditional replacement and deletion run as Lua scripts comparing the
//! stored JSON with the caller's expected entry, encoded the same way.

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::RedisConnectionManager;
use bb8_redis::bb8::{Pool, PooledConnection};
use bb8_redis::redis;
use tracing::debug;

use crate::domain::idempotency::CacheEntry;
use crate::domain::ports::{IdempotencyCache, IdempotencyCacheError};

/// Idempotency cache backed by a pooled Redis connection.
#[derive(Clone)]
pub struct RedisIdempotencyCache {
    pool: Pool<RedisConnectionManager>,
}

impl std::fmt::Debug for RedisIdempotencyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisIdempotencyCache")
            .field("state", &self.pool.state())
            .finish()
    }
}

impl RedisIdempotencyCache {
    /// Wrap an existing pool.
    pub fn new(pool: Pool<RedisConnectionManager>) -> Self {
        Self { pool }
    }

    /// Build a pool of at most `max_size` connections to `url`.
    ///
    /// # Errors
    ///
    /// [`IdempotencyCacheError::Backend`] when the URL is invalid or the
    /// initial connections fail.
    pub async fn connect(url: &str, max_size: u32) -> Result<Self, IdempotencyCacheError> {
        let manager = RedisConnectionManager::new(url).map_err(|err| {
            IdempotencyCacheError::backend(format!("invalid redis url: {err}"))
        })?;
        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .build(manager)
            .await
            .map_err(|err| IdempotencyCacheError::backend(format!("redis connect failed: {err}")))?;
        debug!(url = %redact_url(url), "redis idempotency cache connected");
        Ok(Self { pool })
    }

    async fn connection(
        &self,
    ) -> Result<PooledConnection<'_, RedisConnectionManager>, IdempotencyCacheError> {
        self.pool
            .get()
            .await
            .map_err(|err| IdempotencyCacheError::backend(format!("redis checkout failed: {err}")))
    }
}

const REPLACE_IF_EQUAL: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
    return 1
end
return 0
"#;

const DELETE_IF_EQUAL: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

fn encode(entry: &CacheEntry) -> Result<String, IdempotencyCacheError> {
    serde_json::to_string(entry).map_err(|err| IdempotencyCacheError::serialization(err.to_string()))
}

fn decode(raw: &str) -> Result<CacheEntry, IdempotencyCacheError> {
    serde_json::from_str(raw).map_err(|err| IdempotencyCacheError::serialization(err.to_string()))
}

/// TTL in whole milliseconds; Redis rejects `PX 0`.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn command_error(command: &str, err: redis::RedisError) -> IdempotencyCacheError {
    IdempotencyCacheError::backend(format!("redis {command} failed: {err}"))
}

#[async_trait]
impl IdempotencyCache for RedisIdempotencyCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, IdempotencyCacheError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .map_err(|err| command_error("GET", err))?;
        raw.as_deref().map(decode).transpose()
    }

    async fn set(
        &self,
        key: &str,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<(), IdempotencyCacheError> {
        let value = encode(entry)?;
        let mut conn = self.connection().await?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|err| command_error("SET", err))
    }

    async fn set_if_absent(
        &self,
        key: &str,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<bool, IdempotencyCacheError> {
        let value = encode(entry)?;
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut *conn)
            .await
            .map_err(|err| command_error("SET NX", err))?;
        Ok(reply.is_some())
    }

    async fn replace_if_unchanged(
        &self,
        key: &str,
        expected: &CacheEntry,
        entry: &CacheEntry,
        ttl: Duration,
    ) -> Result<bool, IdempotencyCacheError> {
        let expected = encode(expected)?;
        let value = encode(entry)?;
        let mut conn = self.connection().await?;
        let replaced: i64 = redis::cmd("EVAL")
            .arg(REPLACE_IF_EQUAL)
            .arg(1)
            .arg(key)
            .arg(expected)
            .arg(value)
            .arg(ttl_millis(ttl))
            .query_async(&mut *conn)
            .await
            .map_err(|err| command_error("EVAL replace", err))?;
        Ok(replaced == 1)
    }

    async fn remove_if_unchanged(
        &self,
        key: &str,
        expected: &CacheEntry,
    ) -> Result<bool, IdempotencyCacheError> {
        let expected = encode(expected)?;
        let mut conn = self.connection().await?;
        let removed: i64 = redis::cmd("EVAL")
            .arg(DELETE_IF_EQUAL)
            .arg(1)
            .arg(key)
            .arg(expected)
            .query_async(&mut *conn)
            .await
            .map_err(|err| command_error("EVAL delete", err))?;
        Ok(removed == 1)
    }

    async fn remove(&self, key: &str) -> Result<(), IdempotencyCacheError> {
        let mut conn = self.connection().await?;
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|err| command_error("DEL", err))
    }
}

/// Redact the password from a Redis URL for logging.
pub fn redact_url(url: &str) -> String {
    let authority = url.find("://").map_or(0, |scheme| scheme + 3);
    if let Some(at) = url.find('@')
        && let Some(colon) = url[..at].rfind(':')
        && colon >= authority
    {
        return format!("{}***{}", &url[..=colon], &url[at..]);
    }
    url.to_owned()
}
