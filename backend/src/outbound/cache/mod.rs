//! Idempotency cache adapters.

mod redis;

pub use redis::{RedisIdempotencyCache, redact_url};
