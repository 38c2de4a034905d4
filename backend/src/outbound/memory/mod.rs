//! In-process adapters for tests, local development, and single-node use.
//!
//! - [`InMemoryOutboxStore`]: outbox store and unit-of-work factory backed by
//!   a mutex-guarded list.
//! - [`InMemoryIdempotencyCache`]: clock-aware TTL map.
//!
//! Nothing here survives a restart.

mod idempotency_cache;
mod outbox;

pub use idempotency_cache::InMemoryIdempotencyCache;
pub use outbox::{InMemoryOutboxStore, InMemoryUnitOfWork};
