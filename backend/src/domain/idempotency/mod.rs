//! Idempotency primitives and the guard for safe request retries.
//!
//! - [`IdempotencyKey`]: validated UUID sent by clients with each mutating
//!   request.
//! - [`PayloadHash`]: SHA-256 of the canonicalised request payload, kept for
//!   diagnostics when a key is reused with a different body.
//! - [`IdempotencyRecord`] / [`CacheEntry`]: what the cache stores per key.
//! - [`GuardedResponse`] / [`ResponseStatus`]: the status and JSON body an
//!   operation produces, replayed verbatim on a hit.
//! - [`IdempotencyConfig`] / [`ClaimMode`]: TTL and concurrency behaviour.
//! - [`IdempotencyGuard`]: the interceptor itself.
//!
//! # Payload canonicalisation
//!
//! Object keys are sorted recursively and the result is serialised as compact
//! JSON before hashing, so key order and whitespace do not change the hash.

mod config;
mod guard;
mod key;
mod payload;
mod record;

pub use config::{ClaimMode, IdempotencyConfig, ParseClaimModeError};
pub use guard::{IdempotencyError, IdempotencyGuard, IdempotentCommand};
pub use key::{IdempotencyKey, IdempotencyKeyValidationError};
pub use payload::{PayloadHash, PayloadHashError, canonicalize_and_hash};
pub use record::{CacheEntry, GuardedResponse, IdempotencyRecord, ResponseStatus};

#[cfg(test)]
mod tests;
