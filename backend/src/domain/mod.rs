//! Domain core: request dispatch, idempotent execution, and the
//! transactional outbox.
//!
//! Public surface:
//! - [`dispatch`]: typed request routing through a handler registry with
//!   per-request execution scopes.
//! - [`idempotency`]: client-keyed response caching around mutations.
//! - [`outbox`]: event records written alongside business state.
//! - [`outbox_relay`]: background delivery with retries and dead letters.
//! - [`ports`]: traits implemented by outbound adapters.
//! - [`Error`] and [`ErrorCode`]: the failure payload handlers return.

pub mod dispatch;
pub mod error;
pub mod idempotency;
pub mod outbox;
pub mod outbox_relay;
pub mod ports;

pub use self::error::{Error, ErrorCode, ErrorValidationError};

/// Result alias for handler and guard operations.
pub type DomainResult<T> = Result<T, Error>;
