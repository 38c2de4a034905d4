//! Reliable request-processing backbone.
//!
//! Commands and queries are routed to typed handlers by a
//! [`domain::dispatch::Dispatcher`]; mutations can be wrapped in an
//! [`domain::idempotency::IdempotencyGuard`] so retried requests replay the
//! first response; and state changes record events in a transactional outbox
//! that an [`domain::outbox_relay::OutboxRelay`] delivers at least once.

pub mod domain;
pub mod outbound;
pub mod settings;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use settings::BackboneSettings;
