//! Transactional outbox primitives.
//!
//! - [`OutboxMessage`]: durable record of one outbound domain event, appended
//!   in the same unit of work as the business mutation that produced it.
//! - [`OutboxMessageId`]: unique message identifier, also the deduplication
//!   key consumers use under at-least-once delivery.
//! - [`EventType`]: validated event discriminator.
//! - [`DomainEvent`]: typed events that serialise into an outbox payload.
//! - [`RelayLease`] / [`RetryFailure`]: bookkeeping passed to the store by the
//!   relay when claiming and failing messages.
//!
//! # Lifecycle
//!
//! A message is created unprocessed with `retry_count == 0`. Only the relay
//! mutates it afterwards: a successful publish sets `processed_at`, after
//! which the message is immutable; a failed publish increments
//! `retry_count`, records the error, and schedules `next_attempt_at`. Once
//! `retry_count` reaches the relay's `max_retries` the message is a dead
//! letter and is only visible through the dead-letter query.

mod event_type;
mod message;

pub use event_type::{EventType, EventTypeValidationError};
pub use message::{
    DomainEvent, OutboxMessage, OutboxMessageError, OutboxMessageId, RelayLease, RetryFailure,
};

#[cfg(test)]
mod tests;
