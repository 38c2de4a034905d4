//! Port abstraction for delivering outbox messages to consumers.

use async_trait::async_trait;

use crate::domain::outbox::OutboxMessage;

use super::define_port_error;

define_port_error! {
    /// Errors raised by event publisher adapters. Every variant is retried by
    /// the relay until the message is dead-lettered.
    pub enum PublishError {
        /// The destination could not be reached or timed out.
        Unavailable { message: String } => "event destination unavailable: {message}",
        /// The destination refused the message.
        Rejected { message: String } => "event rejected by destination: {message}",
    }
}

/// Delivers one message to an external consumer.
///
/// Delivery is at-least-once: the same message may be published again after a
/// crash between publish and acknowledgement, so consumers dedupe by
/// [`OutboxMessage::id`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `message`.
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError>;
}
