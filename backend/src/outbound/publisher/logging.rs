//! Publisher that only records deliveries in the log.

use async_trait::async_trait;
use tracing::info;

use crate::domain::outbox::OutboxMessage;
use crate::domain::ports::{EventPublisher, PublishError};

/// Accepts every message and logs it at info level.
///
/// Used when no webhook endpoint is configured, so the relay still drains
/// the outbox in local setups.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPublisher;

#[async_trait]
impl EventPublisher for TracingPublisher {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError> {
        info!(
            message_id = %message.id,
            event_type = %message.event_type,
            source = %message.source,
            retry_count = message.retry_count,
            "outbox event published"
        );
        Ok(())
    }
}
