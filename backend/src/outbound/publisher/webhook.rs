//! HTTP webhook publisher.
//!
//! Each message is POSTed as a JSON [`WebhookEnvelope`]. The message id is
//! sent in `X-Event-Id` so receivers can drop redeliveries. Any 2xx counts as
//! delivered; everything else is a [`PublishError`] and the relay retries.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::domain::outbox::OutboxMessage;
use crate::domain::ports::{EventPublisher, PublishError};

/// Header carrying the outbox message id.
pub const EVENT_ID_HEADER: &str = "X-Event-Id";
/// Header carrying the event type.
pub const EVENT_TYPE_HEADER: &str = "X-Event-Type";

/// JSON body sent to the webhook endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope<'a> {
    pub id: String,
    pub event_type: &'a str,
    pub source: &'a str,
    pub created_at: DateTime<Utc>,
    pub attempt: u32,
    pub payload: &'a Value,
}

impl<'a> From<&'a OutboxMessage> for WebhookEnvelope<'a> {
    fn from(message: &'a OutboxMessage) -> Self {
        Self {
            id: message.id.to_string(),
            event_type: message.event_type.as_ref(),
            source: &message.source,
            created_at: message.created_at,
            attempt: message.retry_count.saturating_add(1),
            payload: &message.payload,
        }
    }
}

/// Publishes outbox messages to a single HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookPublisher {
    client: Client,
    endpoint: Url,
}

impl WebhookPublisher {
    /// Build a publisher with a per-request `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    /// Target endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl EventPublisher for WebhookPublisher {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(EVENT_ID_HEADER, message.id.to_string())
            .header(EVENT_TYPE_HEADER, message.event_type.as_ref())
            .json(&WebhookEnvelope::from(message))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            debug!(message_id = %message.id, status = status.as_u16(), "webhook accepted event");
            return Ok(());
        }
        let body = response.bytes().await.unwrap_or_default();
        Err(map_status_error(status, body.as_ref()))
    }
}

fn map_transport_error(error: reqwest::Error) -> PublishError {
    if error.is_timeout() {
        PublishError::unavailable(format!("webhook timed out: {error}"))
    } else {
        PublishError::unavailable(error.to_string())
    }
}

fn map_status_error(status: StatusCode, body: &[u8]) -> PublishError {
    let body_preview = body_preview(body);
    let message = if body_preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), body_preview)
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            PublishError::unavailable(message)
        }
        _ if status.is_client_error() => PublishError::rejected(message),
        _ => PublishError::unavailable(message),
    }
}

fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}
