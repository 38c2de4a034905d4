//! Outbox message record and relay bookkeeping types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{EventType, EventTypeValidationError};

/// Unique identifier of an outbox message.
///
/// Generated when the message is created and published alongside the event
/// so consumers can discard redeliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxMessageId(Uuid);

impl OutboxMessageId {
    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an identifier loaded from storage.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for OutboxMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A typed domain event that can be recorded in the outbox.
///
/// # Example
///
/// ```
/// use backbone::domain::outbox::{DomainEvent, OutboxMessage};
/// use chrono::Utc;
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct UserCreated {
///     user_id: String,
/// }
///
/// impl DomainEvent for UserCreated {
///     const EVENT_TYPE: &'static str = "UserCreated";
/// }
///
/// let event = UserCreated { user_id: "u-1".to_owned() };
/// let message = OutboxMessage::for_event(&event, "users", Utc::now())
///     .expect("event serialises");
/// assert_eq!(message.event_type.as_ref(), "UserCreated");
/// assert_eq!(message.retry_count, 0);
/// ```
pub trait DomainEvent: Serialize {
    /// Discriminator stored in [`OutboxMessage::event_type`].
    const EVENT_TYPE: &'static str;
}

/// Errors raised while building an [`OutboxMessage`] from a typed event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutboxMessageError {
    /// The event discriminator failed validation.
    #[error(transparent)]
    EventType(#[from] EventTypeValidationError),
    /// The event body could not be serialised.
    #[error("failed to serialise event payload: {message}")]
    Payload {
        /// Serializer failure description.
        message: String,
    },
}

/// Durable record of one outbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Unique identifier, generated at creation.
    pub id: OutboxMessageId,
    /// Event discriminator.
    pub event_type: EventType,
    /// Serialised event body.
    pub payload: Value,
    /// Producer of the event (module or aggregate name).
    pub source: String,
    /// Creation time; fetch order follows it.
    pub created_at: DateTime<Utc>,
    /// Delivery time; `None` until the relay publishes the message.
    pub processed_at: Option<DateTime<Utc>>,
    /// Number of failed publish attempts. Never decreases.
    pub retry_count: u32,
    /// Last failure reason.
    pub error: Option<String>,
    /// Earliest time the relay may attempt delivery.
    pub next_attempt_at: DateTime<Utc>,
    /// Relay instance currently holding the delivery lease.
    pub locked_by: Option<String>,
    /// Expiry of the current delivery lease.
    pub locked_until: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    /// Create a new unprocessed message, immediately due for delivery.
    pub fn new(
        event_type: EventType,
        source: impl Into<String>,
        payload: Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OutboxMessageId::random(),
            event_type,
            payload,
            source: source.into(),
            created_at,
            processed_at: None,
            retry_count: 0,
            error: None,
            next_attempt_at: created_at,
            locked_by: None,
            locked_until: None,
        }
    }

    /// Create a message from a typed [`DomainEvent`].
    ///
    /// # Errors
    ///
    /// Returns [`OutboxMessageError`] when the event type is invalid or the
    /// event cannot be serialised to JSON.
    pub fn for_event<E: DomainEvent>(
        event: &E,
        source: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, OutboxMessageError> {
        let event_type = EventType::new(E::EVENT_TYPE)?;
        let payload = serde_json::to_value(event).map_err(|err| OutboxMessageError::Payload {
            message: err.to_string(),
        })?;
        Ok(Self::new(event_type, source, payload, created_at))
    }

    /// Whether the message has been delivered.
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    /// Whether the message exhausted its automatic retries.
    pub fn is_dead_letter(&self, max_retries: u32) -> bool {
        !self.is_processed() && self.retry_count >= max_retries
    }

    /// Whether a relay holding `lease` may claim this message now.
    pub fn is_claimable(&self, lease: &RelayLease, max_retries: u32) -> bool {
        let now = lease.acquired_at;
        let leased_elsewhere = match (&self.locked_by, self.locked_until) {
            (Some(owner), Some(until)) => owner != &lease.owner && until > now,
            _ => false,
        };
        !self.is_processed()
            && self.retry_count < max_retries
            && self.next_attempt_at <= now
            && !leased_elsewhere
    }

    /// Record `lease` as the holder of this message.
    pub fn apply_lease(&mut self, lease: &RelayLease) {
        self.locked_by = Some(lease.owner.clone());
        self.locked_until = Some(lease.until);
    }

    /// Mark the message delivered at `processed_at`.
    ///
    /// Returns `false` without changing anything when the message was
    /// already processed.
    pub fn record_success(&mut self, processed_at: DateTime<Utc>) -> bool {
        if self.is_processed() {
            return false;
        }
        self.processed_at = Some(processed_at);
        self.release_lease();
        true
    }

    /// Record a failed delivery attempt and return the resulting retry count.
    ///
    /// Processed messages are immutable; their count is returned unchanged.
    pub fn record_failure(&mut self, failure: &RetryFailure) -> u32 {
        if self.is_processed() {
            return self.retry_count;
        }
        self.retry_count = self.retry_count.saturating_add(1);
        self.error = Some(failure.reason.clone());
        self.next_attempt_at = failure.next_attempt_at;
        self.release_lease();
        self.retry_count
    }

    fn release_lease(&mut self) {
        self.locked_by = None;
        self.locked_until = None;
    }
}

/// Delivery lease taken by a relay instance when fetching a batch.
///
/// Other relays skip leased messages until the lease expires, so a crashed
/// relay's batch becomes claimable again after `until`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayLease {
    /// Relay instance identifier.
    pub owner: String,
    /// Time the lease was taken; used as "now" by the store.
    pub acquired_at: DateTime<Utc>,
    /// Lease expiry.
    pub until: DateTime<Utc>,
}

impl RelayLease {
    /// Build a lease for `owner` valid for `duration` from `now`.
    pub fn new(owner: impl Into<String>, now: DateTime<Utc>, duration: Duration) -> Self {
        let until = TimeDelta::from_std(duration)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            owner: owner.into(),
            acquired_at: now,
            until,
        }
    }
}

/// Outcome of a failed publish, passed to the store's retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure {
    /// Failure reason recorded on the message.
    pub reason: String,
    /// Earliest time of the next attempt.
    pub next_attempt_at: DateTime<Utc>,
}
