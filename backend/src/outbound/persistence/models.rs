//! Internal Diesel row structs for the outbox table.
//!
//! These never leave the persistence layer; conversions to and from
//! [`OutboxMessage`] live here.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::domain::outbox::{EventType, OutboxMessage, OutboxMessageId};
use crate::domain::ports::OutboxStoreError;

use super::schema::outbox_messages;

/// Row struct for reading from the outbox_messages table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = outbox_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct OutboxMessageRow {
    pub id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxMessageRow> for OutboxMessage {
    type Error = OutboxStoreError;

    fn try_from(row: OutboxMessageRow) -> Result<Self, Self::Error> {
        let event_type = EventType::new(row.event_type).map_err(|err| {
            OutboxStoreError::serialization(format!("stored event type for {}: {err}", row.id))
        })?;
        let retry_count = u32::try_from(row.retry_count).map_err(|_| {
            OutboxStoreError::serialization(format!(
                "negative retry count {} for {}",
                row.retry_count, row.id
            ))
        })?;

        Ok(Self {
            id: OutboxMessageId::from_uuid(row.id),
            event_type,
            payload: row.payload,
            source: row.source,
            created_at: row.created_at,
            processed_at: row.processed_at,
            retry_count,
            error: row.error,
            next_attempt_at: row.next_attempt_at,
            locked_by: row.locked_by,
            locked_until: row.locked_until,
        })
    }
}

/// Insertable struct for appending outbox messages.
///
/// Delivery bookkeeping columns take their defaults.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = outbox_messages)]
pub(crate) struct NewOutboxMessageRow<'a> {
    pub id: Uuid,
    pub event_type: &'a str,
    pub payload: &'a serde_json::Value,
    pub source: &'a str,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
}

impl<'a> From<&'a OutboxMessage> for NewOutboxMessageRow<'a> {
    fn from(message: &'a OutboxMessage) -> Self {
        Self {
            id: *message.id.as_uuid(),
            event_type: message.event_type.as_ref(),
            payload: &message.payload,
            source: &message.source,
            created_at: message.created_at,
            next_attempt_at: message.next_attempt_at,
        }
    }
}
