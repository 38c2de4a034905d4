//! Diesel table definitions for the outbox schema.
//!
//! Must match `backend/migrations`; regenerate with `diesel print-schema`
//! after changing a migration.

diesel::table! {
    /// Transactional outbox.
    ///
    /// Rows are inserted by units of work and updated only by relays.
    outbox_messages (id) {
        /// Primary key, also the consumer-facing event id.
        id -> Uuid,
        /// Routing name of the event.
        event_type -> Varchar,
        /// Serialised event body.
        payload -> Jsonb,
        /// Component that produced the event.
        source -> Varchar,
        created_at -> Timestamptz,
        /// Set once, when delivery succeeds.
        processed_at -> Nullable<Timestamptz>,
        /// Failed delivery attempts.
        retry_count -> Int4,
        /// Reason for the most recent failure.
        error -> Nullable<Text>,
        /// Earliest time the relay may retry.
        next_attempt_at -> Timestamptz,
        /// Relay currently holding the row.
        locked_by -> Nullable<Varchar>,
        /// Lease expiry for `locked_by`.
        locked_until -> Nullable<Timestamptz>,
    }
}
