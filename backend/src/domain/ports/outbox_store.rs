//! Port abstraction for the relay side of the transactional outbox.
//!
//! Writes happen through [`super::UnitOfWork`]; the [`OutboxStore`] trait is
//! what the relay uses to claim due messages and record delivery outcomes.
//! Adapters must keep every operation safe under concurrent relays: a
//! message leased to one relay is skipped by others until the lease lapses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::outbox::{OutboxMessage, OutboxMessageId, RelayLease, RetryFailure};

use super::define_port_error;

define_port_error! {
    /// Errors raised by outbox store adapters.
    pub enum OutboxStoreError {
        /// Store connection could not be established.
        Connection { message: String } => "outbox store connection failed: {message}",
        /// Query or mutation failed during execution.
        Query { message: String } => "outbox store query failed: {message}",
        /// No message exists with the given id.
        NotFound { id: String } => "outbox message {id} not found",
        /// A stored row could not be mapped to a message.
        Serialization { message: String } => "outbox store serialization failed: {message}",
    }
}

/// Relay-facing outbox persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claim up to `limit` due messages for `lease`, oldest first.
    ///
    /// A message is due when it is unprocessed, has fewer than `max_retries`
    /// failures, its `next_attempt_at` is not after `lease.acquired_at`, and
    /// no other relay holds a live lease on it. Returned messages carry the
    /// new lease.
    async fn fetch_unprocessed(
        &self,
        limit: usize,
        max_retries: u32,
        lease: &RelayLease,
    ) -> Result<Vec<OutboxMessage>, OutboxStoreError>;

    /// Record successful delivery. Already processed messages are left
    /// untouched.
    async fn mark_processed(
        &self,
        id: OutboxMessageId,
        processed_at: DateTime<Utc>,
    ) -> Result<(), OutboxStoreError>;

    /// Record a failed delivery and return the resulting retry count.
    ///
    /// Never sets `processed_at`; a processed message is left untouched and
    /// its current count returned.
    async fn increment_retry(
        &self,
        id: OutboxMessageId,
        failure: &RetryFailure,
    ) -> Result<u32, OutboxStoreError>;

    /// List dead letters: unprocessed messages with at least `max_retries`
    /// failures, oldest first.
    async fn fetch_failed(
        &self,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, OutboxStoreError>;
}
