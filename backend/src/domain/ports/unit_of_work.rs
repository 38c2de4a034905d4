//! Port abstraction for transactional writes that carry outbox messages.
//!
//! A unit of work wraps one storage transaction. Business repositories write
//! through the adapter's transaction handle and outbox messages are appended
//! with [`UnitOfWork::append`], so both commit or roll back together. A unit
//! dropped without `commit` leaves no trace.

use async_trait::async_trait;

use crate::domain::outbox::OutboxMessage;

use super::OutboxStoreError;

/// One open storage transaction.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Stage `message` for insertion with this transaction.
    async fn append(&mut self, message: &OutboxMessage) -> Result<(), OutboxStoreError>;

    /// Commit the transaction, making appended messages visible to the relay.
    async fn commit(self: Box<Self>) -> Result<(), OutboxStoreError>;

    /// Abandon the transaction and everything staged in it.
    async fn rollback(self: Box<Self>) -> Result<(), OutboxStoreError>;
}

/// Opens units of work.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UnitOfWorkFactory: Send + Sync {
    /// Begin a new transaction.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, OutboxStoreError>;
}
