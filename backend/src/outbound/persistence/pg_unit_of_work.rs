//! PostgreSQL unit of work.
//!
//! Holds one pooled connection with an open transaction. Repositories write
//! through [`PgUnitOfWork::connection`] and outbox rows are inserted on the
//! same connection, so business state and events commit together.

use async_trait::async_trait;
use diesel_async::pooled_connection::bb8::PooledConnection;
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, RunQueryDsl, TransactionManager};
use tracing::debug;

use crate::domain::outbox::OutboxMessage;
use crate::domain::ports::{OutboxStoreError, UnitOfWork};

use super::error_mapping::{map_diesel_error, map_pool_error};
use super::models::NewOutboxMessageRow;
use super::pool::DbPool;
use super::schema::outbox_messages;

/// One open PostgreSQL transaction.
///
/// Dropping the unit without committing returns a connection with an open
/// transaction to the pool, which discards it; PostgreSQL then rolls the
/// transaction back.
pub struct PgUnitOfWork {
    conn: PooledConnection<'static, AsyncPgConnection>,
    appended: usize,
}

impl PgUnitOfWork {
    /// Check out a connection and open a transaction on it.
    ///
    /// # Errors
    ///
    /// [`OutboxStoreError::Connection`] when no connection is available, or
    /// a mapped Diesel error when `BEGIN` fails.
    pub async fn begin(pool: &DbPool) -> Result<Self, OutboxStoreError> {
        let mut conn = pool.get_owned().await.map_err(map_pool_error)?;
        AnsiTransactionManager::begin_transaction(&mut *conn)
            .await
            .map_err(map_diesel_error)?;
        Ok(Self { conn, appended: 0 })
    }

    /// Connection carrying the open transaction, for business writes.
    pub fn connection(&mut self) -> &mut AsyncPgConnection {
        &mut self.conn
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn append(&mut self, message: &OutboxMessage) -> Result<(), OutboxStoreError> {
        diesel::insert_into(outbox_messages::table)
            .values(NewOutboxMessageRow::from(message))
            .execute(&mut *self.conn)
            .await
            .map_err(map_diesel_error)?;
        self.appended += 1;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), OutboxStoreError> {
        AnsiTransactionManager::commit_transaction(&mut *self.conn)
            .await
            .map_err(map_diesel_error)?;
        debug!(appended = self.appended, "outbox unit of work committed");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), OutboxStoreError> {
        AnsiTransactionManager::rollback_transaction(&mut *self.conn)
            .await
            .map_err(map_diesel_error)
    }
}
