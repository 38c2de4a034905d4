//! PostgreSQL-backed `OutboxStore` implementation using Diesel ORM.
//!
//! Claims run in a single transaction: due rows are selected with
//! `FOR UPDATE SKIP LOCKED`, then stamped with the relay's lease. Concurrent
//! relays therefore never claim the same row, and a row claimed by a relay
//! that crashed becomes due again once its `locked_until` passes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use tracing::debug;
use uuid::Uuid;

use crate::domain::outbox::{OutboxMessage, OutboxMessageId, RelayLease, RetryFailure};
use crate::domain::ports::{OutboxStore, OutboxStoreError, UnitOfWork, UnitOfWorkFactory};

use super::error_mapping::{map_diesel_error, map_pool_error};
use super::models::OutboxMessageRow;
use super::pg_unit_of_work::PgUnitOfWork;
use super::pool::DbPool;
use super::schema::outbox_messages;

/// Diesel-backed outbox store.
///
/// Also opens [`PgUnitOfWork`]s on the same pool, so one value serves both
/// the write side and the relay.
#[derive(Debug, Clone)]
pub struct DieselOutboxStore {
    pool: DbPool,
}

impl DieselOutboxStore {
    /// Create a new store with the given connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Pool backing this store.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn sql_retry_bound(max_retries: u32) -> i32 {
    i32::try_from(max_retries).unwrap_or(i32::MAX)
}

fn sql_retry_count(count: i32) -> Result<u32, OutboxStoreError> {
    u32::try_from(count)
        .map_err(|_| OutboxStoreError::serialization(format!("negative retry count {count}")))
}

fn rows_to_messages(
    mut rows: Vec<OutboxMessageRow>,
) -> Result<Vec<OutboxMessage>, OutboxStoreError> {
    // RETURNING does not preserve the SELECT ordering.
    rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    rows.into_iter().map(OutboxMessage::try_from).collect()
}

#[async_trait]
impl OutboxStore for DieselOutboxStore {
    async fn fetch_unprocessed(
        &self,
        limit: usize,
        max_retries: u32,
        lease: &RelayLease,
    ) -> Result<Vec<OutboxMessage>, OutboxStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;
        let now = lease.acquired_at;
        let owner = lease.owner.as_str();
        let until = lease.until;
        let retry_bound = sql_retry_bound(max_retries);

        let rows = conn
            .transaction(|conn| {
                async move {
                    let ids: Vec<Uuid> = outbox_messages::table
                        .filter(outbox_messages::processed_at.is_null())
                        .filter(outbox_messages::retry_count.lt(retry_bound))
                        .filter(outbox_messages::next_attempt_at.le(now))
                        .filter(
                            outbox_messages::locked_until
                                .is_null()
                                .or(outbox_messages::locked_until.le(now))
                                .or(outbox_messages::locked_by.eq(owner)),
                        )
                        .order((outbox_messages::created_at.asc(), outbox_messages::id.asc()))
                        .limit(sql_limit(limit))
                        .select(outbox_messages::id)
                        .for_update()
                        .skip_locked()
                        .load(conn)
                        .await?;

                    if ids.is_empty() {
                        return Ok(Vec::new());
                    }

                    diesel::update(
                        outbox_messages::table.filter(outbox_messages::id.eq_any(&ids)),
                    )
                    .set((
                        outbox_messages::locked_by.eq(owner),
                        outbox_messages::locked_until.eq(until),
                    ))
                    .returning(OutboxMessageRow::as_returning())
                    .get_results(conn)
                    .await
                }
                .scope_boxed()
            })
            .await
            .map_err(map_diesel_error)?;

        debug!(owner, claimed = rows.len(), "claimed outbox messages");
        rows_to_messages(rows)
    }

    async fn mark_processed(
        &self,
        id: OutboxMessageId,
        processed_at: DateTime<Utc>,
    ) -> Result<(), OutboxStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let updated = diesel::update(
            outbox_messages::table
                .find(*id.as_uuid())
                .filter(outbox_messages::processed_at.is_null()),
        )
        .set((
            outbox_messages::processed_at.eq(processed_at),
            outbox_messages::locked_by.eq(None::<String>),
            outbox_messages::locked_until.eq(None::<DateTime<Utc>>),
        ))
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;

        if updated == 0 {
            let exists: Option<Uuid> = outbox_messages::table
                .find(*id.as_uuid())
                .select(outbox_messages::id)
                .first(&mut conn)
                .await
                .optional()
                .map_err(map_diesel_error)?;
            if exists.is_none() {
                return Err(OutboxStoreError::not_found(id.to_string()));
            }
            debug!(%id, "outbox message already processed");
        }
        Ok(())
    }

    async fn increment_retry(
        &self,
        id: OutboxMessageId,
        failure: &RetryFailure,
    ) -> Result<u32, OutboxStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let incremented: Option<i32> = diesel::update(
            outbox_messages::table
                .find(*id.as_uuid())
                .filter(outbox_messages::processed_at.is_null()),
        )
        .set((
            outbox_messages::retry_count.eq(outbox_messages::retry_count + 1),
            outbox_messages::error.eq(failure.reason.as_str()),
            outbox_messages::next_attempt_at.eq(failure.next_attempt_at),
            outbox_messages::locked_by.eq(None::<String>),
            outbox_messages::locked_until.eq(None::<DateTime<Utc>>),
        ))
        .returning(outbox_messages::retry_count)
        .get_result(&mut conn)
        .await
        .optional()
        .map_err(map_diesel_error)?;

        let count = match incremented {
            Some(count) => count,
            None => outbox_messages::table
                .find(*id.as_uuid())
                .select(outbox_messages::retry_count)
                .first::<i32>(&mut conn)
                .await
                .optional()
                .map_err(map_diesel_error)?
                .ok_or_else(|| OutboxStoreError::not_found(id.to_string()))?,
        };
        sql_retry_count(count)
    }

    async fn fetch_failed(
        &self,
        max_retries: u32,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, OutboxStoreError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let rows: Vec<OutboxMessageRow> = outbox_messages::table
            .filter(outbox_messages::processed_at.is_null())
            .filter(outbox_messages::retry_count.ge(sql_retry_bound(max_retries)))
            .order((outbox_messages::created_at.asc(), outbox_messages::id.asc()))
            .limit(sql_limit(limit))
            .select(OutboxMessageRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        rows_to_messages(rows)
    }
}

#[async_trait]
impl UnitOfWorkFactory for DieselOutboxStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, OutboxStoreError> {
        Ok(Box::new(PgUnitOfWork::begin(&self.pool).await?))
    }
}
