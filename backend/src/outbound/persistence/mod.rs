//! PostgreSQL persistence for the transactional outbox.
//!
//! [`DieselOutboxStore`] implements the relay-facing `OutboxStore` port and
//! opens [`PgUnitOfWork`]s for the write side. Row structs and the Diesel
//! schema are internal; only domain types cross this boundary.
//!
//! ```ignore
//! use backbone::outbound::persistence::{DbPool, DieselOutboxStore, PoolConfig};
//!
//! let pool = DbPool::new(PoolConfig::new("postgres://localhost/app")).await?;
//! let store = DieselOutboxStore::new(pool);
//! ```

mod diesel_outbox_store;
mod error_mapping;
mod migrations;
mod models;
mod pg_unit_of_work;
mod pool;
mod schema;

pub use diesel_outbox_store::DieselOutboxStore;
pub use migrations::{MIGRATIONS, MigrationError, run_pending_migrations};
pub use pg_unit_of_work::PgUnitOfWork;
pub use pool::{DbPool, PoolConfig, PoolError};
