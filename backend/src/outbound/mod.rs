//! Outbound adapters implementing domain ports.
//!
//! - **persistence**: PostgreSQL outbox store and unit of work (Diesel)
//! - **cache**: Redis idempotency cache (bb8-redis)
//! - **publisher**: webhook and log-only event publishers
//! - **memory**: in-process adapters for tests and single-node setups
//!
//! Adapters translate between domain types and infrastructure
//! representations. They contain no business logic.

pub mod cache;
pub mod memory;
pub mod persistence;
pub mod publisher;
