//! Helpers shared by the suites that run against embedded PostgreSQL.
//!
//! Each integration test file is its own crate, so suites pull these in with
//! `mod support;`.

pub mod cluster_skip;
pub mod embedded_postgres;

pub use cluster_skip::handle_cluster_setup_failure;
pub use embedded_postgres::{provision_template_database, shared_cluster};
