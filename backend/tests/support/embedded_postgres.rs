//! Embedded PostgreSQL provisioning for the outbox suites.
//!
//! One cluster is shared per test binary. Every test gets its own database
//! cloned from a template that already carries the outbox migrations; the
//! template name includes a hash of `migrations/`, so editing a migration
//! produces a fresh template instead of reusing a stale schema.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use backbone::domain::ports::OutboxStoreError;
use backbone::outbound::persistence::MIGRATIONS;
use diesel::Connection;
use diesel::pg::PgConnection;
use diesel_migrations::MigrationHarness;
use pg_embedded_setup_unpriv::test_support::hash_directory;
use pg_embedded_setup_unpriv::{BootstrapResult, ClusterHandle, TemporaryDatabase};
use uuid::Uuid;

const CLUSTER_RETRIES: usize = 5;
const PROVISION_RETRIES: usize = 5;
const RETRY_DELAY: Duration = Duration::from_millis(500);
const TEMPLATE_PREFIX: &str = "outbox_template";

static TEMPLATE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Start, or join, the cluster shared by this test binary.
pub fn shared_cluster() -> BootstrapResult<&'static ClusterHandle> {
    pin_password();
    let mut attempt = 1;
    loop {
        match pg_embedded_setup_unpriv::test_support::shared_cluster_handle() {
            Ok(handle) => return Ok(handle),
            Err(error) if attempt >= CLUSTER_RETRIES => return Err(error),
            Err(_) => {
                std::thread::sleep(RETRY_DELAY);
                attempt += 1;
            }
        }
    }
}

// A reused data directory keeps the password from its first `initdb`.
fn pin_password() {
    if std::env::var_os("PG_PASSWORD").is_none() {
        // SAFETY: runs before the cluster library starts any threads, and the
        // shared handle initialises at most once per process.
        unsafe {
            std::env::set_var("PG_PASSWORD", "backbone_embedded_test");
        }
    }
}

fn template_name() -> Result<String, OutboxStoreError> {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");
    let hash = hash_directory(dir)
        .map_err(|err| OutboxStoreError::query(format!("hash migrations: {err}")))?;
    let short = hash.get(..8).unwrap_or(&hash);
    Ok(format!("{TEMPLATE_PREFIX}_{short}"))
}

fn ensure_template(cluster: &ClusterHandle) -> Result<String, OutboxStoreError> {
    let name = template_name()?;
    let _guard = TEMPLATE_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|err| err.into_inner());

    let exists = cluster
        .database_exists(name.as_str())
        .map_err(|err| OutboxStoreError::query(format!("template check: {err:?}")))?;
    if !exists {
        cluster
            .create_database(name.as_str())
            .map_err(|err| OutboxStoreError::query(format!("create template: {err:?}")))?;
        migrate(&cluster.connection().database_url(&name))?;
    }
    Ok(name)
}

fn migrate(url: &str) -> Result<(), OutboxStoreError> {
    let mut conn = PgConnection::establish(url)
        .map_err(|err| OutboxStoreError::connection(format!("{err:?}")))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|err| OutboxStoreError::query(format!("migration: {err:?}")))?;
    Ok(())
}

/// Clone a migrated database for one test; dropped with the returned value.
pub fn provision_template_database(
    cluster: &ClusterHandle,
) -> Result<TemporaryDatabase, OutboxStoreError> {
    let mut last_error = None;
    for attempt in 1..=PROVISION_RETRIES {
        let provisioned = ensure_template(cluster).and_then(|template| {
            cluster
                .temporary_database_from_template(
                    format!("test_{}", Uuid::new_v4()).as_str(),
                    template.as_str(),
                )
                .map_err(|err| OutboxStoreError::query(format!("clone template: {err:?}")))
        });
        match provisioned {
            Ok(database) => return Ok(database),
            Err(error) => {
                last_error = Some(OutboxStoreError::query(format!(
                    "attempt {attempt}/{PROVISION_RETRIES}: {error}"
                )));
            }
        }
        if attempt < PROVISION_RETRIES {
            std::thread::sleep(RETRY_DELAY);
        }
    }
    Err(last_error
        .unwrap_or_else(|| OutboxStoreError::query("clone template: exhausted retries")))
}
