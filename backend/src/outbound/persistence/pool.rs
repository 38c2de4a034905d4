//! Connection pool for the outbox tables.
//!
//! Two kinds of borrower share the pool: relay store calls, which hold a
//! connection for one statement or one claim transaction, and units of work,
//! which hold one for the lifetime of a business transaction via
//! [`DbPool::get_owned`]. A connection handed back with a transaction still
//! open is discarded by the pool, so PostgreSQL rolls that transaction back.
//!
//! Checkouts time out quickly: a relay that cannot get a connection skips the
//! cycle and polls again rather than stalling behind a saturated pool.

use std::time::Duration;

use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use tracing::debug;

const DEFAULT_MAX_SIZE: u32 = 8;
const DEFAULT_MIN_IDLE: u32 = 1;
const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while building or borrowing from the pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The configuration cannot describe a usable pool.
    #[error("invalid pool configuration: {message}")]
    Config { message: String },

    /// No connection became available before the checkout timeout.
    #[error("failed to get connection from pool: {message}")]
    Checkout { message: String },

    /// The pool could not be created.
    #[error("failed to build connection pool: {message}")]
    Build { message: String },
}

impl PoolError {
    /// Create a configuration error with the given message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a checkout error with the given message.
    pub fn checkout(message: impl Into<String>) -> Self {
        Self::Checkout {
            message: message.into(),
        }
    }

    /// Create a build error with the given message.
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }
}

/// Sizing and timeouts for [`DbPool`].
///
/// ```ignore
/// let config = PoolConfig::new("postgres://relay@db/orders")
///     .with_max_size(16)
///     .with_checkout_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    database_url: String,
    max_size: u32,
    min_idle: Option<u32>,
    checkout_timeout: Duration,
}

impl PoolConfig {
    /// Defaults suit one relay plus a handful of concurrent units of work:
    /// eight connections, one kept idle, five second checkouts.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_size: DEFAULT_MAX_SIZE,
            min_idle: Some(DEFAULT_MIN_IDLE),
            checkout_timeout: DEFAULT_CHECKOUT_TIMEOUT,
        }
    }

    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    /// Connections kept open while idle; `None` lets the pool drain fully.
    pub fn with_min_idle(mut self, min_idle: Option<u32>) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn with_checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// The database URL with any password masked, for logs.
    pub fn redacted_url(&self) -> String {
        redact_password(&self.database_url)
    }

    /// Check the configuration before any connection is attempted.
    ///
    /// # Errors
    ///
    /// [`PoolError::Config`] when the URL is not a PostgreSQL URL, the pool
    /// has no capacity, more idle connections are requested than the pool
    /// may hold, or the checkout timeout is zero.
    pub fn validate(&self) -> Result<(), PoolError> {
        let scheme = self.database_url.split_once("://").map(|(scheme, _)| scheme);
        if !matches!(scheme, Some("postgres" | "postgresql")) {
            return Err(PoolError::config(format!(
                "expected a postgres:// url, got {}",
                self.redacted_url()
            )));
        }
        if self.max_size == 0 {
            return Err(PoolError::config("max_size must be at least 1"));
        }
        match self.min_idle {
            Some(min_idle) if min_idle > self.max_size => {
                return Err(PoolError::config(format!(
                    "min_idle {min_idle} exceeds max_size {}",
                    self.max_size
                )));
            }
            _ => {}
        }
        if self.checkout_timeout.is_zero() {
            return Err(PoolError::config("checkout timeout must be non-zero"));
        }
        Ok(())
    }
}

fn redact_password(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_owned();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let (authority, path) = rest.split_at(authority_end);
    let Some((userinfo, host)) = authority.rsplit_once('@') else {
        return url.to_owned();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}{path}"),
        None => url.to_owned(),
    }
}

/// Async connection pool for PostgreSQL via Diesel.
#[derive(Clone)]
pub struct DbPool {
    inner: Pool<AsyncPgConnection>,
}

impl std::fmt::Debug for DbPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("DbPool")
            .field("connections", &state.connections)
            .field("idle", &state.idle_connections)
            .finish()
    }
}

impl DbPool {
    /// Validate `config` and build the pool.
    ///
    /// # Errors
    ///
    /// [`PoolError::Config`] from [`PoolConfig::validate`], or
    /// [`PoolError::Build`] when the initial idle connections cannot be
    /// opened.
    pub async fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database_url);

        let inner = Pool::builder()
            .max_size(config.max_size)
            .min_idle(config.min_idle)
            .connection_timeout(config.checkout_timeout)
            .build(manager)
            .await
            .map_err(|err| PoolError::build(err.to_string()))?;

        debug!(
            url = %config.redacted_url(),
            max_size = config.max_size,
            min_idle = ?config.min_idle,
            "outbox connection pool ready"
        );
        Ok(Self { inner })
    }

    /// Borrow a connection for a single store operation.
    ///
    /// # Errors
    ///
    /// [`PoolError::Checkout`] when the checkout timeout elapses.
    pub async fn get(&self) -> Result<PooledConnection<'_, AsyncPgConnection>, PoolError> {
        self.inner.get().await.map_err(|err| {
            debug!(error = %err, "outbox connection checkout failed");
            PoolError::checkout(err.to_string())
        })
    }

    /// Borrow a connection that can outlive `&self`, for units of work.
    ///
    /// # Errors
    ///
    /// As [`DbPool::get`].
    pub async fn get_owned(
        &self,
    ) -> Result<PooledConnection<'static, AsyncPgConnection>, PoolError> {
        self.inner.get_owned().await.map_err(|err| {
            debug!(error = %err, "outbox connection checkout failed");
            PoolError::checkout(err.to_string())
        })
    }
}
