//! Process configuration loaded via OrthoConfig.
//!
//! Values layer CLI flags over `BACKBONE_*` environment variables over the
//! optional config file. Every field is optional; accessors apply defaults
//! so the raw struct stays a faithful record of what was supplied.

use std::time::Duration;

use ortho_config::OrthoConfig;
use reqwest::Url;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::idempotency::{ClaimMode, IdempotencyConfig, ParseClaimModeError};
use crate::domain::outbox_relay::OutboxRelayConfig;
use crate::outbound::persistence::PoolConfig;

const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REDIS_POOL_SIZE: u32 = 8;

/// Settings that cannot be turned into component configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// `idempotency_claim_mode` names no known mode.
    #[error(transparent)]
    ClaimMode(#[from] ParseClaimModeError),
    /// `webhook_url` is not an absolute URL.
    #[error("invalid webhook url {url:?}: {message}")]
    WebhookUrl { url: String, message: String },
}

/// Configuration for the relay binary and its adapters.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "BACKBONE")]
pub struct BackboneSettings {
    /// PostgreSQL connection string for the outbox.
    pub database_url: Option<String>,
    /// Upper bound on pooled database connections.
    pub database_max_connections: Option<u32>,
    /// Apply embedded migrations at startup; on unless set to `false`.
    pub run_migrations: Option<bool>,
    /// Redis connection string for the idempotency cache.
    pub redis_url: Option<String>,
    /// Endpoint receiving published events. Without it events are only
    /// logged.
    pub webhook_url: Option<String>,
    pub webhook_timeout_ms: Option<u64>,
    /// Lease owner name; random per process when unset.
    pub relay_id: Option<String>,
    pub relay_batch_size: Option<usize>,
    pub relay_poll_interval_ms: Option<u64>,
    pub relay_max_retries: Option<u32>,
    pub relay_initial_backoff_ms: Option<u64>,
    pub relay_max_backoff_ms: Option<u64>,
    pub relay_lease_secs: Option<u64>,
    /// Lifetime of cached responses, clamped to between one second and
    /// thirty days.
    pub idempotency_ttl_secs: Option<u64>,
    /// `cache-only` (default) or `claim-before-execute`.
    pub idempotency_claim_mode: Option<String>,
}

impl BackboneSettings {
    /// Return the configured database URL, if any.
    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref()
    }

    /// Whether to apply embedded migrations before relaying.
    pub fn run_migrations(&self) -> bool {
        self.run_migrations.unwrap_or(true)
    }

    /// Pool configuration for [`Self::database_url`].
    pub fn pool_config(&self) -> Option<PoolConfig> {
        let url = self.database_url()?;
        let config = PoolConfig::new(url);
        Some(match self.database_max_connections {
            Some(max_size) => config.with_max_size(max_size.max(1)),
            None => config,
        })
    }

    /// Return the configured Redis URL, if any.
    pub fn redis_url(&self) -> Option<&str> {
        self.redis_url.as_deref()
    }

    /// Redis pool size, sharing the database connection bound when set.
    pub fn redis_pool_size(&self) -> u32 {
        self.database_max_connections
            .unwrap_or(DEFAULT_REDIS_POOL_SIZE)
            .max(1)
    }

    /// Parsed webhook endpoint.
    ///
    /// # Errors
    ///
    /// [`SettingsError::WebhookUrl`] when the value does not parse.
    pub fn webhook_endpoint(&self) -> Result<Option<Url>, SettingsError> {
        self.webhook_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw).map_err(|err| SettingsError::WebhookUrl {
                    url: raw.to_owned(),
                    message: err.to_string(),
                })
            })
            .transpose()
    }

    /// Per-request webhook timeout.
    pub fn webhook_timeout(&self) -> Duration {
        self.webhook_timeout_ms
            .map_or(DEFAULT_WEBHOOK_TIMEOUT, Duration::from_millis)
    }

    /// Lease owner name for this process.
    pub fn relay_id(&self) -> String {
        self.relay_id
            .clone()
            .unwrap_or_else(|| format!("relay-{}", Uuid::new_v4().simple()))
    }

    /// Relay configuration with defaults filled in.
    pub fn relay_config(&self) -> OutboxRelayConfig {
        let defaults = OutboxRelayConfig::default();
        OutboxRelayConfig {
            batch_size: self.relay_batch_size.unwrap_or(defaults.batch_size),
            poll_interval: self
                .relay_poll_interval_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            max_retries: self.relay_max_retries.unwrap_or(defaults.max_retries),
            initial_backoff: self
                .relay_initial_backoff_ms
                .map_or(defaults.initial_backoff, Duration::from_millis),
            max_backoff: self
                .relay_max_backoff_ms
                .map_or(defaults.max_backoff, Duration::from_millis),
            lease_duration: self
                .relay_lease_secs
                .map_or(defaults.lease_duration, Duration::from_secs),
        }
    }

    /// Idempotency guard configuration.
    ///
    /// # Errors
    ///
    /// [`SettingsError::ClaimMode`] for an unknown claim mode.
    pub fn idempotency_config(&self) -> Result<IdempotencyConfig, SettingsError> {
        let claim_mode = match self.idempotency_claim_mode.as_deref() {
            Some(raw) => raw.parse::<ClaimMode>()?,
            None => ClaimMode::default(),
        };
        let config = match self.idempotency_ttl_secs {
            Some(secs) => IdempotencyConfig::with_ttl(Duration::from_secs(secs)),
            None => IdempotencyConfig::default(),
        };
        Ok(config.with_claim_mode(claim_mode))
    }
}
