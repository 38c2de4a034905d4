//! Idempotency guard configuration.

use std::str::FromStr;
use std::time::Duration;

/// How the guard handles concurrent first requests for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaimMode {
    /// Look up, execute, then cache. Two concurrent first requests may both
    /// execute; the later write wins.
    #[default]
    CacheOnly,
    /// Atomically claim the key before executing. Concurrent duplicates wait
    /// for the winner's response or fail with `InProgress`.
    ClaimBeforeExecute,
}

/// Error returned when parsing an unknown [`ClaimMode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown idempotency claim mode `{0}`; expected `cache-only` or `claim`")]
pub struct ParseClaimModeError(String);

impl FromStr for ClaimMode {
    type Err = ParseClaimModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cache-only" | "cache_only" => Ok(Self::CacheOnly),
            "claim" | "claim-before-execute" | "claim_before_execute" => {
                Ok(Self::ClaimBeforeExecute)
            }
            other => Err(ParseClaimModeError(other.to_owned())),
        }
    }
}

/// Configuration for the idempotency guard.
///
/// # Example
///
/// ```
/// # use backbone::domain::idempotency::IdempotencyConfig;
/// # use std::time::Duration;
/// let config = IdempotencyConfig::default();
/// assert_eq!(config.ttl(), Duration::from_secs(3600));
///
/// let clamped = IdempotencyConfig::with_ttl(Duration::ZERO);
/// assert_eq!(clamped.ttl(), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyConfig {
    ttl: Duration,
    claim_mode: ClaimMode,
    claim_ttl: Duration,
    claim_poll_attempts: u32,
    claim_poll_interval: Duration,
}

impl IdempotencyConfig {
    const DEFAULT_TTL: Duration = Duration::from_secs(3600);
    const MIN_TTL: Duration = Duration::from_secs(1);
    const MAX_TTL: Duration = Duration::from_secs(30 * 24 * 3600);
    const DEFAULT_CLAIM_TTL: Duration = Duration::from_secs(30);
    const DEFAULT_CLAIM_POLL_ATTEMPTS: u32 = 20;
    const DEFAULT_CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(25);

    /// Default configuration with `ttl`, clamped to one second through
    /// thirty days.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: ttl.clamp(Self::MIN_TTL, Self::MAX_TTL),
            ..Self::default()
        }
    }

    /// Select the concurrency mode.
    #[must_use]
    pub fn with_claim_mode(mut self, claim_mode: ClaimMode) -> Self {
        self.claim_mode = claim_mode;
        self
    }

    /// Tune how a losing claimant waits for the winner's response.
    ///
    /// `attempts` is raised to at least one.
    #[must_use]
    pub fn with_claim_polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.claim_poll_attempts = attempts.max(1);
        self.claim_poll_interval = interval;
        self
    }

    /// Lifetime of a pending claim, after which a crashed claimant's key is
    /// free again. Clamped like the record TTL.
    #[must_use]
    pub fn with_claim_ttl(mut self, claim_ttl: Duration) -> Self {
        self.claim_ttl = claim_ttl.clamp(Self::MIN_TTL, Self::MAX_TTL);
        self
    }

    /// Lifetime of cached responses.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Concurrency mode.
    pub fn claim_mode(&self) -> ClaimMode {
        self.claim_mode
    }

    /// Lifetime of a pending claim.
    pub fn claim_ttl(&self) -> Duration {
        self.claim_ttl
    }

    /// Number of lookups a losing claimant makes before giving up.
    pub fn claim_poll_attempts(&self) -> u32 {
        self.claim_poll_attempts
    }

    /// Delay between those lookups.
    pub fn claim_poll_interval(&self) -> Duration {
        self.claim_poll_interval
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl: Self::DEFAULT_TTL,
            claim_mode: ClaimMode::default(),
            claim_ttl: Self::DEFAULT_CLAIM_TTL,
            claim_poll_attempts: Self::DEFAULT_CLAIM_POLL_ATTEMPTS,
            claim_poll_interval: Self::DEFAULT_CLAIM_POLL_INTERVAL,
        }
    }
}
