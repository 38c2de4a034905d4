//! Retry delay policy for failed publishes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Jitter applied to the exponential base delay.
pub trait BackoffJitter: Send + Sync {
    /// Return the delay to use for `attempt` given its exponential `base`.
    ///
    /// ```rust
    /// use backbone::domain::outbox_relay::BackoffJitter;
    /// use chrono::{TimeZone, Utc};
    /// use std::time::Duration;
    /// struct Fixed;
    /// impl BackoffJitter for Fixed {
    ///     fn jittered_delay(&self, base: Duration, _attempt: u32, _now: chrono::DateTime<Utc>) -> Duration {
    ///         base / 2
    ///     }
    /// }
    /// let now = Utc.with_ymd_and_hms(2026, 2, 26, 12, 0, 0).single().expect("valid time");
    /// assert_eq!(Fixed.jittered_delay(Duration::from_secs(4), 3, now), Duration::from_secs(2));
    /// ```
    fn jittered_delay(&self, base: Duration, attempt: u32, now: DateTime<Utc>) -> Duration;
}

/// Exponential base delay for the `attempt`-th failure (1-based):
/// `initial * 2^(attempt - 1)`, capped at `max`.
pub fn retry_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exponent = 2_u64.saturating_pow(attempt.saturating_sub(1));
    let base_ms = u64::try_from(initial.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(exponent).min(max_ms))
}

/// Random jitter shaving up to a quarter off the base delay, so relays that
/// failed together spread their retries without exceeding the cap.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl BackoffJitter for RandomJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32, _now: DateTime<Utc>) -> Duration {
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let max_cut = base_ms / 4;
        if max_cut == 0 {
            return base;
        }
        let cut = rand::thread_rng().gen_range(0..=max_cut);
        Duration::from_millis(base_ms - cut)
    }
}
