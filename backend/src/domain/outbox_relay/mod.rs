//! Background relay draining the transactional outbox.
//!
//! Each cycle claims a bounded batch of due messages under a lease, publishes
//! them one by one, and records the outcome: processed on success, or a
//! retry with exponential backoff on failure. A message whose retry count
//! reaches `max_retries` is dead-lettered and left for operators.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use mockable::Clock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::outbox::{OutboxMessage, RelayLease, RetryFailure};
use crate::domain::ports::{EventPublisher, OutboxStore, OutboxStoreError};

mod backoff;
mod runtime;

pub use backoff::{BackoffJitter, RandomJitter, retry_delay};
pub use runtime::{OutboxRelayPorts, OutboxRelayRuntime, RelaySleeper, TokioSleeper};

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRelayConfig {
    /// Messages claimed per cycle. At least one.
    pub batch_size: usize,
    /// Idle wait between cycles that did not fill a batch.
    pub poll_interval: Duration,
    /// Failures after which a message is dead-lettered.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Retry delay cap.
    pub max_backoff: Duration,
    /// How long a claimed batch stays invisible to other relays.
    pub lease_duration: Duration,
}

impl Default for OutboxRelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            poll_interval: Duration::from_secs(1),
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            lease_duration: Duration::from_secs(30),
        }
    }
}

/// Outcome counts for one relay cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayCycleReport {
    /// Messages claimed.
    pub fetched: usize,
    /// Messages published and marked processed.
    pub published: usize,
    /// Messages that failed and were scheduled for retry.
    pub retried: usize,
    /// Messages that failed for the last time.
    pub dead_lettered: usize,
}

impl RelayCycleReport {
    /// Whether the cycle found nothing to do.
    pub fn is_idle(&self) -> bool {
        self.fetched == 0
    }

    fn settled(&self) -> usize {
        self.published + self.retried + self.dead_lettered
    }
}

/// Errors that abort a relay cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// The store failed while claiming or listing messages.
    #[error("outbox store failed: {0}")]
    Store(#[from] OutboxStoreError),
}

/// Drains the outbox through an [`EventPublisher`].
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn RelaySleeper>,
    jitter: Arc<dyn BackoffJitter>,
    config: OutboxRelayConfig,
    relay_id: String,
}

impl OutboxRelay {
    /// Build a relay with the default runtime.
    pub fn new(
        ports: OutboxRelayPorts,
        clock: Arc<dyn Clock>,
        config: OutboxRelayConfig,
        relay_id: impl Into<String>,
    ) -> Self {
        Self::with_runtime(ports, clock, OutboxRelayRuntime::default(), config, relay_id)
    }

    /// Build a relay with injected runtime helpers.
    pub fn with_runtime(
        ports: OutboxRelayPorts,
        clock: Arc<dyn Clock>,
        runtime: OutboxRelayRuntime,
        config: OutboxRelayConfig,
        relay_id: impl Into<String>,
    ) -> Self {
        let config = OutboxRelayConfig {
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries.max(1),
            ..config
        };
        Self {
            store: ports.store,
            publisher: ports.publisher,
            clock,
            sleeper: runtime.sleeper,
            jitter: runtime.jitter,
            config,
            relay_id: relay_id.into(),
        }
    }

    /// Effective configuration.
    pub fn config(&self) -> &OutboxRelayConfig {
        &self.config
    }

    /// Lease owner name of this relay instance.
    pub fn relay_id(&self) -> &str {
        &self.relay_id
    }

    /// Claim and deliver one batch.
    ///
    /// Messages are delivered sequentially; `cancel` is checked between
    /// messages, and messages left undelivered return to the pool when the
    /// lease lapses. Failures recording a single outcome are logged and the
    /// cycle moves on.
    ///
    /// # Errors
    ///
    /// [`RelayError::Store`] when the batch cannot be claimed.
    pub async fn run_cycle(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RelayCycleReport, RelayError> {
        let lease = RelayLease::new(
            self.relay_id.as_str(),
            self.clock.utc(),
            self.config.lease_duration,
        );
        let batch = self
            .store
            .fetch_unprocessed(self.config.batch_size, self.config.max_retries, &lease)
            .await?;

        let mut report = RelayCycleReport {
            fetched: batch.len(),
            ..RelayCycleReport::default()
        };
        for message in &batch {
            if cancel.is_cancelled() {
                info!(
                    relay_id = %self.relay_id,
                    remaining = report.fetched - report.settled(),
                    "relay cancelled mid-batch"
                );
                break;
            }
            self.deliver(message, &mut report).await;
        }

        if !report.is_idle() {
            debug!(
                relay_id = %self.relay_id,
                fetched = report.fetched,
                published = report.published,
                retried = report.retried,
                dead_lettered = report.dead_lettered,
                "relay cycle complete"
            );
        }
        Ok(report)
    }

    /// Run cycles until `cancel` fires.
    ///
    /// A cycle that fills its batch is followed immediately by the next;
    /// otherwise the relay waits `poll_interval`. An in-flight publish always
    /// completes and is recorded before the loop exits.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(relay_id = %self.relay_id, "outbox relay starting");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let drained_full_batch = match self.run_cycle(&cancel).await {
                Ok(report) => {
                    report.fetched >= self.config.batch_size && report.settled() > 0
                }
                Err(err) => {
                    error!(relay_id = %self.relay_id, error = %err, "outbox relay cycle failed");
                    false
                }
            };
            if drained_full_batch {
                continue;
            }

            tokio::select! {
                () = self.sleeper.sleep(self.config.poll_interval) => {}
                () = cancel.cancelled() => break,
            }
        }

        info!(relay_id = %self.relay_id, "outbox relay stopped");
    }

    /// Dead letters, oldest first.
    ///
    /// # Errors
    ///
    /// [`RelayError::Store`] when the store query fails.
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<OutboxMessage>, RelayError> {
        Ok(self
            .store
            .fetch_failed(self.config.max_retries, limit)
            .await?)
    }

    async fn deliver(&self, message: &OutboxMessage, report: &mut RelayCycleReport) {
        match self.publisher.publish(message).await {
            Ok(()) => match self.store.mark_processed(message.id, self.clock.utc()).await {
                Ok(()) => {
                    report.published += 1;
                    debug!(message_id = %message.id, event_type = %message.event_type, "outbox message published");
                }
                Err(err) => warn!(
                    message_id = %message.id,
                    error = %err,
                    "published outbox message could not be marked processed; it will be redelivered"
                ),
            },
            Err(publish_error) => {
                let failure = self.retry_failure(message, publish_error.to_string());
                match self.store.increment_retry(message.id, &failure).await {
                    Ok(retry_count) if retry_count >= self.config.max_retries => {
                        report.dead_lettered += 1;
                        error!(
                            message_id = %message.id,
                            event_type = %message.event_type,
                            retry_count,
                            error = %publish_error,
                            "outbox message dead-lettered"
                        );
                    }
                    Ok(retry_count) => {
                        report.retried += 1;
                        warn!(
                            message_id = %message.id,
                            retry_count,
                            next_attempt_at = %failure.next_attempt_at,
                            error_kind = publish_error.kind(),
                            error = %publish_error,
                            "outbox publish failed; retry scheduled"
                        );
                    }
                    Err(err) => warn!(
                        message_id = %message.id,
                        error = %err,
                        "failed to record outbox publish failure"
                    ),
                }
            }
        }
    }

    fn retry_failure(&self, message: &OutboxMessage, reason: String) -> RetryFailure {
        let attempt = message.retry_count.saturating_add(1);
        let now = self.clock.utc();
        let base = retry_delay(attempt, self.config.initial_backoff, self.config.max_backoff);
        let delay = self.jitter.jittered_delay(base, attempt, now);
        RetryFailure {
            reason,
            next_attempt_at: add_delay(now, delay),
        }
    }
}

fn add_delay(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
