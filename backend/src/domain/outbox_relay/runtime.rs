//! Port and runtime dependency bundles for the outbox relay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::ports::{EventPublisher, OutboxStore};

use super::{BackoffJitter, RandomJitter};

/// Ports the relay drains and publishes through.
pub struct OutboxRelayPorts {
    /// Outbox persistence.
    pub store: Arc<dyn OutboxStore>,
    /// Destination adapter.
    pub publisher: Arc<dyn EventPublisher>,
}

impl OutboxRelayPorts {
    /// Bundle the relay's ports.
    pub fn new(store: Arc<dyn OutboxStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }
}

/// Idle wait between polls.
#[async_trait]
pub trait RelaySleeper: Send + Sync {
    /// Suspend execution for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Tokio timer sleeper.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl RelaySleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Runtime helpers used by the polling loop and retry policy.
pub struct OutboxRelayRuntime {
    /// Idle sleep implementation.
    pub sleeper: Arc<dyn RelaySleeper>,
    /// Jitter strategy for retry delays.
    pub jitter: Arc<dyn BackoffJitter>,
}

impl Default for OutboxRelayRuntime {
    fn default() -> Self {
        Self {
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(RandomJitter),
        }
    }
}
