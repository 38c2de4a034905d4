//! Relay doubles: a publisher with scripted outcomes and a no-op jitter.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::outbox::{OutboxMessage, OutboxMessageId};
use crate::domain::outbox_relay::BackoffJitter;
use crate::domain::ports::{EventPublisher, PublishError};

/// Publisher returning queued outcomes in order, then succeeding.
#[derive(Debug, Default)]
pub struct ScriptedPublisher {
    outcomes: Mutex<VecDeque<Result<(), PublishError>>>,
    attempts: Mutex<Vec<OutboxMessageId>>,
}

impl ScriptedPublisher {
    /// Publisher that accepts everything.
    pub fn accepting() -> Self {
        Self::default()
    }

    /// Publisher replaying `outcomes` for successive calls.
    pub fn with_outcomes(outcomes: impl IntoIterator<Item = Result<(), PublishError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Publisher failing the next `count` calls as unavailable.
    pub fn failing(count: usize) -> Self {
        Self::with_outcomes(
            std::iter::repeat_with(|| Err(PublishError::unavailable("downstream offline")))
                .take(count),
        )
    }

    /// Ids of every message passed to `publish`, in call order.
    pub fn attempts(&self) -> Vec<OutboxMessageId> {
        lock(&self.attempts).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl EventPublisher for ScriptedPublisher {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError> {
        lock(&self.attempts).push(message.id);
        lock(&self.outcomes).pop_front().unwrap_or(Ok(()))
    }
}

/// Jitter returning the base delay unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl BackoffJitter for NoJitter {
    fn jittered_delay(&self, base: Duration, _attempt: u32, _now: DateTime<Utc>) -> Duration {
        base
    }
}
