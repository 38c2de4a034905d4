//! Event publisher adapters used by the outbox relay.

mod logging;
mod webhook;

pub use logging::TracingPublisher;
pub use webhook::{WebhookEnvelope, WebhookPublisher};
