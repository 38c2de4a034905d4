//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod event_publisher;
mod idempotency_cache;
mod outbox_store;
mod unit_of_work;

#[cfg(test)]
pub use event_publisher::MockEventPublisher;
pub use event_publisher::{EventPublisher, PublishError};
#[cfg(test)]
pub use idempotency_cache::MockIdempotencyCache;
pub use idempotency_cache::{IdempotencyCache, IdempotencyCacheError};
#[cfg(test)]
pub use outbox_store::MockOutboxStore;
pub use outbox_store::{OutboxStore, OutboxStoreError};
#[cfg(test)]
pub use unit_of_work::MockUnitOfWorkFactory;
pub use unit_of_work::{UnitOfWork, UnitOfWorkFactory};
