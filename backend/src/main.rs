//! Outbox relay entry-point: loads settings, prepares the database, and
//! drains the outbox until interrupted.

use std::ffi::OsString;
use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr, eyre};
use mockable::DefaultClock;
use ortho_config::OrthoConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use backbone::BackboneSettings;
use backbone::domain::outbox_relay::{OutboxRelay, OutboxRelayPorts};
use backbone::domain::ports::EventPublisher;
use backbone::outbound::persistence::{DbPool, DieselOutboxStore, run_pending_migrations};
use backbone::outbound::publisher::{TracingPublisher, WebhookPublisher};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings = BackboneSettings::load_from_iter(std::env::args_os().collect::<Vec<OsString>>())
        .wrap_err("failed to load settings")?;
    run(settings).await
}

async fn run(settings: BackboneSettings) -> Result<()> {
    let database_url = settings
        .database_url()
        .ok_or_else(|| eyre!("BACKBONE_DATABASE_URL is required"))?;
    if settings.run_migrations() {
        run_pending_migrations(database_url)
            .await
            .wrap_err("failed to migrate the outbox schema")?;
    }

    let pool_config = settings
        .pool_config()
        .ok_or_else(|| eyre!("BACKBONE_DATABASE_URL is required"))?;
    let pool = DbPool::new(pool_config)
        .await
        .wrap_err("failed to build the database pool")?;
    let store = DieselOutboxStore::new(pool);
    let publisher = build_publisher(&settings)?;

    let relay_id = settings.relay_id();
    let relay = OutboxRelay::new(
        OutboxRelayPorts::new(Arc::new(store), publisher),
        Arc::new(DefaultClock),
        settings.relay_config(),
        relay_id,
    );
    info!(relay_id = relay.relay_id(), config = ?relay.config(), "relay configured");

    let cancel = CancellationToken::new();
    let worker = tokio::spawn({
        let cancel = cancel.clone();
        async move { relay.run(cancel).await }
    });

    tokio::signal::ctrl_c()
        .await
        .wrap_err("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    cancel.cancel();
    worker.await.wrap_err("relay task failed")?;
    Ok(())
}

fn build_publisher(settings: &BackboneSettings) -> Result<Arc<dyn EventPublisher>> {
    match settings.webhook_endpoint()? {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "publishing events to webhook");
            let publisher = WebhookPublisher::new(endpoint, settings.webhook_timeout())
                .wrap_err("failed to build webhook client")?;
            Ok(Arc::new(publisher))
        }
        None => {
            warn!("no webhook configured; events will only be logged");
            Ok(Arc::new(TracingPublisher))
        }
    }
}
