// functions/src/main.rs

use anyhow::Context;
use resize_worker::config::Config;
use resize_worker::health;
use resize_worker::listener::{Listener, ListenerSettings};
use resize_worker::pipeline::Pipeline;
use resize_worker::queue::ServiceBusSource;
use resize_worker::store::BlobStore;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load();
    config.validate().context("PROJECT_ID or SUBSCRIPTION_NAME is not set")?;

    if config.destination_bucket.is_none() {
        warn!("DESTINATION_BUCKET is not set, uploads will fail");
    }
    info!(?config, "configuration loaded");

    // health server runs on its own task for the life of the process
    let (addr, server) = health::bind(([0, 0, 0, 0], config.http_port()?).into())
        .context("failed to start HTTP server")?;
    info!(%addr, "HTTP server listening");
    tokio::spawn(server);

    let project_id = config.project_id()?;
    let subscription_id = config.subscription_id()?;
    info!(project_id, subscription_id, "starting listener");

    let source = ServiceBusSource::new(project_id, subscription_id, &config.queue_credentials()?)
        .context("failed to create service bus client")?;
    let store = BlobStore::new(&config.store_credentials()?);

    let pipeline = Pipeline::new(store, config.destination_bucket());
    let listener = Listener::new(source, pipeline, ListenerSettings::default())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    listener.run(shutdown_rx).await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
