//! Catch-up worker entry point.

use std::error::Error;

use catchup_worker::config::Config;
use catchup_worker::worker;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        listener = %config.listener_name,
        event_types = ?config.event_types,
        "Starting catch-up worker"
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    worker::run(config, cancel).await?;
    tracing::info!("Catch-up worker stopped");
    Ok(())
}
