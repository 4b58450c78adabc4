use std::{net::SocketAddr, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use daemon::api::{self, AppState};
use daemon::config::Config;
use daemon::db::{DbLocation, MetadataStore};
use daemon::generation::poll::PollPolicy;
use daemon::generation::{GenerationSettings, Orchestrator};
use daemon::provider::GoogleVideoProvider;
use daemon::storage::S3BlobStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Arc::new(MetadataStore::new(DbLocation::File(config.database_path.clone())));
    // The store reconnects lazily, so a failed first connect is not fatal.
    if let Err(e) = db.connect() {
        warn!(error = %e, path = ?config.database_path, "Metadata store unavailable at startup");
    }

    let blobs = Arc::new(S3BlobStore::new(&config.storage).await);
    info!(bucket = %config.storage.bucket, region = %config.storage.region, "Blob storage configured");

    let provider = Arc::new(GoogleVideoProvider::new(config.provider.clone()));
    info!(model = %config.provider.model, "Video provider configured");

    let poll = match config.poll_max_attempts {
        Some(max) => PollPolicy::bounded(config.poll_interval, max),
        None => PollPolicy::unbounded(config.poll_interval),
    };
    std::fs::create_dir_all(&config.staging_dir)?;
    let orchestrator = Arc::new(Orchestrator::new(
        provider,
        blobs.clone(),
        GenerationSettings::new(poll, config.staging_dir.clone()),
    ));

    let state = AppState {
        db: db.clone(),
        blobs,
        orchestrator,
        environment: config.environment.clone(),
    };
    let app = api::app(state, &config.cors_origins);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(%addr, environment = %config.environment, "Starting reeld");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.disconnect();
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
