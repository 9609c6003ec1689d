//! Blobferry Server - Main entry point

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use blobferry_common::logging::{init_logging, LogConfig};
use tokio::signal;
use tracing::info;

use blobferry_server::{
    api::{self, AppState},
    config::Config,
    fsops, reaper, recovery,
    session::SessionState,
    storage::{BlobStore, Storage},
    watcher,
    work::WorkQueue,
    worker,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("blobferry-server".to_string())
        .filter_directives("blobferry_server=debug,tower_http=info".to_string())
        .build();
    let log_config = LogConfig::from_env().unwrap_or(log_config);
    init_logging(&log_config)?;

    info!("Starting blobferry server");

    // Load configuration; missing required settings abort here.
    let config = Arc::new(Config::load()?);
    info!(
        incoming = %config.paths.nfs_incoming_dir.display(),
        processing = %config.paths.nfs_processing_root.display(),
        staging = %config.paths.local_staging_root.display(),
        "Configuration loaded"
    );

    // Bootstrap the three filesystem roots.
    fsops::create_dir_all(config.paths.nfs_incoming_dir.clone())
        .await
        .context("create incoming root")?;
    fsops::create_dir_all(config.paths.nfs_processing_root.clone())
        .await
        .context("create processing root")?;
    std::fs::create_dir_all(&config.paths.local_staging_root)
        .context("create staging root")?;

    // Validate credentials and container before accepting any work.
    let storage: Arc<dyn BlobStore> = Arc::new(Storage::new(&config.azure).await?);
    info!("Azure storage client initialized");

    let session = Arc::new(SessionState::default());
    let queue = WorkQueue::new(config.pipeline.max_queue_size);

    // Re-enqueue whatever the previous run left unfinished.
    let recovered = recovery::recover(&queue, &session, &config).await?;
    if recovered > 0 {
        info!(recovered, "Recovery enqueued unfinished files");
    }

    // Background tasks: reaper, worker pool, watcher.
    let reaper_handle = tokio::spawn(reaper::reaper_loop(config.clone()));
    let worker_handles = worker::spawn_workers(&queue, storage, session.clone(), config.clone());
    let watcher_handle = tokio::spawn(watcher::watcher_loop(
        queue.clone(),
        session.clone(),
        config.clone(),
    ));

    let state = AppState {
        session,
        config: config.clone(),
        ready: Arc::new(AtomicBool::new(true)),
    };
    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("parse bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("Server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cancel background tasks. Blocking NFS calls in flight are abandoned,
    // never awaited, so a wedged mount cannot stall shutdown.
    watcher_handle.abort();
    for handle in &worker_handles {
        handle.abort();
    }
    reaper_handle.abort();

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
