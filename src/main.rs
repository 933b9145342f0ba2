use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use reservd::api::{self, AppState};
use reservd::config::Config;
use reservd::jobs::{self, JobQueue};
use reservd::notify::{Notifier, NotifyHub};
use reservd::reaper;
use reservd::tenant::TenantManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    reservd::observability::init(config.metrics_port);

    std::fs::create_dir_all(&config.data_dir)?;

    let shutdown = CancellationToken::new();
    let (queue, job_rx) = JobQueue::new(config.job_queue_capacity);
    let tenants = Arc::new(TenantManager::new(
        config.data_dir.clone(),
        config.compact_threshold,
        queue.clone(),
        shutdown.clone(),
    ));
    tenants.load_existing()?;

    let notifier: Arc<dyn Notifier> = Arc::new(NotifyHub::new());
    let worker = tokio::spawn(jobs::run_worker(
        job_rx,
        queue.clone(),
        tenants.clone(),
        notifier,
        config.job_concurrency,
        shutdown.clone(),
    ));
    let sweeper = tokio::spawn(reaper::run_reaper(
        tenants.clone(),
        queue,
        config.sweep_interval,
        shutdown.clone(),
    ));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("reservd listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  businesses: {}", tenants.len());
    info!("  sweep_interval: {:?}", config.sweep_interval);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let app = api::router(AppState { tenants });
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Let background tasks see the cancellation before exit.
    shutdown.cancel();
    let drain = async {
        let _ = worker.await;
        let _ = sweeper.await;
    };
    if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
        tracing::warn!("background tasks did not stop within 10s");
    }

    info!("reservd stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM and cancels `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {e}");
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
    info!("shutdown signal received, draining requests");
    shutdown.cancel();
}
