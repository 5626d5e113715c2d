use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trainq_api::config::ServerConfig;
use trainq_api::router::build_app_router;
use trainq_api::state::AppState;
use trainq_worker::{JobDispatcher, LinearRegressionTrainer, Reaper};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "trainq_api=debug,trainq_worker=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        auth_enabled = config.password.is_some(),
        "Loaded server configuration",
    );

    // --- Database ---
    let pool = trainq_db::create_pool(&config.database_url)
        .await
        .context("Failed to open job store")?;
    tracing::info!("Database connection pool created");

    trainq_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    trainq_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Background services ---
    let cancel = CancellationToken::new();

    let dispatcher = JobDispatcher::new(pool.clone(), Arc::new(LinearRegressionTrainer))
        .with_poll_interval(config.dispatch_poll_interval)
        .with_progress_interval(config.progress_interval);
    let dispatcher_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { dispatcher.run(cancel).await }
    });

    let reaper = Reaper::new(pool.clone())
        .with_ttl(config.job_ttl)
        .with_interval(config.reaper_interval);
    let reaper_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { reaper.run(cancel).await }
    });

    tracing::info!("Background services started (dispatcher, reaper)");

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let host = config.host.parse::<IpAddr>().context("Invalid HOST address")?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // A job still training keeps the dispatcher busy until it returns;
    // don't wait on it forever.
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), reaper_handle).await;
    if tokio::time::timeout(Duration::from_secs(5), dispatcher_handle)
        .await
        .is_err()
    {
        tracing::warn!("Dispatcher still busy at shutdown, abandoning the running job");
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
