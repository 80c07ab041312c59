//! Ticket API server
//!
//! Serves the configured ticket store to remote doors and runs server-side scans.
//!
//! # Usage
//!
//! ```bash
//! GATECHECK_STORE=memory GATECHECK_SEED_FILE=tickets.json cargo run --bin server
//! ```

use anyhow::Context;
use checkpoint::metrics::register_checkpoint_metrics;
use checkpoint::server::{build_router, AppState};
use checkpoint::{store, Config, ValidationEngine};
use gatecheck_core::environment::SystemClock;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,checkpoint=debug,sqlx=warn,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Invalid configuration")?;
    tracing::info!(
        backend = ?config.store.backend,
        bind = %config.server.bind_address(),
        auth = config.server.api_token.is_some(),
        "Configuration loaded"
    );

    let prometheus = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )
        .context("Invalid histogram buckets")?
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    register_checkpoint_metrics();

    let ticket_store = store::connect(&config.store, Arc::new(SystemClock))
        .await
        .context("Failed to initialise ticket store")?;
    let engine = ValidationEngine::from_config(ticket_store, &config.validation);

    let mut state = AppState::new(engine).with_metrics(prometheus);
    if let Some(token) = config.server.api_token.as_deref() {
        state = state.with_api_token(token);
    }

    let listener = tokio::net::TcpListener::bind(config.server.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_address()))?;
    tracing::info!(addr = %config.server.bind_address(), "Ticket API listening");

    let stop = Arc::new(Notify::new());
    let server = axum::serve(listener, build_router(state))
        .with_graceful_shutdown({
            let stop = Arc::clone(&stop);
            async move { stop.notified().await }
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result.context("Server error")?,
        () = shutdown_signal() => {
            tracing::info!("Shutting down gracefully...");
            stop.notify_one();
            let grace = Duration::from_secs(config.server.shutdown_timeout);
            match tokio::time::timeout(grace, server).await {
                Ok(result) => result.context("Server error during shutdown")?,
                Err(_) => tracing::warn!(?grace, "Graceful shutdown timed out, dropping open connections"),
            }
        },
    }

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(error) => {
                tracing::error!(%error, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
