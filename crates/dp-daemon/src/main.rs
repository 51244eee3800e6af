//! devpulse daemon -- loads config, opens the store, binds the API/WS
//! listener, spawns the background tasks, and serves until shutdown.

use anyhow::{Context, Result};
use dp_core::config::Config;
use dp_bridge::AppState;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("failed to load config")?;

    if std::env::var("DEVPULSE_LOG_FORMAT").as_deref() == Ok("json") {
        dp_telemetry::logging::init_logging_json("dp-daemon", "info");
    } else {
        dp_telemetry::logging::init_logging("dp-daemon", "info");
    }

    info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "devpulse daemon starting");

    let state = AppState::new(config.clone())
        .await
        .context("failed to build application state")?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {bind_addr}"))?;
    let bound_addr = listener.local_addr()?;
    info!(addr = %bound_addr, "API/WS listener bound");

    let retention_handle = state.retention.clone().spawn();
    let alert_handle = state.spawn_alert_loop();

    let router = dp_bridge::router(state.clone());

    info!("devpulse daemon ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    retention_handle.abort();
    alert_handle.abort();
    info!("devpulse daemon stopped");

    Ok(())
}

/// Resolves once either ctrl-c or SIGTERM arrives, letting `axum::serve`
/// finish in-flight requests before the process exits.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl-c received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
