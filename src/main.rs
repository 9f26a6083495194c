use std::sync::Arc;

use courier_mesh::api;
use courier_mesh::app::{build_bus, build_store, spawn_workers};
use courier_mesh::config::{Config, LogFormat};
use courier_mesh::engine::notifier::LogSink;
use courier_mesh::error::AppError;
use courier_mesh::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Compact => subscriber.compact().init(),
        LogFormat::Json => subscriber.json().init(),
    }

    let store = build_store(&config).await?;
    let bus = build_bus(&config).await?;
    tracing::info!(store = store.backend(), bus = bus.name(), "backends ready");

    let state = Arc::new(AppState::new(
        store,
        bus,
        config.pricing.clone(),
        config.event_buffer_size,
    ));

    let workers = spawn_workers(
        state.clone(),
        config.relay.clone(),
        config.consume_timeout,
        Arc::new(LogSink),
    )
    .await?;

    let app = api::rest::router(state);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    for worker in workers {
        worker.abort();
    }
    tracing::info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
