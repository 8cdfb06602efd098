use std::sync::Arc;

use parcel_dispatch::api;
use parcel_dispatch::config::Config;
use parcel_dispatch::engine::checkpoint::run_housekeeping;
use parcel_dispatch::error::AppError;
use parcel_dispatch::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    if config.otp_expose_codes {
        tracing::warn!("OTP_EXPOSE_CODES is enabled; login codes are returned to callers");
    }
    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN is not set; driver verification is disabled");
    }

    let http_port = config.http_port;
    let shared_state = Arc::new(AppState::from_config(config));

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(run_housekeeping(shared_state.clone()));

    let bind_addr = format!("0.0.0.0:{http_port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
