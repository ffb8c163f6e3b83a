//! VIGIL API Server Entry Point
//!
//! Loads configuration, connects the upstream, and starts the Axum HTTP
//! server.

use vigil_api::telemetry::{init_tracing, TelemetryConfig};
use vigil_api::{build_state, create_api_router, ApiError, ApiResult, DashboardConfig};

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::default())?;

    let config = DashboardConfig::from_env()?;
    let state = build_state(&config).await?;
    let app = create_api_router(state, &config);

    let addr = config.bind_addr;
    tracing::info!(%addr, upstream = ?config.upstream, "Starting VIGIL API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
