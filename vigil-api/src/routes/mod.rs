//! REST API Routes Module
//!
//! Includes:
//! - Dashboard data routes under /api (anomaly log, image listing, images)
//! - Health check endpoints (Kubernetes-compatible)
//! - Prometheus metrics at /metrics
//! - CORS support for the browser dashboard

pub mod dashboard;
pub mod health;
pub mod image;

use std::time::Duration;

use axum::{
    http::{header, request::Parts, HeaderValue, Method},
    middleware::from_fn,
    routing::get,
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::DashboardConfig;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

pub use dashboard::create_router as dashboard_router;
pub use health::create_router as health_router;
pub use image::create_router as image_router;

/// Max age for CORS preflight cache.
const CORS_MAX_AGE: Duration = Duration::from_secs(86400);

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer from DashboardConfig.
///
/// With no configured origins every origin is allowed; otherwise only the
/// configured origins (including `*.domain` wildcards) are.
fn build_cors_layer(config: &DashboardConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(CORS_MAX_AGE);

    if !config.is_production() {
        tracing::info!("CORS: allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(origins = ?config.cors_origins, "CORS: restricted origins");
        let config = config.clone();
        cors.allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| {
                origin
                    .to_str()
                    .map(|origin| config.is_origin_allowed(origin))
                    .unwrap_or(false)
            },
        ))
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the complete API router.
///
/// - Dashboard routes at /api/blockchain-data, /api/anomaly-images, /api/image/:name
/// - Health checks at /health/*
/// - Metrics at /metrics
///
/// Every route is wrapped by the observability middleware and the CORS layer.
pub fn create_api_router(state: AppState, config: &DashboardConfig) -> Router {
    let api_routes = Router::new()
        .merge(dashboard::create_router())
        .merge(image::create_router());

    Router::new()
        .nest("/api", api_routes)
        .nest("/health", health::create_router())
        .route("/metrics", get(metrics_handler))
        .layer(from_fn(observability_middleware))
        .layer(build_cors_layer(config))
        .with_state(state)
}
