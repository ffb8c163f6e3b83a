//! Probe endpoints for orchestrators and uptime checks.
//!
//! `/health/ping` and `/health/live` never touch the upstream. `/health/ready`
//! asks the record source whether its connection is still usable and reports
//! the anomaly log cache alongside it.

use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use vigil_storage::CacheStats;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Healthy,
    Unhealthy,
}

impl Status {
    fn from_up(up: bool) -> Self {
        if up {
            Self::Healthy
        } else {
            Self::Unhealthy
        }
    }

    fn http_status(self) -> StatusCode {
        match self {
            Self::Healthy => StatusCode::OK,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Probe {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Readiness>,
}

/// Everything `/health/ready` knows about the running service.
#[derive(Debug, Clone, Serialize)]
pub struct Readiness {
    pub upstream: UpstreamProbe,
    pub cache: CacheStats,
    pub cached_images: usize,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpstreamProbe {
    pub status: Status,
    /// `ledger`, `edge`, or a test source name.
    pub source: &'static str,
    pub latency_ms: u64,
}

async fn probe_upstream(state: &AppState) -> UpstreamProbe {
    let started = Instant::now();
    let up = state.log.is_connected().await;
    UpstreamProbe {
        status: Status::from_up(up),
        source: state.log.source_name(),
        latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    }
}

async fn ping() -> &'static str {
    "pong"
}

async fn live() -> Json<Probe> {
    Json(Probe {
        status: Status::Healthy,
        message: Some("Process is alive"),
        details: None,
    })
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let upstream = probe_upstream(&state).await;
    let status = upstream.status;
    if status == Status::Unhealthy {
        tracing::warn!(source = upstream.source, "Readiness probe: upstream not reachable");
    }

    let probe = Probe {
        status,
        message: (status == Status::Unhealthy).then_some("Upstream is not reachable"),
        details: Some(Readiness {
            upstream,
            cache: state.log.stats(),
            cached_images: state.images.cached_count(),
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds: state.start_time.elapsed().as_secs(),
        }),
    };
    (status.http_status(), Json(probe))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(live))
        .route("/ready", get(ready))
}
