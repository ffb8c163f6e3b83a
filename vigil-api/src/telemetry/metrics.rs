//! Prometheus Metrics Definitions
//!
//! Defines the VIGIL metrics and exposes a /metrics endpoint for Prometheus
//! scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Upstream call latency buckets (seconds). A full log read issues one call
/// per record, so the tail is longer than for HTTP requests.
const UPSTREAM_LATENCY_BUCKETS: &[f64] = &[0.010, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance - initialized once on first use
pub static METRICS: Lazy<ApiResult<VigilMetrics>> = Lazy::new(VigilMetrics::new);

/// The registered metrics, or `None` when registration failed.
///
/// Registration failure is logged once and never breaks a request.
pub fn metrics() -> Option<&'static VigilMetrics> {
    match METRICS.as_ref() {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            static REPORTED: std::sync::Once = std::sync::Once::new();
            REPORTED.call_once(|| tracing::error!(error = %e, "Metrics unavailable"));
            None
        }
    }
}

/// Outcome label for a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    Shared,
    Stale,
    Error,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Shared => "shared",
            CacheOutcome::Stale => "stale",
            CacheOutcome::Error => "error",
        }
    }
}

/// Container for all VIGIL metrics.
#[derive(Clone)]
pub struct VigilMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Upstream call counter - labels: operation, outcome
    pub upstream_calls_total: CounterVec,

    /// Upstream call duration histogram - labels: operation
    pub upstream_call_duration_seconds: HistogramVec,

    /// Anomaly log cache lookups - labels: outcome
    pub cache_lookups_total: CounterVec,

    /// Image resolutions - labels: outcome (cached, loaded, not_found, invalid, error)
    pub image_resolutions_total: CounterVec,
}

impl VigilMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "vigil_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| registration_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "vigil_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("http_request_duration_seconds", e))?,

            upstream_calls_total: register_counter_vec!(
                "vigil_upstream_calls_total",
                "Total number of upstream calls",
                &["operation", "outcome"]
            )
            .map_err(|e| registration_error("upstream_calls_total", e))?,

            upstream_call_duration_seconds: register_histogram_vec!(
                "vigil_upstream_call_duration_seconds",
                "Upstream call duration in seconds",
                &["operation"],
                UPSTREAM_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("upstream_call_duration_seconds", e))?,

            cache_lookups_total: register_counter_vec!(
                "vigil_cache_lookups_total",
                "Anomaly log cache lookups by outcome",
                &["outcome"]
            )
            .map_err(|e| registration_error("cache_lookups_total", e))?,

            image_resolutions_total: register_counter_vec!(
                "vigil_image_resolutions_total",
                "Image resolutions by outcome",
                &["outcome"]
            )
            .map_err(|e| registration_error("image_resolutions_total", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record an upstream call.
    pub fn record_upstream_call(&self, operation: &str, outcome: &str, duration_secs: f64) {
        self.upstream_calls_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.upstream_call_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    /// Record a cache lookup.
    pub fn record_cache_lookup(&self, outcome: CacheOutcome) {
        self.cache_lookups_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Record an image resolution.
    pub fn record_image_resolution(&self, outcome: &str) {
        self.image_resolutions_total
            .with_label_values(&[outcome])
            .inc();
    }
}

fn registration_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    // Touch the registry so an idle server still exposes every family.
    let _ = metrics();

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
