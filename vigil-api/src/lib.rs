//! VIGIL API - HTTP Layer for the Anomaly Dashboard
//!
//! Serves the dashboard's JSON endpoints over Axum. The anomaly log is read
//! from the configured upstream (ledger contract or edge device) through a
//! time-to-live cache; evidence images are listed from an artifact store,
//! matched against the log, and served as data URLs from a permanent cache.

pub mod bootstrap;
pub mod cached_log;
pub mod config;
pub mod error;
pub mod macros;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use bootstrap::build_state;
pub use cached_log::{CachedAnomalyLog, LogSnapshot};
pub use config::{ArtifactSource, DashboardConfig, UpstreamKind};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::create_api_router;
pub use state::AppState;
