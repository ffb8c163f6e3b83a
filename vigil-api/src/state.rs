//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use vigil_storage::{ArtifactStore, ImageResolver};

use crate::cached_log::CachedAnomalyLog;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Anomaly log behind the time-to-live cache. Both dashboard routes read
    /// through this one instance.
    pub log: Arc<CachedAnomalyLog>,
    /// Artifact listing for `/api/anomaly-images`.
    pub artifacts: Arc<dyn ArtifactStore>,
    /// Permanent cache of encoded images for `/api/image/:name`.
    pub images: Arc<ImageResolver>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(log: CachedAnomalyLog, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            log: Arc::new(log),
            images: Arc::new(ImageResolver::new(Arc::clone(&artifacts))),
            artifacts,
            start_time: Instant::now(),
        }
    }
}

crate::impl_from_ref!(Arc<CachedAnomalyLog>, log);
crate::impl_from_ref!(Arc<dyn ArtifactStore>, artifacts);
crate::impl_from_ref!(Arc<ImageResolver>, images);
crate::impl_from_ref!(Instant, start_time);
