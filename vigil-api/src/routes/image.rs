//! Single image endpoint: `GET /api/image/:name`.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use vigil_core::ResolveError;
use vigil_storage::ImageResolver;

use crate::error::ApiResult;
use crate::state::AppState;
use crate::telemetry::metrics;

/// Body of a successful image lookup.
#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub success: bool,
    /// `data:<mime>;base64,<payload>`
    pub image: String,
    pub cached: bool,
}

fn resolution_outcome(result: &Result<bool, &ResolveError>) -> &'static str {
    match result {
        Ok(true) => "cached",
        Ok(false) => "loaded",
        Err(ResolveError::NotFound { .. }) => "not_found",
        Err(ResolveError::InvalidName { .. }) => "invalid",
        Err(_) => "error",
    }
}

/// GET /api/image/:name
pub async fn get_image(
    State(images): State<Arc<ImageResolver>>,
    Path(name): Path<String>,
) -> ApiResult<Json<ImageResponse>> {
    let result = images.resolve(&name).await;

    let outcome = resolution_outcome(&result.as_ref().map(|r| r.cached));
    if let Some(metrics) = metrics() {
        metrics.record_image_resolution(outcome);
    }

    let resolved = result?;
    tracing::debug!(filename = %name, cached = resolved.cached, "Image served");
    Ok(Json(ImageResponse {
        success: true,
        image: resolved.artifact.data_url.clone(),
        cached: resolved.cached,
    }))
}

/// Create the image router.
pub fn create_router() -> Router<AppState> {
    Router::new().route("/image/:name", get(get_image))
}
