//! Dashboard Data Endpoints
//!
//! - `GET /api/blockchain-data`: the cached anomaly log
//! - `GET /api/anomaly-images`: evidence images joined with the same log
//!
//! Both routes read the log through the one [`CachedAnomalyLog`], so the
//! upstream sees at most one refresh per ttl regardless of which route the
//! dashboard polls.

use std::sync::Arc;

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use vigil_core::{AnomalyRecord, RecordIndex, TxData, UpstreamError};
use vigil_storage::ArtifactStore;

use crate::cached_log::CachedAnomalyLog;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Body of a successful `GET /api/blockchain-data`.
#[derive(Debug, Serialize)]
pub struct BlockchainDataResponse<'a> {
    pub success: bool,
    /// Entry count the upstream reported.
    pub anomaly_count: u64,
    pub tx_logs: &'a [AnomalyRecord],
    /// True when the log was served without an upstream round trip.
    pub cached: bool,
    /// Entries the upstream reported but that could not be read.
    pub dropped: u64,
}

/// One entry of `GET /api/anomaly-images`.
#[derive(Debug, Serialize)]
pub struct ImageEntry {
    pub filename: String,
    pub size: u64,
    pub blockchain_match: bool,
    pub tx_data: TxData,
}

/// Body of a successful `GET /api/anomaly-images`.
#[derive(Debug, Serialize)]
pub struct AnomalyImagesResponse {
    pub success: bool,
    pub images: Vec<ImageEntry>,
    pub total_count: usize,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /api/blockchain-data
pub async fn blockchain_data(State(log): State<Arc<CachedAnomalyLog>>) -> ApiResult<Response> {
    let read = log.read().await.map_err(blockchain_data_error)?;
    let snapshot = read.value();

    let body = BlockchainDataResponse {
        success: true,
        anomaly_count: snapshot.reported,
        tx_logs: &snapshot.items,
        cached: read.was_cache_hit(),
        dropped: snapshot.dropped,
    };
    Ok(Json(body).into_response())
}

/// GET /api/anomaly-images
pub async fn anomaly_images(
    State(log): State<Arc<CachedAnomalyLog>>,
    State(artifacts): State<Arc<dyn ArtifactStore>>,
) -> ApiResult<Json<AnomalyImagesResponse>> {
    let read = log.read().await.map_err(anomaly_images_error)?;
    let listed = artifacts.list().await.map_err(anomaly_images_error)?;

    let index = RecordIndex::build(&read.value().items);
    if index.collisions() > 0 {
        tracing::warn!(
            collisions = index.collisions(),
            "Records share derived filenames; the earliest record wins"
        );
    }

    let images: Vec<ImageEntry> = index
        .match_artifacts(&listed)
        .into_iter()
        .map(|m| ImageEntry {
            filename: m.artifact.filename.clone(),
            size: m.artifact.size_bytes,
            blockchain_match: m.is_matched(),
            tx_data: m.tx_data(),
        })
        .collect();

    let matched = images.iter().filter(|image| image.blockchain_match).count();
    tracing::debug!(images = images.len(), matched, "Anomaly images listed");

    Ok(Json(AnomalyImagesResponse {
        success: true,
        total_count: images.len(),
        images,
    }))
}

fn blockchain_data_error(err: UpstreamError) -> ApiError {
    ApiError::from(err).with_details(json!({
        "anomaly_count": 0,
        "tx_logs": [],
        "cached": false,
    }))
}

fn anomaly_images_error(err: UpstreamError) -> ApiError {
    ApiError::from(err).with_details(json!({
        "images": [],
        "total_count": 0,
    }))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the dashboard data router.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/blockchain-data", get(blockchain_data))
        .route("/anomaly-images", get(anomaly_images))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use chrono::Utc;
    use std::time::Duration;

    #[test]
    fn test_blockchain_data_response_serialization() {
        let records = vec![AnomalyRecord::new(0, "video_3", 42, "0.87", Utc::now())];
        let body = BlockchainDataResponse {
            success: true,
            anomaly_count: 2,
            tx_logs: &records,
            cached: true,
            dropped: 1,
        };

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["anomaly_count"], 2);
        assert_eq!(value["tx_logs"][0]["folder"], "video_3");
        assert_eq!(value["tx_logs"][0]["frame"], 42);
        assert_eq!(value["cached"], true);
        assert_eq!(value["dropped"], 1);
    }

    #[test]
    fn test_unmatched_entry_carries_sentinel() {
        let entry = ImageEntry {
            filename: "stray.jpg".to_string(),
            size: 10,
            blockchain_match: false,
            tx_data: TxData::from_match(None),
        };

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["blockchain_match"], false);
        assert_eq!(value["tx_data"]["folder"], "Local File");
        assert_eq!(value["tx_data"]["error"], "N/A");
        assert_eq!(value["tx_data"]["index"], -1);
    }

    #[test]
    fn test_error_bodies_keep_empty_payload() {
        let body = blockchain_data_error(UpstreamError::Closed).body();
        assert_eq!(body["success"], false);
        assert_eq!(body["tx_logs"], json!([]));
        assert_eq!(body["anomaly_count"], 0);
        assert_eq!(body["cached"], false);

        let err = anomaly_images_error(UpstreamError::timeout("fetch_all", Duration::from_secs(10)));
        assert_eq!(err.code, ErrorCode::UpstreamTimeout);
        assert_eq!(err.body()["images"], json!([]));
        assert_eq!(err.body()["total_count"], 0);
    }
}
