//! Anomaly log and evidence images proxied from an edge device.
//!
//! The edge device runs the detector and serves the same dashboard API this
//! service exposes. Responses are decoded leniently: a missing `folder` is
//! `""`, a missing `frame` is `0`, `error` may be a string or a number, and an
//! unparseable timestamp falls back to the read time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::header::HeaderValue;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use vigil_core::record::timestamp_format;
use vigil_core::{
    AnomalyRecord, ArtifactDescriptor, ArtifactLocation, ResolveError, Timestamp, UpstreamError,
};
use vigil_storage::{validate_artifact_name, ArtifactStore};

use crate::connector::{Connection, Credentials};
use crate::store::{BestEffort, RecordSource};
use crate::transport::{auth_headers, request_error};

pub const BLOCKCHAIN_DATA_PATH: &str = "/api/blockchain-data";
pub const ANOMALY_IMAGES_PATH: &str = "/api/anomaly-images";
pub const IMAGE_PATH: &str = "/api/image";

/// Tunnels in front of edge devices serve an interstitial page unless asked
/// not to.
const SKIP_BROWSER_WARNING: &str = "ngrok-skip-browser-warning";

/// How long the outcome of the last request stands in for a liveness probe.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// HTTP GET connection to an edge device. `raw_call` takes a request path.
///
/// Liveness follows the most recent request: any HTTP answer below 500
/// counts as reachable. When nothing has been sent for the probe interval,
/// `is_connected` probes the device again.
pub struct EdgeConnection {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    probe_interval: Duration,
    last_outcome: Mutex<Option<(bool, Instant)>>,
}

impl EdgeConnection {
    pub fn new(
        base_url: impl Into<String>,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self, UpstreamError> {
        let mut headers = auth_headers(credentials)?;
        headers.insert(SKIP_BROWSER_WARNING, HeaderValue::from_static("true"));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| UpstreamError::transport("build client", e))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            last_outcome: Mutex::new(None),
        })
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    fn outcomes(&self) -> MutexGuard<'_, Option<(bool, Instant)>> {
        self.last_outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, reachable: bool) {
        *self.outcomes() = Some((reachable, Instant::now()));
    }

    /// Outcome of the last request, if it is recent enough to trust.
    fn recent_outcome(&self) -> Option<bool> {
        match *self.outcomes() {
            Some((reachable, at)) if at.elapsed() < self.probe_interval => Some(reachable),
            _ => None,
        }
    }

    async fn get(&self, path: &str) -> Result<Value, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error(path, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                operation: path.to_string(),
                status: status.as_u16(),
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| UpstreamError::decode(path, e))
    }
}

#[async_trait]
impl Connection for EdgeConnection {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn is_connected(&self) -> bool {
        if let Some(reachable) = self.recent_outcome() {
            return reachable;
        }
        let _ = self.raw_call(BLOCKCHAIN_DATA_PATH, Value::Null).await;
        matches!(*self.outcomes(), Some((true, _)))
    }

    async fn raw_call(&self, path: &str, _params: Value) -> Result<Value, UpstreamError> {
        let result = self.get(path).await;
        let reachable = match &result {
            Ok(_) | Err(UpstreamError::Decode { .. }) => true,
            Err(UpstreamError::Status { status, .. }) => *status < 500,
            Err(_) => false,
        };
        self.record(reachable);
        result
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom(format!("{n} is not a frame index"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("{s:?} is not a frame index"))),
        Value::Null => Ok(0),
        other => Err(serde::de::Error::custom(format!(
            "expected frame index, got {other}"
        ))),
    }
}

/// One entry of the device's `tx_logs`.
#[derive(Debug, Deserialize)]
struct EdgeRecord {
    #[serde(default)]
    folder: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    frame: u64,
    #[serde(default, deserialize_with = "string_or_number")]
    error: String,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    index: Option<u64>,
}

impl EdgeRecord {
    fn observed_at(&self, read_at: Timestamp) -> Timestamp {
        match &self.timestamp {
            Some(Value::String(raw)) => timestamp_format::parse(raw).unwrap_or(read_at),
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .unwrap_or(read_at),
            _ => read_at,
        }
    }

    fn into_record(self, position: u64, read_at: Timestamp) -> AnomalyRecord {
        let observed_at = self.observed_at(read_at);
        AnomalyRecord::new(
            self.index.unwrap_or(position),
            self.folder,
            self.frame,
            self.error,
            observed_at,
        )
    }
}

#[derive(Debug, Deserialize)]
struct EdgeSnapshot {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    anomaly_count: Option<u64>,
    #[serde(default)]
    tx_logs: Vec<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl EdgeSnapshot {
    fn reported(&self) -> u64 {
        self.anomaly_count.unwrap_or(self.tx_logs.len() as u64)
    }
}

/// Reads the anomaly log from an edge device's `/api/blockchain-data`.
pub struct EdgeSource {
    conn: Arc<dyn Connection>,
}

impl EdgeSource {
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        Self { conn }
    }

    async fn snapshot(&self) -> Result<EdgeSnapshot, UpstreamError> {
        let body = self.conn.raw_call(BLOCKCHAIN_DATA_PATH, Value::Null).await?;
        let snapshot: EdgeSnapshot = serde_json::from_value(body)
            .map_err(|e| UpstreamError::decode(BLOCKCHAIN_DATA_PATH, e))?;
        if snapshot.success == Some(false) {
            return Err(UpstreamError::Rejected {
                operation: BLOCKCHAIN_DATA_PATH.to_string(),
                reason: snapshot
                    .error
                    .clone()
                    .unwrap_or_else(|| "edge device reported failure".to_string()),
            });
        }
        Ok(snapshot)
    }

    fn decode(snapshot: EdgeSnapshot) -> BestEffort<AnomalyRecord> {
        let reported = snapshot.reported();
        let read_at = Utc::now();
        let mut items = Vec::new();
        let mut dropped = 0u64;

        let limit = usize::try_from(reported).unwrap_or(usize::MAX);
        for (position, raw) in snapshot.tx_logs.into_iter().take(limit).enumerate() {
            match serde_json::from_value::<EdgeRecord>(raw) {
                Ok(entry) => items.push(entry.into_record(position as u64, read_at)),
                Err(e) => {
                    dropped += 1;
                    tracing::warn!(source = "edge", index = position, error = %e, "Skipping undecodable anomaly record");
                }
            }
        }
        // Entries the device counted but did not send.
        dropped += reported.saturating_sub(items.len() as u64 + dropped);

        BestEffort {
            items,
            dropped,
            reported,
        }
    }
}

#[async_trait]
impl RecordSource for EdgeSource {
    fn name(&self) -> &'static str {
        "edge"
    }

    async fn count(&self) -> Result<u64, UpstreamError> {
        Ok(self.snapshot().await?.reported())
    }

    async fn record_at(&self, index: u64) -> Result<AnomalyRecord, UpstreamError> {
        let mut snapshot = self.snapshot().await?;
        let position = usize::try_from(index).unwrap_or(usize::MAX);
        if position >= snapshot.tx_logs.len() {
            return Err(UpstreamError::decode(
                BLOCKCHAIN_DATA_PATH,
                format!("no record at index {index}"),
            ));
        }
        let raw = snapshot.tx_logs.swap_remove(position);
        serde_json::from_value::<EdgeRecord>(raw)
            .map(|entry| entry.into_record(index, Utc::now()))
            .map_err(|e| UpstreamError::decode(BLOCKCHAIN_DATA_PATH, e))
    }

    /// One request for the whole log instead of one per index.
    async fn fetch_all(&self) -> Result<BestEffort<AnomalyRecord>, UpstreamError> {
        Ok(Self::decode(self.snapshot().await?))
    }

    async fn is_connected(&self) -> bool {
        self.conn.is_connected().await
    }
}

#[derive(Debug, Deserialize)]
struct RemoteListing {
    #[serde(default)]
    images: Vec<RemoteImageEntry>,
}

#[derive(Debug, Deserialize)]
struct RemoteImageEntry {
    filename: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct RemoteImage {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    image: Option<String>,
}

/// Split a `data:<mime>;base64,<payload>` URL and decode the payload.
fn decode_data_url(url: &str) -> Result<Vec<u8>, String> {
    let (_, payload) = url
        .split_once(";base64,")
        .ok_or_else(|| "image is not a base64 data URL".to_string())?;
    STANDARD.decode(payload).map_err(|e| e.to_string())
}

/// Evidence images served by an edge device.
pub struct RemoteArtifactStore {
    conn: Arc<dyn Connection>,
}

impl RemoteArtifactStore {
    pub fn new(conn: Arc<dyn Connection>) -> Self {
        Self { conn }
    }

    fn image_path(name: &str) -> String {
        format!("{IMAGE_PATH}/{}", urlencoding::encode(name))
    }
}

#[async_trait]
impl ArtifactStore for RemoteArtifactStore {
    async fn list(&self) -> Result<Vec<ArtifactDescriptor>, UpstreamError> {
        let body = self.conn.raw_call(ANOMALY_IMAGES_PATH, Value::Null).await?;
        let listing: RemoteListing = serde_json::from_value(body)
            .map_err(|e| UpstreamError::decode(ANOMALY_IMAGES_PATH, e))?;

        let base = self.conn.endpoint().trim_end_matches('/');
        let mut artifacts: Vec<ArtifactDescriptor> = listing
            .images
            .into_iter()
            .filter(|entry| ArtifactDescriptor::is_image_name(&entry.filename))
            .map(|entry| {
                let url = format!("{base}{}", Self::image_path(&entry.filename));
                ArtifactDescriptor::new(entry.filename, entry.size, ArtifactLocation::Url(url))
            })
            .collect();
        artifacts.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(artifacts)
    }

    async fn exists(&self, name: &str) -> Result<bool, ResolveError> {
        match self.read_bytes(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn read_bytes(&self, name: &str) -> Result<Vec<u8>, ResolveError> {
        validate_artifact_name(name)?;
        let path = Self::image_path(name);
        let body = match self.conn.raw_call(&path, Value::Null).await {
            Ok(body) => body,
            Err(UpstreamError::Status { status: 404, .. }) => {
                return Err(ResolveError::not_found(name))
            }
            Err(e) => return Err(e.into()),
        };

        let image: RemoteImage = serde_json::from_value(body)
            .map_err(|e| ResolveError::from(UpstreamError::decode(path.clone(), e)))?;
        match image.image {
            Some(url) if image.success => decode_data_url(&url)
                .map_err(|reason| UpstreamError::decode(path, reason).into()),
            _ => Err(ResolveError::not_found(name)),
        }
    }
}
