//! Shared harness for router-level tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::Value;
use tower::ServiceExt;
use vigil_api::{create_api_router, AppState, CachedAnomalyLog, DashboardConfig};
use vigil_storage::CacheConfig;
use vigil_test_utils::{AnomalyRecord, MemoryArtifactStore, ScriptedSource};
use vigil_upstream::RecordStore;

pub const CONTRACT: &str = "0x279FcACc1eB244BBD7Be138D34F3f562Da179dd5";

/// A router wired to scripted upstreams.
pub struct Harness {
    pub app: Router,
    pub source: Arc<ScriptedSource>,
    pub store: Arc<MemoryArtifactStore>,
}

pub struct HarnessBuilder {
    records: Vec<AnomalyRecord>,
    source: Option<ScriptedSource>,
    store: MemoryArtifactStore,
    ttl: Duration,
    vars: HashMap<String, String>,
}

impl HarnessBuilder {
    pub fn records(mut self, records: Vec<AnomalyRecord>) -> Self {
        self.records = records;
        self
    }

    /// Use a pre-configured source instead of `records`.
    pub fn source(mut self, source: ScriptedSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn store(mut self, store: MemoryArtifactStore) -> Self {
        self.store = store;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> Harness {
        let source = Arc::new(
            self.source
                .unwrap_or_else(|| ScriptedSource::new(self.records)),
        );
        let store = Arc::new(self.store);

        let log = CachedAnomalyLog::new(
            RecordStore::new(source.clone()),
            CacheConfig::default().with_ttl(self.ttl),
        );
        let state = AppState::new(log, store.clone());

        let vars = self.vars;
        let config = DashboardConfig::from_lookup(|key| vars.get(key).cloned())
            .expect("test configuration is valid");

        Harness {
            app: create_api_router(state, &config),
            source,
            store,
        }
    }
}

pub fn harness() -> HarnessBuilder {
    let mut vars = HashMap::new();
    vars.insert("CONTRACT_ADDRESS".to_string(), CONTRACT.to_string());
    HarnessBuilder {
        records: Vec::new(),
        source: None,
        store: MemoryArtifactStore::new(),
        ttl: Duration::from_secs(300),
        vars,
    }
}

impl Harness {
    pub async fn request(&self, request: Request<Body>) -> Response {
        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn get(&self, uri: &str) -> Response {
        let request = Request::builder()
            .uri(uri)
            .method("GET")
            .body(Body::empty())
            .expect("valid request");
        self.request(request).await
    }

    pub async fn get_json(&self, uri: &str) -> (StatusCode, Value) {
        let response = self.get(uri).await;
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        let value = serde_json::from_slice(&body).expect("JSON body");
        (status, value)
    }

    pub async fn get_text(&self, uri: &str) -> (StatusCode, String) {
        let response = self.get(uri).await;
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        (status, String::from_utf8_lossy(&body).into_owned())
    }
}
