//! Cached Anomaly Log
//!
//! `CachedAnomalyLog` puts the configured [`RecordStore`] behind a
//! [`TimedCache`] so both dashboard routes share one rate-bounded snapshot of
//! the log. Every refresh is timed and counted as an upstream call; every
//! read is counted by cache outcome.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use vigil_core::{AnomalyRecord, UpstreamError};
use vigil_storage::{CacheConfig, CacheRead, CacheStats, Producer, ReadSource, TimedCache};
use vigil_upstream::{BestEffort, RecordStore, ANOMALY_LOG_KEY};

use crate::telemetry::{metrics, CacheOutcome};

/// One best-effort read of the whole anomaly log.
pub type LogSnapshot = BestEffort<AnomalyRecord>;

/// Cache type holding log snapshots.
pub type LogCache = TimedCache<&'static str, LogSnapshot, UpstreamError>;

const FETCH_OPERATION: &str = "fetch_all";

/// [`RecordStore`] producer that reports every refresh to Prometheus.
struct MeteredStore {
    store: RecordStore,
}

#[async_trait]
impl Producer<&'static str, LogSnapshot> for MeteredStore {
    type Error = UpstreamError;

    async fn produce(&self, _key: &&'static str) -> Result<LogSnapshot, UpstreamError> {
        let start = Instant::now();
        let result = self.store.fetch_all().await;

        let outcome = match &result {
            Ok(snapshot) if snapshot.is_complete() => "ok",
            Ok(_) => "partial",
            Err(e) if e.is_timeout() => "timeout",
            Err(_) => "error",
        };
        if let Some(metrics) = metrics() {
            metrics.record_upstream_call(FETCH_OPERATION, outcome, start.elapsed().as_secs_f64());
        }
        result
    }
}

/// The anomaly log as served to the dashboard.
pub struct CachedAnomalyLog {
    producer: MeteredStore,
    cache: LogCache,
}

impl CachedAnomalyLog {
    pub fn new(store: RecordStore, config: CacheConfig) -> Self {
        Self {
            producer: MeteredStore { store },
            cache: TimedCache::new(config),
        }
    }

    /// Current snapshot, refreshed through the upstream when expired.
    pub async fn read(&self) -> Result<CacheRead<Arc<LogSnapshot>>, UpstreamError> {
        let result = self.cache.get(&ANOMALY_LOG_KEY, &self.producer).await;

        let outcome = match &result {
            Ok(read) => match read.source() {
                ReadSource::Hit => CacheOutcome::Hit,
                ReadSource::Fetched => CacheOutcome::Miss,
                ReadSource::Shared => CacheOutcome::Shared,
                ReadSource::Stale => CacheOutcome::Stale,
            },
            Err(_) => CacheOutcome::Error,
        };
        if let Some(metrics) = metrics() {
            metrics.record_cache_lookup(outcome);
        }

        match &result {
            Ok(read) if read.is_stale() => {
                tracing::info!(age_secs = read.age().as_secs(), "Serving stale anomaly log")
            }
            Ok(read) => tracing::debug!(source = ?read.source(), records = read.value().len(), "Anomaly log read"),
            Err(e) => tracing::warn!(error = %e, "Anomaly log unavailable"),
        }
        result
    }

    /// Drop the cached snapshot so the next read refreshes.
    pub fn invalidate(&self) {
        self.cache.invalidate(&ANOMALY_LOG_KEY);
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn source_name(&self) -> &'static str {
        self.producer.store.source_name()
    }

    pub async fn is_connected(&self) -> bool {
        self.producer.store.is_connected().await
    }
}
