//! Best-effort reads of the anomaly log.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use vigil_core::{AnomalyRecord, UpstreamError};
use vigil_storage::Producer;

/// Cache key under which the full anomaly log snapshot is stored.
pub const ANOMALY_LOG_KEY: &str = "anomaly_log";

/// Items that were read successfully, plus how many were skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BestEffort<T> {
    pub items: Vec<T>,
    /// Entries the upstream reported but that could not be read or decoded.
    pub dropped: u64,
    /// Entry count the upstream reported.
    pub reported: u64,
}

impl<T> BestEffort<T> {
    pub fn complete(items: Vec<T>) -> Self {
        let reported = items.len() as u64;
        Self {
            items,
            dropped: 0,
            reported,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.dropped == 0
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A backend holding the anomaly log.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Short name for logs and health output.
    fn name(&self) -> &'static str;

    /// Number of records, in one round trip.
    async fn count(&self) -> Result<u64, UpstreamError>;

    async fn record_at(&self, index: u64) -> Result<AnomalyRecord, UpstreamError>;

    /// Read every record. Individual failures are logged and counted as
    /// dropped; only a failure to read the count is returned.
    async fn fetch_all(&self) -> Result<BestEffort<AnomalyRecord>, UpstreamError> {
        let reported = self.count().await?;
        let mut items = Vec::with_capacity(usize::try_from(reported).unwrap_or(0));
        let mut dropped = 0u64;

        for index in 0..reported {
            match self.record_at(index).await {
                Ok(record) => items.push(record),
                Err(e) => {
                    dropped += 1;
                    tracing::warn!(source = self.name(), index, error = %e, "Skipping unreadable anomaly record");
                }
            }
        }

        Ok(BestEffort {
            items,
            dropped,
            reported,
        })
    }

    async fn is_connected(&self) -> bool;
}

/// The anomaly log, read through whichever [`RecordSource`] is configured.
#[derive(Clone)]
pub struct RecordStore {
    source: Arc<dyn RecordSource>,
}

impl RecordStore {
    pub fn new(source: Arc<dyn RecordSource>) -> Self {
        Self { source }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    pub async fn count(&self) -> Result<u64, UpstreamError> {
        self.source.count().await
    }

    pub async fn fetch_all(&self) -> Result<BestEffort<AnomalyRecord>, UpstreamError> {
        let result = self.source.fetch_all().await?;
        if result.dropped > 0 {
            tracing::warn!(
                source = self.source.name(),
                reported = result.reported,
                dropped = result.dropped,
                "Anomaly log read was incomplete"
            );
        } else {
            tracing::debug!(source = self.source.name(), records = result.len(), "Anomaly log read");
        }
        Ok(result)
    }

    pub async fn is_connected(&self) -> bool {
        self.source.is_connected().await
    }
}

#[async_trait]
impl Producer<&'static str, BestEffort<AnomalyRecord>> for RecordStore {
    type Error = UpstreamError;

    async fn produce(&self, _key: &&'static str) -> Result<BestEffort<AnomalyRecord>, UpstreamError> {
        self.fetch_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vigil_storage::{CacheConfig, TimedCache};

    struct FiveRecords {
        failing_index: Option<u64>,
        count_fails: bool,
        reads: AtomicU32,
    }

    impl FiveRecords {
        fn new(failing_index: Option<u64>) -> Self {
            Self {
                failing_index,
                count_fails: false,
                reads: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl RecordSource for FiveRecords {
        fn name(&self) -> &'static str {
            "test"
        }

        async fn count(&self) -> Result<u64, UpstreamError> {
            if self.count_fails {
                Err(UpstreamError::transport("getAnomalyCount", "connection reset"))
            } else {
                Ok(5)
            }
        }

        async fn record_at(&self, index: u64) -> Result<AnomalyRecord, UpstreamError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if Some(index) == self.failing_index {
                return Err(UpstreamError::decode("getAnomaly", "bad payload"));
            }
            Ok(AnomalyRecord::new(index, "video_1", index * 10, "0.5", Utc::now()))
        }

        async fn is_connected(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_fetch_all_skips_failed_index() {
        let source = Arc::new(FiveRecords::new(Some(2)));
        let store = RecordStore::new(source.clone());

        let result = store.fetch_all().await.unwrap();
        assert_eq!(result.len(), 4);
        assert_eq!(result.dropped, 1);
        assert_eq!(result.reported, 5);
        assert!(!result.is_complete());
        let indices: Vec<u64> = result.items.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 3, 4]);
        assert_eq!(source.reads.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_fetch_all_complete() {
        let store = RecordStore::new(Arc::new(FiveRecords::new(None)));
        let result = store.fetch_all().await.unwrap();
        assert!(result.is_complete());
        assert_eq!(result.len(), 5);
    }

    #[tokio::test]
    async fn test_count_failure_surfaces() {
        let source = FiveRecords {
            count_fails: true,
            ..FiveRecords::new(None)
        };
        let store = RecordStore::new(Arc::new(source));
        assert!(matches!(
            store.fetch_all().await,
            Err(UpstreamError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn test_store_behind_timed_cache() {
        let source = Arc::new(FiveRecords::new(None));
        let store = RecordStore::new(source.clone());
        let cache: TimedCache<&'static str, BestEffort<AnomalyRecord>, UpstreamError> =
            TimedCache::new(CacheConfig::default());

        let first = cache.get(&ANOMALY_LOG_KEY, &store).await.unwrap();
        let second = cache.get(&ANOMALY_LOG_KEY, &store).await.unwrap();

        assert!(!first.was_cache_hit());
        assert!(second.was_cache_hit());
        assert_eq!(second.value().len(), 5);
        assert_eq!(source.reads.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_best_effort_complete() {
        let result = BestEffort::complete(vec![1, 2, 3]);
        assert_eq!(result.reported, 3);
        assert!(result.is_complete());
        assert!(!result.is_empty());
    }
}
