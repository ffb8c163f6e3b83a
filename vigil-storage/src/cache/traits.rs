//! Producer trait and cache statistics.

use async_trait::async_trait;
use serde::Serialize;

/// An expensive fetch operation placed behind a [`TimedCache`].
///
/// The error type must be `Clone` because callers that wait on an in-flight
/// refresh all receive the same outcome.
///
/// [`TimedCache`]: super::TimedCache
#[async_trait]
pub trait Producer<K, T>: Send + Sync
where
    K: Send + Sync,
{
    type Error: Clone + Send + Sync + 'static;

    /// Produce a fresh value for `key`.
    async fn produce(&self, key: &K) -> Result<T, Self::Error>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Reads answered by a valid entry.
    pub hits: u64,
    /// Reads that ran the producer.
    pub misses: u64,
    /// Reads that shared another caller's in-flight refresh.
    pub shared: u64,
    /// Reads answered by an expired entry while a refresh was in flight, or
    /// after a failed refresh when stale fallback is enabled.
    pub stale_serves: u64,
    /// Producer calls that returned an error.
    pub refresh_failures: u64,
    /// Number of keys currently holding an entry.
    pub entry_count: u64,
}

impl CacheStats {
    /// Fraction of reads served without running the producer (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.shared + self.stale_serves;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}
