//! Read results carrying staleness metadata.

use std::time::{Duration, Instant};

/// Where a cache read was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// A valid entry; the producer was not called.
    Hit,
    /// This caller ran the producer.
    Fetched,
    /// Another caller's in-flight refresh, awaited and shared.
    Shared,
    /// An expired entry.
    Stale,
}

/// Result of a cache read.
///
/// Callers inspect [`CacheRead::source`] or the convenience predicates to
/// learn how fresh the value is before using it.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    fetched_at: Instant,
    age: Duration,
    source: ReadSource,
}

impl<T> CacheRead<T> {
    pub(crate) fn new(value: T, fetched_at: Instant, now: Instant, source: ReadSource) -> Self {
        Self {
            value,
            fetched_at,
            age: now.saturating_duration_since(fetched_at),
            source,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    /// When the value was produced.
    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    /// Age of the value at read time.
    pub fn age(&self) -> Duration {
        self.age
    }

    /// True when the value came from an existing entry rather than a
    /// producer call made for (or shared with) this read.
    pub fn was_cache_hit(&self) -> bool {
        matches!(self.source, ReadSource::Hit | ReadSource::Stale)
    }

    pub fn is_stale(&self) -> bool {
        self.source == ReadSource::Stale
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            fetched_at: self.fetched_at,
            age: self.age,
            source: self.source,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
