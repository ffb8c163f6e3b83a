//! Single-flight time-to-live cache.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use super::freshness::{CacheRead, ReadSource};
use super::traits::{CacheStats, Producer};

/// Default time-to-live for cached snapshots.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Configuration for a [`TimedCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// How long an entry stays valid after it was fetched.
    pub ttl: Duration,
    /// Return the previous entry, flagged stale, when a refresh fails.
    pub serve_stale_on_error: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            serve_stale_on_error: false,
        }
    }
}

impl CacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_serve_stale_on_error(mut self, enabled: bool) -> Self {
        self.serve_stale_on_error = enabled;
        self
    }
}

/// A cached value and the instant it was produced.
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub value: Arc<T>,
    pub fetched_at: Instant,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            fetched_at: self.fetched_at,
        }
    }
}

impl<T> CacheEntry<T> {
    /// Whether the entry is still within `ttl` at `now`.
    pub fn is_valid_at(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.fetched_at) < ttl
    }
}

/// Published once by the caller running a refresh; `None` until then.
type Outcome<T, E> = Option<Result<CacheEntry<T>, E>>;

struct Slot<T, E> {
    entry: Option<CacheEntry<T>>,
    in_flight: Option<watch::Receiver<Outcome<T, E>>>,
}

impl<T, E> Slot<T, E> {
    fn empty() -> Self {
        Self {
            entry: None,
            in_flight: None,
        }
    }
}

enum Plan<T, E> {
    Ready(CacheRead<Arc<T>>),
    Wait(watch::Receiver<Outcome<T, E>>),
    Fetch(watch::Sender<Outcome<T, E>>),
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    shared: AtomicU64,
    stale_serves: AtomicU64,
    refresh_failures: AtomicU64,
}

/// Keyed cache that refreshes expired entries through a [`Producer`], with
/// at most one refresh in flight per key.
pub struct TimedCache<K, T, E> {
    config: CacheConfig,
    slots: Mutex<HashMap<K, Slot<T, E>>>,
    counters: Counters,
}

impl<K, T, E> TimedCache<K, T, E>
where
    K: Eq + Hash + Clone + Send + Sync,
    T: Send + Sync,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Read `key`, refreshing through `producer` when the entry is missing or
    /// expired.
    pub async fn get<P>(&self, key: &K, producer: &P) -> Result<CacheRead<Arc<T>>, E>
    where
        P: Producer<K, T, Error = E> + ?Sized,
    {
        self.get_at(key, Instant::now(), producer).await
    }

    /// Same as [`TimedCache::get`] with an explicit clock reading.
    ///
    /// A successful refresh is stamped with `now`.
    pub async fn get_at<P>(
        &self,
        key: &K,
        now: Instant,
        producer: &P,
    ) -> Result<CacheRead<Arc<T>>, E>
    where
        P: Producer<K, T, Error = E> + ?Sized,
    {
        loop {
            match self.plan(key, now) {
                Plan::Ready(read) => return Ok(read),
                Plan::Wait(mut rx) => {
                    let outcome = rx.wait_for(Option::is_some).await.map(|o| (*o).clone());
                    match outcome {
                        Ok(Some(Ok(entry))) => {
                            self.counters.shared.fetch_add(1, Ordering::Relaxed);
                            return Ok(CacheRead::new(
                                entry.value,
                                entry.fetched_at,
                                now,
                                ReadSource::Shared,
                            ));
                        }
                        Ok(Some(Err(err))) => return Err(err),
                        // The refreshing caller was cancelled before publishing.
                        // Its guard already cleared the slot, so plan again.
                        Ok(None) | Err(_) => continue,
                    }
                }
                Plan::Fetch(tx) => return self.refresh(key, now, producer, tx).await,
            }
        }
    }

    fn plan(&self, key: &K, now: Instant) -> Plan<T, E> {
        let mut slots = self.slots();
        let slot = slots.entry(key.clone()).or_insert_with(Slot::empty);

        if let Some(entry) = slot
            .entry
            .as_ref()
            .filter(|e| e.is_valid_at(now, self.config.ttl))
        {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Plan::Ready(CacheRead::new(
                Arc::clone(&entry.value),
                entry.fetched_at,
                now,
                ReadSource::Hit,
            ));
        }

        if let Some(rx) = slot.in_flight.as_ref() {
            return match slot.entry.as_ref() {
                Some(entry) => {
                    self.counters.stale_serves.fetch_add(1, Ordering::Relaxed);
                    Plan::Ready(CacheRead::new(
                        Arc::clone(&entry.value),
                        entry.fetched_at,
                        now,
                        ReadSource::Stale,
                    ))
                }
                None => Plan::Wait(rx.clone()),
            };
        }

        let (tx, rx) = watch::channel(None);
        slot.in_flight = Some(rx);
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        Plan::Fetch(tx)
    }

    async fn refresh<P>(
        &self,
        key: &K,
        now: Instant,
        producer: &P,
        tx: watch::Sender<Outcome<T, E>>,
    ) -> Result<CacheRead<Arc<T>>, E>
    where
        P: Producer<K, T, Error = E> + ?Sized,
    {
        let mut guard = RefreshGuard {
            cache: self,
            key,
            armed: true,
        };

        let produced = producer.produce(key).await;

        let mut slots = self.slots();
        let slot = slots.entry(key.clone()).or_insert_with(Slot::empty);
        slot.in_flight = None;
        guard.armed = false;

        match produced {
            Ok(value) => {
                let entry = CacheEntry {
                    value: Arc::new(value),
                    fetched_at: now,
                };
                // Never replace an entry with an older one.
                let newer = slot
                    .entry
                    .as_ref()
                    .map_or(true, |existing| existing.fetched_at <= now);
                if newer {
                    slot.entry = Some(entry.clone());
                }
                drop(slots);
                tx.send_replace(Some(Ok(entry.clone())));
                Ok(CacheRead::new(
                    entry.value,
                    entry.fetched_at,
                    now,
                    ReadSource::Fetched,
                ))
            }
            Err(err) => {
                self.counters.refresh_failures.fetch_add(1, Ordering::Relaxed);
                let fallback = slot
                    .entry
                    .clone()
                    .filter(|_| self.config.serve_stale_on_error);
                drop(slots);
                tx.send_replace(Some(Err(err.clone())));
                match fallback {
                    Some(entry) => {
                        tracing::warn!(
                            age_secs = now.saturating_duration_since(entry.fetched_at).as_secs(),
                            "Refresh failed, serving stale entry"
                        );
                        self.counters.stale_serves.fetch_add(1, Ordering::Relaxed);
                        Ok(CacheRead::new(
                            entry.value,
                            entry.fetched_at,
                            now,
                            ReadSource::Stale,
                        ))
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Current entry for `key`, valid or not, without refreshing.
    pub fn peek(&self, key: &K) -> Option<CacheEntry<T>> {
        self.slots().get(key).and_then(|slot| slot.entry.clone())
    }

    /// Drop the entry for `key`. An in-flight refresh still completes and
    /// installs its result.
    pub fn invalidate(&self, key: &K) {
        let mut slots = self.slots();
        let idle = match slots.get_mut(key) {
            Some(slot) => {
                slot.entry = None;
                slot.in_flight.is_none()
            }
            None => false,
        };
        if idle {
            slots.remove(key);
        }
    }

    pub fn stats(&self) -> CacheStats {
        let entry_count = self
            .slots()
            .values()
            .filter(|slot| slot.entry.is_some())
            .count() as u64;
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            shared: self.counters.shared.load(Ordering::Relaxed),
            stale_serves: self.counters.stale_serves.load(Ordering::Relaxed),
            refresh_failures: self.counters.refresh_failures.load(Ordering::Relaxed),
            entry_count,
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<K, Slot<T, E>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the in-flight marker if the refreshing future is dropped before it
/// publishes an outcome. Runs before the sender drops, so waiters that wake
/// on the closed channel find the slot free.
struct RefreshGuard<'a, K, T, E>
where
    K: Eq + Hash + Clone + Send + Sync,
    T: Send + Sync,
    E: Clone + Send + Sync + 'static,
{
    cache: &'a TimedCache<K, T, E>,
    key: &'a K,
    armed: bool,
}

impl<K, T, E> Drop for RefreshGuard<'_, K, T, E>
where
    K: Eq + Hash + Clone + Send + Sync,
    T: Send + Sync,
    E: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.armed {
            if let Some(slot) = self.cache.slots().get_mut(self.key) {
                slot.in_flight = None;
            }
        }
    }
}
