//! Time-to-live cache with explicit staleness.
//!
//! Reads return a [`CacheRead<T>`] that says where the value came from (a
//! valid entry, a fresh fetch, a refresh shared with another caller, or a
//! stale entry served while a refresh is in flight), so handlers can report
//! `cached` honestly instead of guessing.
//!
//! # Refresh protocol
//!
//! - A valid entry (`now - fetched_at < ttl`) is returned without touching
//!   the producer.
//! - Otherwise exactly one caller per key runs the producer. The mutex
//!   protecting the entry map is held only to check and to install; never
//!   across the producer call.
//! - Callers arriving while that refresh is in flight get the previous entry
//!   immediately, flagged stale. With no previous entry they wait for the
//!   in-flight refresh and share its outcome, success or error.
//! - A failed refresh leaves the old entry in place but does not return it,
//!   unless [`CacheConfig::serve_stale_on_error`] is set.
//!
//! # Example
//!
//! ```ignore
//! let cache = TimedCache::new(CacheConfig::default());
//! let read = cache.get(&"anomaly_log", &record_store).await?;
//! if read.is_stale() {
//!     tracing::debug!(age = ?read.age(), "Serving stale anomaly log");
//! }
//! ```

pub mod freshness;
pub mod timed;
pub mod traits;

pub use freshness::{CacheRead, ReadSource};
pub use timed::{CacheConfig, CacheEntry, TimedCache};
pub use traits::{CacheStats, Producer};
