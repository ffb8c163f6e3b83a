//! VIGIL Storage - Caching and Artifact Resolution
//!
//! Two caches with different lifetimes sit in front of slow upstreams:
//!
//! - [`TimedCache`]: time-to-live cache with single-flight refresh, used for
//!   the anomaly log snapshot.
//! - [`ImageResolver`]: permanent per-name cache of encoded evidence images.
//!   Artifacts are immutable once written, so entries never expire.

pub mod artifact;
pub mod cache;

pub use artifact::{
    content_type_for, validate_artifact_name, ArtifactStore, EncodedArtifact, ImageResolver,
    LocalArtifactStore, Resolved,
};
pub use cache::{
    CacheConfig, CacheEntry, CacheRead, CacheStats, Producer, ReadSource, TimedCache,
};
