//! Permanent cache of encoded evidence images.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use dashmap::DashMap;
use serde::Serialize;
use vigil_core::ResolveError;

use super::store::{validate_artifact_name, ArtifactStore};

/// Content type for an artifact name: `image/png` for `.png`, otherwise
/// `image/jpeg`. Case-insensitive.
pub fn content_type_for(name: &str) -> &'static str {
    match name.rsplit_once('.') {
        Some((_, ext)) if ext.eq_ignore_ascii_case("png") => "image/png",
        _ => "image/jpeg",
    }
}

/// An artifact encoded as a `data:` URL, ready to embed in a JSON response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodedArtifact {
    pub name: String,
    pub content_type: &'static str,
    pub size_bytes: u64,
    pub data_url: String,
}

impl EncodedArtifact {
    pub fn encode(name: impl Into<String>, bytes: &[u8]) -> Self {
        let name = name.into();
        let content_type = content_type_for(&name);
        Self {
            data_url: format!("data:{content_type};base64,{}", STANDARD.encode(bytes)),
            size_bytes: bytes.len() as u64,
            content_type,
            name,
        }
    }
}

/// Outcome of [`ImageResolver::resolve`].
#[derive(Debug, Clone)]
pub struct Resolved {
    pub artifact: Arc<EncodedArtifact>,
    /// True when served from the resolver's cache.
    pub cached: bool,
}

/// Resolves artifact names to encoded images, caching every success forever.
///
/// Missing artifacts are never cached, so an image written after a miss is
/// picked up by the next request.
pub struct ImageResolver {
    store: Arc<dyn ArtifactStore>,
    cache: DashMap<String, Arc<EncodedArtifact>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ImageResolver {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub async fn resolve(&self, name: &str) -> Result<Resolved, ResolveError> {
        validate_artifact_name(name)?;

        if let Some(artifact) = self.cache.get(name) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Resolved {
                artifact: Arc::clone(artifact.value()),
                cached: true,
            });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        if !self.store.exists(name).await? {
            tracing::debug!(name, "Artifact not found");
            return Err(ResolveError::not_found(name));
        }
        let bytes = self.store.read_bytes(name).await?;
        let encoded = Arc::new(EncodedArtifact::encode(name, &bytes));

        // A concurrent resolve may have won the race; keep whichever landed first.
        let artifact = Arc::clone(
            self.cache
                .entry(name.to_string())
                .or_insert(encoded)
                .value(),
        );
        tracing::debug!(name, size_bytes = artifact.size_bytes, "Artifact cached");

        Ok(Resolved {
            artifact,
            cached: false,
        })
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.cache.contains_key(name)
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// (hits, misses) since construction.
    pub fn counts(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
