//! Evidence image artifacts.

use std::path::PathBuf;

use serde::Serialize;

/// Extensions recognised as evidence images when listing an artifact store.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// Where an artifact's bytes live. Opaque to matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "at", rename_all = "lowercase")]
pub enum ArtifactLocation {
    Path(PathBuf),
    Url(String),
}

/// A named image artifact enumerated from an artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactDescriptor {
    pub filename: String,
    pub size_bytes: u64,
    pub location: ArtifactLocation,
}

impl ArtifactDescriptor {
    pub fn new(filename: impl Into<String>, size_bytes: u64, location: ArtifactLocation) -> Self {
        Self {
            filename: filename.into(),
            size_bytes,
            location,
        }
    }

    /// Whether `filename` carries one of [`IMAGE_EXTENSIONS`] (case-insensitive).
    pub fn is_image_name(filename: &str) -> bool {
        filename
            .rsplit_once('.')
            .map(|(_, ext)| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            })
            .unwrap_or(false)
    }
}
