//! Artifact store abstraction and the local-directory implementation.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use vigil_core::{ArtifactDescriptor, ArtifactLocation, ResolveError, UpstreamError};

/// A source of named evidence images.
///
/// Implemented by [`LocalArtifactStore`] for a results directory on disk, and
/// by the edge proxy in `vigil-upstream` for a remote device.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Enumerate image artifacts, sorted by filename.
    async fn list(&self) -> Result<Vec<ArtifactDescriptor>, UpstreamError>;

    async fn exists(&self, name: &str) -> Result<bool, ResolveError>;

    /// Read the raw bytes of `name`. Missing artifacts yield
    /// [`ResolveError::NotFound`].
    async fn read_bytes(&self, name: &str) -> Result<Vec<u8>, ResolveError>;
}

/// Reject names that could escape the store root.
///
/// Names must be a single non-empty path component other than `.` or `..`,
/// with no separators or NUL bytes. Dots inside a name are fine.
pub fn validate_artifact_name(name: &str) -> Result<(), ResolveError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.contains('/') || name.contains('\\') {
        Some("name contains a path separator")
    } else if name == "." || name == ".." {
        Some("name is a directory reference")
    } else if name.contains('\0') {
        Some("name contains a NUL byte")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ResolveError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Artifact store backed by a flat directory of image files.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, ResolveError> {
        validate_artifact_name(name)?;
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn list(&self) -> Result<Vec<ArtifactDescriptor>, UpstreamError> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(root = %self.root.display(), "Artifact directory missing, listing as empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(UpstreamError::io("list artifacts", e)),
        };

        let mut artifacts = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| UpstreamError::io("list artifacts", e))?
        {
            let Ok(filename) = entry.file_name().into_string() else {
                continue;
            };
            if !ArtifactDescriptor::is_image_name(&filename) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(filename = %filename, error = %e, "Skipping unreadable artifact");
                    continue;
                }
            };
            artifacts.push(ArtifactDescriptor::new(
                filename,
                metadata.len(),
                ArtifactLocation::Path(entry.path()),
            ));
        }

        artifacts.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(artifacts)
    }

    async fn exists(&self, name: &str) -> Result<bool, ResolveError> {
        let path = self.path_for(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ResolveError::Io {
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn read_bytes(&self, name: &str) -> Result<Vec<u8>, ResolveError> {
        let path = self.path_for(name)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => ResolveError::not_found(name),
            _ => ResolveError::Io {
                name: name.to_string(),
                reason: e.to_string(),
            },
        })
    }
}
