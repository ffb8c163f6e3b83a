//! Evidence image storage and resolution.

mod resolver;
mod store;

pub use resolver::{content_type_for, EncodedArtifact, ImageResolver, Resolved};
pub use store::{validate_artifact_name, ArtifactStore, LocalArtifactStore};
