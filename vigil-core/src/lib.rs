//! VIGIL Core - Records, Artifacts and Matching
//!
//! Pure data structures and the deterministic record/artifact matcher.
//! No I/O happens in this crate; everything that talks to an upstream lives
//! in `vigil-upstream`, and everything that caches lives in `vigil-storage`.

pub mod artifact;
pub mod error;
pub mod matcher;
pub mod record;

use chrono::{DateTime, Utc};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub use artifact::{ArtifactDescriptor, ArtifactLocation, IMAGE_EXTENSIONS};
pub use error::{
    ConfigError, ConnectionError, ResolveError, UpstreamError, VigilError, VigilResult,
};
pub use matcher::{expected_name, match_artifacts, ArtifactMatch, RecordIndex, FOLDER_PREFIX};
pub use record::{AnomalyRecord, TxData, UnmatchedRecord};
