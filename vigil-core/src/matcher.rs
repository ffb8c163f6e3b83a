//! Record/artifact matching.
//!
//! Anomaly records and evidence images share no key. They are joined through
//! a naming convention: the detector writes each flagged frame to
//! `video_Test{n}_frame{frame:05}_error{error}.jpg`, where `n` is the record's
//! folder with the `video_` prefix removed. Matching recomputes that name for
//! every record and compares it to the artifact's filename.
//!
//! Tie-break: when several records derive the same filename, the first one in
//! the supplied (upstream log) order wins. Such collisions are counted by
//! [`RecordIndex`] so callers can flag them.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::artifact::ArtifactDescriptor;
use crate::record::{AnomalyRecord, TxData};

/// Folder prefix required for a record to participate in matching.
pub const FOLDER_PREFIX: &str = "video_";

/// Derive the evidence filename for a record's fields.
///
/// Returns `None` for folders lacking [`FOLDER_PREFIX`]; such records never
/// match anything.
pub fn expected_name(folder: &str, frame: u64, error: &str) -> Option<String> {
    let suffix = folder.strip_prefix(FOLDER_PREFIX)?;
    Some(format!("video_Test{suffix}_frame{frame:05}_error{error}.jpg"))
}

/// An artifact paired with the record that produced it, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactMatch<'a> {
    pub artifact: &'a ArtifactDescriptor,
    pub record: Option<&'a AnomalyRecord>,
}

impl<'a> ArtifactMatch<'a> {
    pub fn is_matched(&self) -> bool {
        self.record.is_some()
    }

    /// The record, or the unmatched sentinel.
    pub fn tx_data(&self) -> TxData {
        TxData::from_match(self.record)
    }
}

/// Linear matcher: for each artifact, scan records in order and take the
/// first whose derived name equals the filename.
///
/// O(records x artifacts). See [`RecordIndex`] for the indexed equivalent.
pub fn match_artifacts<'a>(
    records: &'a [AnomalyRecord],
    artifacts: &'a [ArtifactDescriptor],
) -> Vec<ArtifactMatch<'a>> {
    artifacts
        .iter()
        .map(|artifact| {
            let record = records
                .iter()
                .find(|record| record.expected_name().as_deref() == Some(artifact.filename.as_str()));
            ArtifactMatch { artifact, record }
        })
        .collect()
}

/// Records indexed by derived filename, keeping the first record per name.
#[derive(Debug, Clone, Default)]
pub struct RecordIndex<'a> {
    by_name: HashMap<String, &'a AnomalyRecord>,
    collisions: usize,
}

impl<'a> RecordIndex<'a> {
    pub fn build(records: &'a [AnomalyRecord]) -> Self {
        let mut by_name = HashMap::with_capacity(records.len());
        let mut collisions = 0;
        for record in records {
            let Some(name) = record.expected_name() else {
                continue;
            };
            match by_name.entry(name) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
                Entry::Occupied(_) => collisions += 1,
            }
        }
        Self {
            by_name,
            collisions,
        }
    }

    pub fn lookup(&self, filename: &str) -> Option<&'a AnomalyRecord> {
        self.by_name.get(filename).copied()
    }

    /// Number of records shadowed by an earlier record with the same
    /// derived filename.
    pub fn collisions(&self) -> usize {
        self.collisions
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Same result as [`match_artifacts`] in O(records + artifacts).
    pub fn match_artifacts<'b>(&self, artifacts: &'b [ArtifactDescriptor]) -> Vec<ArtifactMatch<'b>>
    where
        'a: 'b,
    {
        artifacts
            .iter()
            .map(|artifact| ArtifactMatch {
                artifact,
                record: self.lookup(&artifact.filename),
            })
            .collect()
    }
}
