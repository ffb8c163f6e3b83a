//! VIGIL Test Utilities
//!
//! Shared test infrastructure for the VIGIL workspace:
//! - Scripted upstream sources and in-memory artifact stores
//! - Proptest generators for records and artifact names
//! - Fixtures for the common dashboard scenarios
//! - Assertions on the error taxonomy

pub use vigil_core::{
    AnomalyRecord, ArtifactDescriptor, ArtifactLocation, ResolveError, Timestamp, UpstreamError,
};
pub use vigil_storage::ArtifactStore;
pub use vigil_upstream::{BestEffort, RecordSource};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MOCK UPSTREAMS
// ============================================================================

/// Record source answering from memory, with scriptable failures.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    records: Mutex<Vec<AnomalyRecord>>,
    failing: Mutex<BTreeSet<u64>>,
    count_error: Mutex<Option<UpstreamError>>,
    disconnected: AtomicBool,
    count_calls: AtomicU32,
    record_calls: AtomicU32,
}

impl ScriptedSource {
    pub fn new(records: Vec<AnomalyRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Make `record_at(index)` fail with a decode error.
    pub fn with_failing_index(self, index: u64) -> Self {
        lock(&self.failing).insert(index);
        self
    }

    /// Make `count()` fail until [`ScriptedSource::recover`] is called.
    pub fn fail_count(&self, error: UpstreamError) {
        *lock(&self.count_error) = Some(error);
    }

    pub fn recover(&self) {
        *lock(&self.count_error) = None;
    }

    pub fn push_record(&self, record: AnomalyRecord) {
        lock(&self.records).push(record);
    }

    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::SeqCst);
    }

    pub fn count_calls(&self) -> u32 {
        self.count_calls.load(Ordering::SeqCst)
    }

    pub fn record_calls(&self) -> u32 {
        self.record_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn count(&self) -> Result<u64, UpstreamError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.count_error).clone() {
            return Err(error);
        }
        Ok(lock(&self.records).len() as u64)
    }

    async fn record_at(&self, index: u64) -> Result<AnomalyRecord, UpstreamError> {
        self.record_calls.fetch_add(1, Ordering::SeqCst);
        if lock(&self.failing).contains(&index) {
            return Err(UpstreamError::decode(
                "getAnomaly",
                format!("scripted failure at index {index}"),
            ));
        }
        usize::try_from(index)
            .ok()
            .and_then(|i| lock(&self.records).get(i).cloned())
            .ok_or_else(|| UpstreamError::decode("getAnomaly", format!("no record at {index}")))
    }

    async fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }
}

/// Artifact store backed by an in-memory map.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    list_error: Mutex<Option<UpstreamError>>,
    reads: AtomicU32,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(name, bytes);
        self
    }

    pub fn insert(&self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        lock(&self.files).insert(name.into(), bytes.into());
    }

    pub fn remove(&self, name: &str) {
        lock(&self.files).remove(name);
    }

    pub fn fail_list(&self, error: UpstreamError) {
        *lock(&self.list_error) = Some(error);
    }

    /// Number of `read_bytes` calls that reached the store.
    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn list(&self) -> Result<Vec<ArtifactDescriptor>, UpstreamError> {
        if let Some(error) = lock(&self.list_error).clone() {
            return Err(error);
        }
        Ok(lock(&self.files)
            .iter()
            .filter(|(name, _)| ArtifactDescriptor::is_image_name(name))
            .map(|(name, bytes)| {
                ArtifactDescriptor::new(
                    name.clone(),
                    bytes.len() as u64,
                    ArtifactLocation::Url(format!("memory://{name}")),
                )
            })
            .collect())
    }

    async fn exists(&self, name: &str) -> Result<bool, ResolveError> {
        Ok(lock(&self.files).contains_key(name))
    }

    async fn read_bytes(&self, name: &str) -> Result<Vec<u8>, ResolveError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        lock(&self.files)
            .get(name)
            .cloned()
            .ok_or_else(|| ResolveError::not_found(name))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for VIGIL records and artifacts.

    use super::*;
    use proptest::prelude::*;

    /// Timestamps between 2020 and 2030, whole seconds.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    /// Folder names, mostly following the `video_` convention.
    pub fn arb_folder() -> impl Strategy<Value = String> {
        prop_oneof![
            4 => (0u32..20).prop_map(|n| format!("video_{n}")),
            1 => "[a-z]{1,8}",
        ]
    }

    /// Reconstruction errors as the detector prints them.
    pub fn arb_error() -> impl Strategy<Value = String> {
        (0u32..400).prop_map(|n| format!("{:.2}", f64::from(n) / 100.0))
    }

    pub fn arb_record(index: u64) -> impl Strategy<Value = AnomalyRecord> {
        (arb_folder(), 0u64..2000, arb_error(), arb_timestamp()).prop_map(
            move |(folder, frame, error, observed_at)| {
                AnomalyRecord::new(index, folder, frame, error, observed_at)
            },
        )
    }

    /// A log of up to `max` records with sequential indices.
    pub fn arb_records(max: usize) -> impl Strategy<Value = Vec<AnomalyRecord>> {
        prop::collection::vec((arb_folder(), 0u64..2000, arb_error(), arb_timestamp()), 0..=max)
            .prop_map(|rows| {
                rows.into_iter()
                    .enumerate()
                    .map(|(i, (folder, frame, error, observed_at))| {
                        AnomalyRecord::new(i as u64, folder, frame, error, observed_at)
                    })
                    .collect()
            })
    }

    /// Artifact names drawn from the same space as [`arb_record`], so a
    /// useful fraction of them match.
    pub fn arb_artifact_name() -> impl Strategy<Value = String> {
        prop_oneof![
            3 => (0u32..20, 0u64..2000, arb_error()).prop_map(|(n, frame, error)| {
                format!("video_Test{n}_frame{frame:05}_error{error}.jpg")
            }),
            1 => "[a-z]{1,8}\\.(jpg|png)",
        ]
    }

    pub fn arb_artifacts(max: usize) -> impl Strategy<Value = Vec<ArtifactDescriptor>> {
        prop::collection::vec((arb_artifact_name(), 0u64..1_000_000), 0..=max).prop_map(|rows| {
            rows.into_iter()
                .map(|(name, size)| {
                    let url = format!("memory://{name}");
                    ArtifactDescriptor::new(name, size, ArtifactLocation::Url(url))
                })
                .collect()
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records and artifacts for common scenarios.

    use super::*;

    /// Evidence image name the detector writes for [`example_record`].
    pub const EXAMPLE_IMAGE: &str = "video_Test3_frame00042_error0.87.jpg";

    pub fn record(index: u64, folder: &str, frame: u64, error: &str) -> AnomalyRecord {
        AnomalyRecord::new(index, folder, frame, error, Utc::now())
    }

    /// `{folder: "video_3", frame: 42, error: "0.87"}`.
    pub fn example_record() -> AnomalyRecord {
        record(0, "video_3", 42, "0.87")
    }

    /// Five records, `video_1` .. `video_5`, each at frame `10 * i`.
    pub fn five_records() -> Vec<AnomalyRecord> {
        (0..5u64)
            .map(|i| record(i, &format!("video_{}", i + 1), i * 10, "0.50"))
            .collect()
    }

    pub fn artifact(name: &str, size_bytes: u64) -> ArtifactDescriptor {
        ArtifactDescriptor::new(
            name,
            size_bytes,
            ArtifactLocation::Url(format!("memory://{name}")),
        )
    }

    /// Smallest JPEG-looking payload: SOI and EOI markers.
    pub fn jpeg_bytes() -> Vec<u8> {
        vec![0xff, 0xd8, 0xff, 0xd9]
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on the VIGIL error taxonomy.

    use super::*;

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &Result<T, ResolveError>) {
        match result {
            Err(ResolveError::NotFound { .. }) => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_dropped<T>(result: &BestEffort<T>, kept: usize, dropped: u64) {
        assert_eq!(result.items.len(), kept, "wrong number of kept items");
        assert_eq!(result.dropped, dropped, "wrong number of dropped items");
    }
}
