//! Anomaly records as read from an upstream log.

use serde::{Deserialize, Serialize};

use crate::matcher::expected_name;
use crate::Timestamp;

/// One entry of the upstream's append-only anomaly log.
///
/// `index` is assigned by the upstream in log order and is stable. Records
/// are immutable once read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub index: u64,
    /// Source video/session identifier, e.g. `video_3`.
    pub folder: String,
    /// Frame offset within the session.
    pub frame: u64,
    /// String-encoded anomaly magnitude, kept verbatim for filename matching.
    pub error: String,
    #[serde(rename = "timestamp", with = "timestamp_format")]
    pub observed_at: Timestamp,
}

impl AnomalyRecord {
    pub fn new(
        index: u64,
        folder: impl Into<String>,
        frame: u64,
        error: impl Into<String>,
        observed_at: Timestamp,
    ) -> Self {
        Self {
            index,
            folder: folder.into(),
            frame,
            error: error.into(),
            observed_at,
        }
    }

    /// Filename of the evidence image this record would have produced, or
    /// `None` when the folder does not follow the `video_` convention.
    pub fn expected_name(&self) -> Option<String> {
        expected_name(&self.folder, self.frame, &self.error)
    }
}

/// Placeholder paired with an artifact that has no matching record.
///
/// Signals "artifact present, no provenance found". It is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnmatchedRecord {
    pub folder: &'static str,
    pub frame: u64,
    pub error: &'static str,
    pub index: i64,
}

impl UnmatchedRecord {
    pub const SENTINEL: UnmatchedRecord = UnmatchedRecord {
        folder: "Local File",
        frame: 0,
        error: "N/A",
        index: -1,
    };
}

/// The `tx_data` payload attached to an image listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TxData {
    Matched(AnomalyRecord),
    Unmatched(UnmatchedRecord),
}

impl TxData {
    pub fn from_match(record: Option<&AnomalyRecord>) -> Self {
        match record {
            Some(record) => Self::Matched(record.clone()),
            None => Self::Unmatched(UnmatchedRecord::SENTINEL),
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

/// Wire format for `observed_at`.
///
/// Serializes as `YYYY-MM-DD HH:MM:SS` (UTC). Deserialization also accepts the
/// minute-precision form some edge devices emit and RFC 3339.
pub mod timestamp_format {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::Timestamp;

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";
    const MINUTE_FORMAT: &str = "%Y-%m-%d %H:%M";

    pub fn serialize<S>(value: &Timestamp, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&value.format(FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    /// Parse any of the accepted timestamp forms.
    pub fn parse(raw: &str) -> Option<Timestamp> {
        let raw = raw.trim();
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, FORMAT) {
            return Some(naive.and_utc());
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, MINUTE_FORMAT) {
            return Some(naive.and_utc());
        }
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}
