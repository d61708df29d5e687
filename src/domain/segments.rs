use super::jobs::JobId;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A bounded slice of speech audio ready to be written to the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub job_id: JobId,
    pub sequence_index: usize,
    pub start_offset_seconds: f64,
    pub duration_seconds: f64,
    pub audio_payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentEntry {
    pub index: usize,
    pub start_offset_seconds: f64,
    pub duration_seconds: f64,
    pub output_key: String,
}

/// Per-source completion marker, written only after every segment is in the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMetadataRecord {
    pub job_id: JobId,
    pub source_key: String,
    #[serde(default)]
    pub collection: String,
    pub total_segments: usize,
    pub segments: Vec<SegmentEntry>,
    #[serde(default)]
    pub source_duration_seconds: f64,
    pub processing_timestamp: DateTime<Utc>,
    pub engine_version: String,
}

impl SegmentMetadataRecord {
    /// True when the declared count matches the entry list and indices run 0..n.
    pub fn is_consistent(&self) -> bool {
        self.total_segments == self.segments.len()
            && self
                .segments
                .iter()
                .enumerate()
                .all(|(i, entry)| entry.index == i)
    }

    /// Segment boundaries as `(start, duration)` pairs, for comparing two runs.
    pub fn boundaries(&self) -> Vec<(f64, f64)> {
        self.segments
            .iter()
            .map(|s| (s.start_offset_seconds, s.duration_seconds))
            .collect()
    }
}

/// Deterministic sink layout. Keys depend only on the job id and sequence index,
/// so a retried job overwrites exactly the objects its previous attempt wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkLayout {
    prefix: String,
}

impl SinkLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        let trimmed = prefix.trim_matches('/').to_string();
        prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        };
        Self { prefix }
    }

    pub fn job_prefix(&self, job_id: &JobId) -> String {
        format!("{}{}/", self.prefix, job_id)
    }

    pub fn segment_key(&self, job_id: &JobId, sequence_index: usize) -> String {
        format!("{}segment_{:05}.wav", self.job_prefix(job_id), sequence_index)
    }

    pub fn metadata_key(&self, job_id: &JobId) -> String {
        format!("{}metadata.json", self.job_prefix(job_id))
    }

    /// Sequence index encoded in `key`, if it is a segment key of `job_id`.
    pub fn segment_index(&self, job_id: &JobId, key: &str) -> Option<usize> {
        key.strip_prefix(&self.job_prefix(job_id))?
            .strip_prefix("segment_")?
            .strip_suffix(".wav")?
            .parse()
            .ok()
    }
}
