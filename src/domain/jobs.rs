use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Collection name used for keys without a directory component.
pub const ROOT_COLLECTION: &str = "root";

/// A source audio file as listed from the source store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioObject {
    pub collection: String,
    pub key: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl AudioObject {
    /// Build a descriptor from a store key; the collection is the first path component.
    pub fn from_key(key: impl Into<String>, size: u64, content_hash: Option<String>) -> Self {
        let key = key.into();
        let collection = match key.split_once('/') {
            Some((head, _)) if !head.is_empty() => head.to_string(),
            _ => ROOT_COLLECTION.to_string(),
        };
        Self {
            collection,
            key,
            size,
            content_hash,
        }
    }

    pub fn job_id(&self) -> JobId {
        JobId::derive(&self.collection, &self.key)
    }

    pub fn extension(&self) -> Option<String> {
        let file_name = self.key.rsplit('/').next()?;
        let (_, ext) = file_name.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }
}

/// Deterministic job identity: the same collection and key always yield the same id,
/// which makes scheduling idempotent and output keys stable across retries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn derive(collection: &str, key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(collection.as_bytes());
        hasher.update(b"/");
        hasher.update(key.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        JobId(digest[..32].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        JobId(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub object: AudioObject,
    /// Number of deliveries so far, filled in from the queue's receive count.
    #[serde(default)]
    pub attempt_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(object: AudioObject, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            job_id: object.job_id(),
            object,
            attempt_count: 0,
            enqueued_at,
        }
    }
}

/// A received message: the job plus the handle needed to ack or extend it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub job: Job,
    pub receipt: String,
    pub receive_count: u32,
}

/// Payload written to the dead-letter destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub job: Job,
    pub reason: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Approximate visible (waiting) messages.
    pub visible: usize,
    /// Received but not yet deleted.
    pub in_flight: usize,
    pub delayed: usize,
}
