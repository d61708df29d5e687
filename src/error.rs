//! Error taxonomy for the pipeline.
//!
//! Every per-job failure is mapped to a [`Disposition`] at the worker boundary,
//! which decides whether the queue message is acked, left for redelivery,
//! dead-lettered, or whether the worker itself must exit.

use std::io::ErrorKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to fetch source object {key}: {message}")]
    SourceFetch { key: String, message: String },

    #[error("failed to decode audio {key}: {message}")]
    Decode { key: String, message: String },

    #[error("speech detection failed: {0}")]
    Detection(String),

    #[error("failed to write {key}: {message}")]
    SinkWrite { key: String, message: String },

    #[error("rate limited: {0}")]
    QuotaOrRateLimit(String),

    #[error("job {0} already completed")]
    ScheduleConflict(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("dedup ledger error: {0}")]
    Ledger(String),

    #[error("fleet orchestration error: {0}")]
    Fleet(String),

    #[error("catalog listing failed: {0}")]
    Catalog(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("worker task panicked: {0}")]
    WorkerPanic(String),

    #[error("invalid configuration value for {key}: {message}")]
    Config { key: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// What the worker runtime does with a message whose processing ended in an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Leave the message un-acked so it reappears after the visibility timeout.
    Retry,
    /// Route to the dead-letter destination without spending further attempts.
    DeadLetter,
    /// The work is already done; ack the message.
    Complete,
    /// The worker instance cannot continue and must exit.
    Fatal,
}

impl Error {
    pub fn disposition(&self) -> Disposition {
        match self {
            Error::Decode { .. } => Disposition::DeadLetter,
            Error::ScheduleConflict(_) => Disposition::Complete,
            Error::ResourceExhausted(_) | Error::WorkerPanic(_) => Disposition::Fatal,
            Error::Io(e) if is_exhaustion(e.kind()) => Disposition::Fatal,
            // A body we cannot parse will never parse on redelivery either.
            Error::Json(_) => Disposition::DeadLetter,
            _ => Disposition::Retry,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.disposition() == Disposition::Retry
    }

    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn sink_write(key: impl Into<String>, message: impl ToString) -> Self {
        Error::SinkWrite {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn source_fetch(key: impl Into<String>, message: impl ToString) -> Self {
        Error::SourceFetch {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn decode(key: impl Into<String>, message: impl ToString) -> Self {
        Error::Decode {
            key: key.into(),
            message: message.to_string(),
        }
    }
}

fn is_exhaustion(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::StorageFull | ErrorKind::OutOfMemory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_decode_errors_go_straight_to_dead_letter() {
        let err = Error::decode("amdo/file001.mp3", "invalid RIFF header");
        assert_eq!(err.disposition(), Disposition::DeadLetter);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let cases = vec![
            Error::source_fetch("a.wav", "connection reset"),
            Error::Detection("model returned no frames".to_string()),
            Error::sink_write("job/segment_00000.wav", "503"),
            Error::QuotaOrRateLimit("SlowDown".to_string()),
        ];
        for err in cases {
            assert_eq!(err.disposition(), Disposition::Retry, "{err}");
        }
    }

    #[test]
    fn test_conflict_is_treated_as_success() {
        let err = Error::ScheduleConflict("abc".to_string());
        assert_eq!(err.disposition(), Disposition::Complete);
    }

    #[test]
    fn test_disk_full_is_fatal() {
        let err = Error::from(io::Error::new(io::ErrorKind::StorageFull, "no space left"));
        assert_eq!(err.disposition(), Disposition::Fatal);

        let err = Error::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(err.disposition(), Disposition::Retry);
    }

    #[test]
    fn test_config_error_display() {
        let err = Error::config("MAX_SEGMENT_SECONDS", "must be positive");
        assert_eq!(
            err.to_string(),
            "invalid configuration value for MAX_SEGMENT_SECONDS: must be positive"
        );
    }
}
