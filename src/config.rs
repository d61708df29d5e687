//! Environment configuration.
//!
//! Every knob has a default; only the AWS resource names are required, and
//! only by the binaries that talk to AWS. A `.env` file is honored.

use crate::application::autoscaler::AutoscalerSettings;
use crate::application::engine::EngineSettings;
use crate::application::worker::WorkerSettings;
use crate::domain::audio::convert::FfmpegConverter;
use crate::domain::audio::{DetectorSettings, ForceSplitPolicy, SegmentPolicy};
use crate::domain::fleet::ScalingPolicy;
use crate::domain::segments::SinkLayout;
use crate::error::{Error, Result};
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Longest long-poll SQS accepts.
const MAX_POLL_WAIT_SECONDS: f64 = 20.0;

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unset and blank variables are treated the same.
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw(key) {
            Some(value) => value
                .parse()
                .map_err(|e: T::Err| Error::config(key, format!("'{value}': {e}"))),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool> {
        match self.raw(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(v) => Err(Error::config(key, format!("'{v}' is not a boolean"))),
        }
    }

    fn seconds(&self, key: &str, default: f64) -> Result<Duration> {
        let seconds: f64 = self.parse(key, default)?;
        Duration::try_from_secs_f64(seconds).map_err(|e| Error::config(key, e.to_string()))
    }

    fn required(&self, key: &str) -> Result<String> {
        self.raw(key)
            .ok_or_else(|| Error::config(key, "required but not set"))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub settings: WorkerSettings,
    /// Visibility timeout the queue applies on receive.
    pub visibility_timeout: Duration,
    pub health_addr: SocketAddr,
}

/// Everything the pipeline needs besides the AWS resource names.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub detector: DetectorSettings,
    pub engine: EngineSettings,
    pub worker: WorkerConfig,
    pub scaling: AutoscalerSettings,
}

impl PipelineConfig {
    /// Load from the process environment, after reading `.env` if present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let policy = SegmentPolicy {
            max_segment_seconds: env.parse("MAX_SEGMENT_SECONDS", 30.0)?,
            min_silence_gap_seconds: env.parse("MIN_SILENCE_GAP_SECONDS", 0.3)?,
            min_segment_seconds: env.parse("MIN_SEGMENT_SECONDS", 0.0)?,
            force_split: ForceSplitPolicy {
                search_window_seconds: env.parse("FORCE_SPLIT_SEARCH_SECONDS", 1.0)?,
                dip_ratio: env.parse("FORCE_SPLIT_DIP_RATIO", 0.5)?,
                tie_break: env.parse("FORCE_SPLIT_TIE_BREAK", Default::default())?,
            },
        };

        let detector = DetectorSettings {
            threshold: env.parse("VAD_THRESHOLD", 0.02)?,
            frame_ms: env.parse("VAD_FRAME_MS", 10)?,
            min_speech_seconds: env.parse("VAD_MIN_SPEECH_SECONDS", 0.25)?,
            min_silence_seconds: env.parse("VAD_MIN_SILENCE_SECONDS", 0.2)?,
        };

        let engine = EngineSettings {
            policy,
            format: env.parse("SEGMENT_FORMAT", Default::default())?,
            layout: SinkLayout::new(env.raw("OUTPUT_PREFIX").unwrap_or_default()),
            skip_completed: env.flag("SKIP_COMPLETED", false)?,
            converter: FfmpegConverter::new(
                env.raw("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
            ),
        };

        let poll_wait: f64 = env.parse("POLL_WAIT_SECONDS", MAX_POLL_WAIT_SECONDS)?;
        let worker = WorkerConfig {
            concurrency: env.parse("WORKER_CONCURRENCY", 1)?,
            settings: WorkerSettings {
                poll_wait: Duration::try_from_secs_f64(poll_wait.min(MAX_POLL_WAIT_SECONDS))
                    .map_err(|e| Error::config("POLL_WAIT_SECONDS", e.to_string()))?,
                visibility_extension: env.seconds("VISIBILITY_EXTENSION_SECONDS", 900.0)?,
                heartbeat: env.seconds("HEARTBEAT_SECONDS", 300.0)?,
                max_attempts: env.parse("MAX_ATTEMPTS", 3)?,
            },
            visibility_timeout: env.seconds("VISIBILITY_TIMEOUT_SECONDS", 900.0)?,
            health_addr: env.parse("HEALTH_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
        };

        let scaling = AutoscalerSettings {
            min_count: env.parse("FLEET_MIN", 0)?,
            max_count: env.parse("FLEET_MAX", 10)?,
            poll_interval: env.seconds("SCALE_POLL_SECONDS", 30.0)?,
            policy: ScalingPolicy {
                jobs_per_worker: env.parse("JOBS_PER_WORKER", 10)?,
                scale_in_cooldown: env.seconds("SCALE_IN_COOLDOWN_SECONDS", 300.0)?,
                scale_to_zero_grace: env.seconds("SCALE_TO_ZERO_GRACE_SECONDS", 600.0)?,
            },
            observe_only: false,
        };

        let config = Self {
            detector,
            engine,
            worker,
            scaling,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let policy = &self.engine.policy;
        if !(policy.max_segment_seconds > 0.0) {
            return Err(Error::config("MAX_SEGMENT_SECONDS", "must be greater than zero"));
        }
        if !(policy.min_silence_gap_seconds >= 0.0) {
            return Err(Error::config("MIN_SILENCE_GAP_SECONDS", "must not be negative"));
        }
        if policy.min_segment_seconds > policy.max_segment_seconds {
            return Err(Error::config(
                "MIN_SEGMENT_SECONDS",
                "must not exceed MAX_SEGMENT_SECONDS",
            ));
        }
        if self.detector.frame_ms == 0 {
            return Err(Error::config("VAD_FRAME_MS", "must be greater than zero"));
        }
        if self.scaling.min_count > self.scaling.max_count {
            return Err(Error::config("FLEET_MIN", "must not exceed FLEET_MAX"));
        }
        if self.scaling.policy.jobs_per_worker == 0 {
            return Err(Error::config("JOBS_PER_WORKER", "must be at least 1"));
        }
        if self.worker.settings.max_attempts == 0 {
            return Err(Error::config("MAX_ATTEMPTS", "must be at least 1"));
        }
        if self.worker.concurrency == 0 {
            return Err(Error::config("WORKER_CONCURRENCY", "must be at least 1"));
        }
        if self.worker.settings.heartbeat >= self.worker.visibility_timeout {
            return Err(Error::config(
                "HEARTBEAT_SECONDS",
                "must be shorter than VISIBILITY_TIMEOUT_SECONDS",
            ));
        }
        // Each heartbeat resets visibility to the extension, so a shorter
        // extension would let the message reappear before the next beat.
        if self.worker.settings.heartbeat >= self.worker.settings.visibility_extension {
            return Err(Error::config(
                "VISIBILITY_EXTENSION_SECONDS",
                "must be longer than HEARTBEAT_SECONDS",
            ));
        }
        Ok(())
    }
}

/// AWS resource names, required by the AWS binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsSettings {
    pub source_bucket: String,
    pub output_bucket: String,
    pub queue_url: String,
    pub dead_letter_queue_url: Option<String>,
    pub dedup_table: Option<String>,
    pub dedup_ttl: Duration,
    pub asg_name: Option<String>,
}

impl AwsSettings {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        Ok(Self {
            source_bucket: env.required("SOURCE_BUCKET")?,
            output_bucket: env.required("OUTPUT_BUCKET")?,
            queue_url: env.required("SQS_QUEUE_URL")?,
            dead_letter_queue_url: env.raw("SQS_DEAD_LETTER_QUEUE_URL"),
            dedup_table: env.raw("DEDUP_TABLE"),
            dedup_ttl: env.seconds("DEDUP_TTL_SECONDS", 86_400.0)?,
            asg_name: env.raw("ASG_NAME"),
        })
    }

    /// The Auto Scaling group, which only the fleet binary needs.
    pub fn require_asg(&self) -> Result<&str> {
        self.asg_name
            .as_deref()
            .ok_or_else(|| Error::config("ASG_NAME", "required but not set"))
    }
}
