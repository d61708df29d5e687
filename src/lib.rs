//! stt-splitter - Speech segmentation pipeline for STT corpora
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (audio, jobs, segments, fleet)
//! - ports/: Trait definitions
//! - adapters/: Concrete implementations (aws, memory, local)
//! - application/: Generic services (catalog, scheduler, engine, worker, autoscaler)
//! - config: Environment configuration
//!
//! # Features
//! - `aws`: S3, SQS, DynamoDB and Auto Scaling adapters
//! - `cli`: command-line parsing for the binaries

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod ports;
pub mod signal;

pub use config::{AwsSettings, PipelineConfig};
pub use error::{Error, Result};
