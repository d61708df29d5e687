//! Local Binary - single-node run against plain directories
//!
//! Lists audio files under `--input`, queues them in memory and segments them
//! one by one into `--output`, using the same scheduler, worker and engine as
//! the AWS deployment. Jobs already completed in the output tree are skipped.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use stt_splitter::adapters::local::FsStore;
use stt_splitter::adapters::memory::{MemoryLedger, MemoryQueue};
use stt_splitter::application::catalog::{CatalogLister, CatalogQuery};
use stt_splitter::application::engine::SegmentationEngine;
use stt_splitter::application::scheduler::{JobScheduler, ScheduleOptions};
use stt_splitter::application::worker::{PollOutcome, WorkerRuntime, WorkerSettings};
use stt_splitter::domain::audio::EnergyDetector;
use stt_splitter::logging::{self, LogFormat};
use stt_splitter::{Error, PipelineConfig, Result};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "local_segment", version, about = "Segment a directory of audio files")]
struct Args {
    /// Source tree; first-level directories are collections
    #[arg(long)]
    input: PathBuf,

    /// Output tree for segments and metadata records
    #[arg(long)]
    output: PathBuf,

    #[arg(long = "collection", value_name = "NAME")]
    collections: Vec<String>,

    #[arg(long)]
    limit: Option<usize>,

    /// Re-segment files that already have a metadata record
    #[arg(long)]
    force: bool,

    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.log_format);

    match run(args).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            warn!(failed, "some files could not be segmented");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "local run failed");
            ExitCode::FAILURE
        }
    }
}

/// Returns the number of dead-lettered files.
async fn run(args: Args) -> Result<usize> {
    let config = PipelineConfig::from_env()?;
    let source = FsStore::new(&args.input);
    let sink = FsStore::new(&args.output);
    let queue = MemoryQueue::new(config.worker.visibility_timeout);

    let scheduler = JobScheduler::new(
        queue.clone(),
        MemoryLedger::new(),
        sink.clone(),
        config.engine.layout.clone(),
    );
    let lister = CatalogLister::new(source.clone());
    let query = CatalogQuery::default()
        .collections(args.collections.iter().cloned())
        .limit(args.limit);
    let options = ScheduleOptions {
        dry_run: false,
        force: args.force,
    };
    let report = scheduler.schedule(lister.list(query), options).await?;
    info!(
        listed = report.listed,
        enqueued = report.enqueued,
        skipped = report.skipped,
        "queued local files"
    );
    if let Some(reason) = report.aborted {
        return Err(Error::Catalog(reason));
    }

    let engine = SegmentationEngine::new(
        source,
        sink,
        EnergyDetector::new(config.detector),
        config.engine.clone(),
    );
    // No redelivery locally: a failed file is reported once and left behind.
    let settings = WorkerSettings {
        poll_wait: Duration::ZERO,
        max_attempts: 1,
        ..config.worker.settings
    };
    let worker = WorkerRuntime::new(0, queue.clone(), Arc::new(engine), settings);

    let mut segments = 0;
    loop {
        match worker.poll_once().await? {
            PollOutcome::Empty => break,
            PollOutcome::Completed { segments: n, .. } => segments += n,
            _ => {}
        }
    }

    let dead = queue.dead_letters();
    for letter in &dead {
        warn!(key = %letter.job.object.key, reason = %letter.reason, "file failed");
    }
    info!(segments, failed = dead.len(), "local run finished");
    Ok(dead.len())
}
