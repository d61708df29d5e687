//! AWS Worker Binary
//!
//! Long-running process on each fleet instance that:
//! 1. Connects to AWS services (S3, SQS).
//! 2. Runs a pool of workers that segment one source file per queue message.
//! 3. Serves `/health` and `/status` until every worker has stopped.
//!
//! Environment Variables:
//! - SOURCE_BUCKET, OUTPUT_BUCKET: raw audio and segment buckets
//! - SQS_QUEUE_URL, SQS_DEAD_LETTER_QUEUE_URL: job queue and optional dead-letter queue
//! - see `PipelineConfig` for the segmentation and worker knobs

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use stt_splitter::adapters::aws::{load_sdk_config, S3Store, SqsQueue};
use stt_splitter::application::engine::SegmentationEngine;
use stt_splitter::application::health;
use stt_splitter::application::worker::WorkerPool;
use stt_splitter::domain::audio::EnergyDetector;
use stt_splitter::logging::{self, LogFormat};
use stt_splitter::signal::shutdown_signal;
use stt_splitter::{AwsSettings, PipelineConfig, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "aws_worker", version, about = "Segment queued audio files into speech chunks")]
struct Args {
    /// Log output format (pretty or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    /// Number of concurrent workers (overrides WORKER_CONCURRENCY)
    #[arg(long)]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.log_format);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "worker exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = PipelineConfig::from_env()?;
    let aws = AwsSettings::from_env()?;
    let sdk = load_sdk_config().await;

    let s3 = aws_sdk_s3::Client::new(&sdk);
    let source = S3Store::new(s3.clone(), aws.source_bucket.clone());
    let sink = S3Store::new(s3, aws.output_bucket.clone());
    let queue = SqsQueue::new(aws_sdk_sqs::Client::new(&sdk), aws.queue_url.clone())
        .with_dead_letter_queue(aws.dead_letter_queue_url.clone())
        .with_visibility_timeout(config.worker.visibility_timeout);

    let engine = Arc::new(SegmentationEngine::new(
        source,
        sink,
        EnergyDetector::new(config.detector),
        config.engine.clone(),
    ));

    let shutdown = CancellationToken::new();
    let concurrency = args.concurrency.unwrap_or(config.worker.concurrency);
    let pool = WorkerPool::start(
        concurrency,
        queue,
        engine,
        config.worker.settings,
        shutdown.clone(),
    );

    let app = health::router(pool.statuses());
    let listener = tokio::net::TcpListener::bind(config.worker.health_addr).await?;
    info!(addr = %config.worker.health_addr, "health endpoint listening");
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_shutdown.cancel();
    });

    let result = pool.join().await;
    shutdown.cancel();
    match server.await {
        Ok(Err(e)) => warn!(error = %e, "health server failed"),
        Err(e) => warn!(error = %e, "health server task failed"),
        Ok(Ok(())) => {}
    }
    result
}
