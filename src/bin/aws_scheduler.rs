//! AWS Scheduler Binary
//!
//! One-shot batch: lists the source bucket and publishes one job per audio
//! file to SQS. Jobs already registered in the DynamoDB ledger (when
//! DEDUP_TABLE is set) or already completed in the output bucket are skipped.
//! Prints the batch report as JSON on stdout.

use clap::Parser;
use regex::Regex;
use std::process::ExitCode;
use stt_splitter::adapters::aws::{load_sdk_config, DynamoLedger, S3Store, SqsQueue};
use stt_splitter::adapters::memory::MemoryLedger;
use stt_splitter::application::catalog::{CatalogLister, CatalogQuery};
use stt_splitter::application::scheduler::{JobScheduler, ScheduleOptions, ScheduleReport};
use stt_splitter::domain::segments::SinkLayout;
use stt_splitter::logging::{self, LogFormat};
use stt_splitter::ports::ledger::JobLedger;
use stt_splitter::{AwsSettings, PipelineConfig, Result};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "aws_scheduler", version, about = "Enqueue segmentation jobs for a catalog")]
struct Args {
    /// Collection (top-level prefix) to include; repeat for several. All when omitted.
    #[arg(long = "collection", value_name = "NAME")]
    collections: Vec<String>,

    /// Skip this many matching files first
    #[arg(long, default_value_t = 0)]
    offset: usize,

    /// Stop after this many matching files
    #[arg(long)]
    limit: Option<usize>,

    /// Only keys matching this regular expression
    #[arg(long)]
    pattern: Option<Regex>,

    /// Accept every extension, not only the known audio ones
    #[arg(long)]
    any_extension: bool,

    /// Report what would be enqueued without publishing
    #[arg(long)]
    dry_run: bool,

    /// Re-enqueue jobs the ledger or the output bucket already know about
    #[arg(long)]
    force: bool,

    /// Log output format (pretty or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.log_format);

    match run(args).await {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                println!("{json}");
                if report.is_complete() {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                }
            }
            Err(e) => {
                error!(error = %e, "failed to render report");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!(error = %e, "scheduling failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ScheduleReport> {
    let config = PipelineConfig::from_env()?;
    let aws = AwsSettings::from_env()?;
    let sdk = load_sdk_config().await;

    let s3 = aws_sdk_s3::Client::new(&sdk);
    let source = S3Store::new(s3.clone(), aws.source_bucket.clone());
    let sink = S3Store::new(s3, aws.output_bucket.clone());
    let queue = SqsQueue::new(aws_sdk_sqs::Client::new(&sdk), aws.queue_url.clone());

    let mut query = CatalogQuery::default()
        .collections(args.collections.iter().cloned())
        .offset(args.offset)
        .limit(args.limit)
        .key_pattern(args.pattern.clone());
    if args.any_extension {
        query = query.any_extension();
    }
    let options = ScheduleOptions {
        dry_run: args.dry_run,
        force: args.force,
    };
    info!(
        bucket = %aws.source_bucket,
        collections = ?args.collections,
        dry_run = options.dry_run,
        "scheduling batch"
    );

    let lister = CatalogLister::new(source);
    let layout = config.engine.layout.clone();
    match aws.dedup_table.clone() {
        Some(table) => {
            let ledger = DynamoLedger::new(
                aws_sdk_dynamodb::Client::new(&sdk),
                table,
                aws.dedup_ttl,
            );
            schedule_with(&lister, query, queue, ledger, sink, layout, options).await
        }
        None => {
            warn!("DEDUP_TABLE not set, duplicates are only suppressed within this batch");
            let ledger = MemoryLedger::new();
            schedule_with(&lister, query, queue, ledger, sink, layout, options).await
        }
    }
}

async fn schedule_with<L: JobLedger>(
    lister: &CatalogLister<S3Store>,
    query: CatalogQuery,
    queue: SqsQueue,
    ledger: L,
    sink: S3Store,
    layout: SinkLayout,
    options: ScheduleOptions,
) -> Result<ScheduleReport> {
    let scheduler = JobScheduler::new(queue, ledger, sink, layout);
    scheduler.schedule(lister.list(query), options).await
}
