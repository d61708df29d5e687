//! AWS Fleet Binary
//!
//! Controls the Auto Scaling group that runs `aws_worker`:
//! - `monitor`: long-running autoscaler sizing the group to queue backlog
//! - `scale`: set the desired count once
//! - `status`: print queue depth and running workers as JSON

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::time::Duration;
use stt_splitter::adapters::aws::{load_sdk_config, AsgFleet, SqsQueue};
use stt_splitter::application::autoscaler::Autoscaler;
use stt_splitter::logging::{self, LogFormat};
use stt_splitter::ports::clock::SystemClock;
use stt_splitter::ports::fleet::FleetOrchestrator;
use stt_splitter::ports::queue::JobQueuePort;
use stt_splitter::signal::shutdown_signal;
use stt_splitter::{AwsSettings, PipelineConfig, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "aws_fleet", version, about = "Size the segmentation worker fleet")]
struct Cli {
    /// Log output format (pretty or json)
    #[arg(long, global = true, env = "LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the autoscaler until interrupted
    Monitor {
        /// Seconds between control iterations (overrides SCALE_POLL_SECONDS)
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Log decisions without resizing the group
        #[arg(long)]
        observe_only: bool,
    },
    /// Set the desired worker count
    Scale {
        #[arg(long)]
        count: usize,
    },
    /// Print queue depth and current worker count
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fleet command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    let config = PipelineConfig::from_env()?;
    let aws = AwsSettings::from_env()?;
    let sdk = load_sdk_config().await;

    let fleet = AsgFleet::new(
        aws_sdk_autoscaling::Client::new(&sdk),
        aws.require_asg()?.to_string(),
    );
    let queue = SqsQueue::new(aws_sdk_sqs::Client::new(&sdk), aws.queue_url.clone());

    match command {
        Command::Monitor {
            poll_interval,
            observe_only,
        } => {
            let mut settings = config.scaling;
            if let Some(seconds) = poll_interval {
                settings.poll_interval = Duration::from_secs(seconds.max(1));
            }
            settings.observe_only |= observe_only;
            info!(
                min = settings.min_count,
                max = settings.max_count,
                poll_interval = ?settings.poll_interval,
                observe_only = settings.observe_only,
                "starting autoscaler"
            );

            let shutdown = CancellationToken::new();
            let signal_shutdown = shutdown.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                signal_shutdown.cancel();
            });
            Autoscaler::new(queue, fleet, SystemClock, settings)
                .run(shutdown)
                .await
        }
        Command::Scale { count } => {
            let max = config.scaling.max_count;
            let count = count.min(max);
            fleet.set_desired_count(count).await?;
            info!(count, "desired count set");
            Ok(())
        }
        Command::Status => {
            let stats = queue.stats().await?;
            let running = fleet.current_count().await?;
            let status = serde_json::json!({
                "visible": stats.visible,
                "in_flight": stats.in_flight,
                "delayed": stats.delayed,
                "running_workers": running,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}
