use crate::domain::jobs::{AudioObject, Job};
use crate::domain::segments::{SegmentMetadataRecord, SinkLayout};
use crate::error::Result;
use crate::ports::ledger::JobLedger;
use crate::ports::queue::JobQueuePort;
use crate::ports::storage::OutputStore;
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleOptions {
    /// Report what would be enqueued without touching the queue or the ledger.
    pub dry_run: bool,
    /// Enqueue even when the ledger or the sink says the job was already done.
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleReport {
    pub listed: usize,
    pub enqueued: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Distinct jobs a dry run would have considered for publishing.
    pub would_enqueue: usize,
    /// Listing error that cut the batch short; the counts cover what ran before it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl ScheduleReport {
    pub fn is_complete(&self) -> bool {
        self.aborted.is_none() && self.failed == 0
    }
}

/// Turns catalog entries into queue messages, at most once per job id.
pub struct JobScheduler<Q, L, O> {
    queue: Q,
    ledger: L,
    sink: O,
    layout: SinkLayout,
}

impl<Q, L, O> JobScheduler<Q, L, O>
where
    Q: JobQueuePort,
    L: JobLedger,
    O: OutputStore,
{
    pub fn new(queue: Q, ledger: L, sink: O, layout: SinkLayout) -> Self {
        Self {
            queue,
            ledger,
            sink,
            layout,
        }
    }

    /// Publish a job per listed object. A failed publish is counted and the
    /// batch continues; a listing error stops the batch and is recorded in
    /// [`ScheduleReport::aborted`] next to the counts reached so far.
    pub async fn schedule<St>(&self, objects: St, options: ScheduleOptions) -> Result<ScheduleReport>
    where
        St: Stream<Item = Result<AudioObject>>,
    {
        let mut report = ScheduleReport::default();
        let mut seen = HashSet::new();
        futures::pin_mut!(objects);

        while let Some(object) = objects.next().await {
            let object = match object {
                Ok(object) => object,
                Err(e) => {
                    error!(
                        error = %e,
                        listed = report.listed,
                        enqueued = report.enqueued,
                        "catalog listing failed, batch aborted"
                    );
                    report.aborted = Some(e.to_string());
                    break;
                }
            };
            report.listed += 1;

            let job = Job::new(object, Utc::now());
            if !seen.insert(job.job_id.clone()) {
                if !options.dry_run {
                    report.skipped += 1;
                }
                continue;
            }
            if options.dry_run {
                report.would_enqueue += 1;
                debug!(job_id = %job.job_id, key = %job.object.key, "dry run: would enqueue");
                continue;
            }

            match self.publish(&job, options.force).await {
                Ok(true) => report.enqueued += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(job_id = %job.job_id, key = %job.object.key, error = %e, "failed to schedule job");
                    report.failed += 1;
                }
            }
        }

        info!(
            listed = report.listed,
            enqueued = report.enqueued,
            skipped = report.skipped,
            failed = report.failed,
            dry_run = options.dry_run,
            "scheduling finished"
        );
        Ok(report)
    }

    /// Returns `Ok(false)` when the job is skipped as a duplicate.
    async fn publish(&self, job: &Job, force: bool) -> Result<bool> {
        if !force {
            if self.is_completed(job).await? {
                debug!(job_id = %job.job_id, "already completed in sink");
                return Ok(false);
            }
            if !self.ledger.register(&job.job_id).await? {
                debug!(job_id = %job.job_id, "already registered in ledger");
                return Ok(false);
            }
        }

        if let Err(e) = self.queue.send(job).await {
            if !force {
                if let Err(release) = self.ledger.release(&job.job_id).await {
                    warn!(job_id = %job.job_id, error = %release, "failed to release ledger entry");
                }
            }
            return Err(e);
        }
        Ok(true)
    }

    async fn is_completed(&self, job: &Job) -> Result<bool> {
        let key = self.layout.metadata_key(&job.job_id);
        let Some(value) = self.sink.get_json(&key).await? else {
            return Ok(false);
        };
        Ok(serde_json::from_value::<SegmentMetadataRecord>(value)
            .map(|record| record.is_consistent())
            .unwrap_or(false))
    }
}
