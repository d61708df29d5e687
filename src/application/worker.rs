//! Worker runtime: the per-node loop that pulls jobs off the queue.
//!
//! Each worker moves through `Idle -> Polling -> Processing -> (Acking |
//! Abandoning) -> Idle` and ends in `Stopped`. Cancellation is cooperative:
//! a token stops polling, but a job that is already processing always runs
//! to completion before the worker exits.

use crate::domain::jobs::{Delivery, JobId};
use crate::domain::segments::SegmentMetadataRecord;
use crate::error::{Disposition, Error, Result};
use crate::ports::processor::JobProcessor;
use crate::ports::queue::JobQueuePort;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Polling,
    Processing,
    Acking,
    Abandoning,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    pub poll_wait: Duration,
    /// New visibility timeout requested on every heartbeat.
    pub visibility_extension: Duration,
    pub heartbeat: Duration,
    /// Deliveries after which a failing job is dead-lettered instead of retried.
    pub max_attempts: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_wait: Duration::from_secs(20),
            visibility_extension: Duration::from_secs(900),
            heartbeat: Duration::from_secs(300),
            max_attempts: 3,
        }
    }
}

/// Live counters for one worker, shared with the health endpoint.
#[derive(Debug)]
pub struct WorkerStatus {
    worker_id: usize,
    state: Mutex<WorkerState>,
    current_job: Mutex<Option<JobId>>,
    processed: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub worker_id: usize,
    pub state: WorkerState,
    pub current_job: Option<JobId>,
    pub processed: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

impl WorkerStatus {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            state: Mutex::new(WorkerState::Idle),
            current_job: Mutex::new(None),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn set_current(&self, job: Option<JobId>) {
        *self.current_job.lock().unwrap_or_else(|e| e.into_inner()) = job;
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            worker_id: self.worker_id,
            state: self.state(),
            current_job: self
                .current_job
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

/// What a single delivery turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Empty,
    Completed { job_id: JobId, segments: usize },
    AlreadyComplete { job_id: JobId },
    Abandoned { job_id: JobId, reason: String },
    DeadLettered { job_id: JobId, reason: String },
}

pub struct WorkerRuntime<Q, P> {
    queue: Q,
    processor: Arc<P>,
    settings: WorkerSettings,
    status: Arc<WorkerStatus>,
}

impl<Q, P> WorkerRuntime<Q, P>
where
    Q: JobQueuePort,
    P: JobProcessor,
{
    pub fn new(worker_id: usize, queue: Q, processor: Arc<P>, settings: WorkerSettings) -> Self {
        Self {
            queue,
            processor,
            settings,
            status: Arc::new(WorkerStatus::new(worker_id)),
        }
    }

    pub fn status(&self) -> Arc<WorkerStatus> {
        Arc::clone(&self.status)
    }

    fn worker_id(&self) -> usize {
        self.status.worker_id
    }

    /// Poll once and handle whatever arrives. Errors are queue failures or
    /// fatal job errors; ordinary job failures come back as outcomes.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        self.status.set_state(WorkerState::Polling);
        let received = self.queue.receive(self.settings.poll_wait).await;
        self.dispatch(received).await
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(worker_id = self.worker_id(), "worker started");
        while !shutdown.is_cancelled() {
            self.status.set_state(WorkerState::Polling);
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.queue.receive(self.settings.poll_wait) => received,
            };

            match self.dispatch(received).await {
                Ok(outcome) => debug!(worker_id = self.worker_id(), ?outcome, "poll finished"),
                Err(e) if e.disposition() == Disposition::Fatal => {
                    error!(worker_id = self.worker_id(), error = %e, "fatal error, worker exiting");
                    self.status.set_state(WorkerState::Stopped);
                    return Err(e);
                }
                Err(e) => {
                    warn!(worker_id = self.worker_id(), error = %e, "queue error");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        self.status.set_state(WorkerState::Stopped);
        info!(worker_id = self.worker_id(), "worker stopped");
        Ok(())
    }

    async fn dispatch(&self, received: Result<Option<Delivery>>) -> Result<PollOutcome> {
        let delivery = match received {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                self.status.set_state(WorkerState::Idle);
                return Ok(PollOutcome::Empty);
            }
            Err(e) => {
                self.status.set_state(WorkerState::Idle);
                return Err(e);
            }
        };

        self.status.set_current(Some(delivery.job.job_id.clone()));
        let outcome = self.handle(&delivery).await;
        self.status.set_current(None);
        if self.status.state() != WorkerState::Stopped {
            self.status.set_state(WorkerState::Idle);
        }
        outcome
    }

    async fn handle(&self, delivery: &Delivery) -> Result<PollOutcome> {
        let job_id = delivery.job.job_id.clone();
        self.status.set_state(WorkerState::Processing);
        info!(
            worker_id = self.worker_id(),
            job_id = %job_id,
            attempt = delivery.receive_count,
            key = %delivery.job.object.key,
            "processing job"
        );

        let err = match self.process_with_heartbeat(delivery).await {
            Ok(record) => {
                self.ack(delivery).await?;
                self.status.processed.fetch_add(1, Ordering::Relaxed);
                return Ok(PollOutcome::Completed {
                    job_id,
                    segments: record.total_segments,
                });
            }
            Err(err) => err,
        };

        match err.disposition() {
            Disposition::Complete => {
                self.ack(delivery).await?;
                info!(job_id = %job_id, "job already complete");
                Ok(PollOutcome::AlreadyComplete { job_id })
            }
            Disposition::Fatal => {
                self.status.set_state(WorkerState::Abandoning);
                self.status.failed.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
            Disposition::DeadLetter => self.dead_letter(delivery, &err).await,
            Disposition::Retry if delivery.receive_count >= self.settings.max_attempts => {
                self.dead_letter(delivery, &err).await
            }
            Disposition::Retry => {
                self.status.set_state(WorkerState::Abandoning);
                self.status.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    job_id = %job_id,
                    attempt = delivery.receive_count,
                    error = %err,
                    "job failed, leaving it for redelivery"
                );
                Ok(PollOutcome::Abandoned {
                    job_id,
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Run the job while periodically pushing back its visibility timeout.
    async fn process_with_heartbeat(
        &self,
        delivery: &Delivery,
    ) -> Result<SegmentMetadataRecord> {
        let work = self.processor.process(&delivery.job);
        tokio::pin!(work);

        let period = self.settings.heartbeat.max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = heartbeat.tick() => {
                    match self
                        .queue
                        .extend_visibility(&delivery.receipt, self.settings.visibility_extension)
                        .await
                    {
                        Ok(()) => debug!(job_id = %delivery.job.job_id, "extended visibility"),
                        Err(e) => warn!(job_id = %delivery.job.job_id, error = %e, "failed to extend visibility"),
                    }
                }
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.status.set_state(WorkerState::Acking);
        self.queue.delete(&delivery.receipt).await
    }

    async fn dead_letter(&self, delivery: &Delivery, err: &Error) -> Result<PollOutcome> {
        self.status.set_state(WorkerState::Abandoning);
        let reason = err.to_string();
        warn!(
            job_id = %delivery.job.job_id,
            attempt = delivery.receive_count,
            reason = %reason,
            "routing job to dead-letter"
        );
        let moved = self.queue.dead_letter(delivery, &reason).await?;
        self.status.failed.fetch_add(1, Ordering::Relaxed);
        if !moved {
            // Still on the queue; its redrive policy owns it from here.
            return Ok(PollOutcome::Abandoned {
                job_id: delivery.job.job_id.clone(),
                reason,
            });
        }
        self.status.dead_lettered.fetch_add(1, Ordering::Relaxed);
        Ok(PollOutcome::DeadLettered {
            job_id: delivery.job.job_id.clone(),
            reason,
        })
    }
}

/// A set of workers sharing one queue and processor.
pub struct WorkerPool {
    statuses: Vec<Arc<WorkerStatus>>,
    tasks: JoinSet<Result<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawn `count` workers, all stopped by `shutdown`. A fatal error in any
    /// worker cancels `shutdown` so the whole instance drains and exits.
    pub fn start<Q, P>(
        count: usize,
        queue: Q,
        processor: Arc<P>,
        settings: WorkerSettings,
        shutdown: CancellationToken,
    ) -> Self
    where
        Q: JobQueuePort + Clone + 'static,
        P: JobProcessor + 'static,
    {
        let mut statuses = Vec::with_capacity(count);
        let mut tasks = JoinSet::new();
        for worker_id in 0..count.max(1) {
            let worker = WorkerRuntime::new(worker_id, queue.clone(), Arc::clone(&processor), settings);
            statuses.push(worker.status());
            let token = shutdown.clone();
            tasks.spawn(async move {
                let result = worker.run(token.clone()).await;
                if result.is_err() {
                    token.cancel();
                }
                result
            });
        }
        info!(workers = statuses.len(), "started worker pool");
        Self {
            statuses,
            tasks,
            shutdown,
        }
    }

    pub fn statuses(&self) -> Vec<Arc<WorkerStatus>> {
        self.statuses.clone()
    }

    /// Wait for every worker; returns the first fatal error, if any. A
    /// panicked worker stops the rest of the pool.
    pub async fn join(mut self) -> Result<()> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "worker task panicked, stopping pool");
                    self.shutdown.cancel();
                    Err(Error::WorkerPanic(e.to_string()))
                }
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryQueue;
    use crate::domain::jobs::{AudioObject, Job};
    use crate::ports::clock::ManualClock;
    use crate::ports::processor::MockJobProcessor;
    use crate::ports::queue::MockJobQueuePort;
    use chrono::Utc;
    use std::io;

    const TIMEOUT: Duration = Duration::from_secs(900);

    fn record(job: &Job, segments: usize) -> SegmentMetadataRecord {
        SegmentMetadataRecord {
            job_id: job.job_id.clone(),
            source_key: job.object.key.clone(),
            collection: job.object.collection.clone(),
            total_segments: segments,
            segments: Vec::new(),
            source_duration_seconds: 0.0,
            processing_timestamp: Utc::now(),
            engine_version: "test".to_string(),
        }
    }

    fn settings() -> WorkerSettings {
        WorkerSettings {
            poll_wait: Duration::ZERO,
            ..WorkerSettings::default()
        }
    }

    async fn queue_with(clock: &ManualClock, key: &str) -> MemoryQueue<ManualClock> {
        let queue = MemoryQueue::with_clock(clock.clone(), TIMEOUT);
        queue
            .send(&Job::new(AudioObject::from_key(key, 1, None), Utc::now()))
            .await
            .unwrap();
        queue
    }

    #[tokio::test]
    async fn test_success_acks_the_message() {
        let clock = ManualClock::new();
        let queue = queue_with(&clock, "amdo/a.wav").await;
        let mut processor = MockJobProcessor::new();
        processor.expect_process().returning(|job| Ok(record(job, 2)));

        let worker = WorkerRuntime::new(0, queue.clone(), Arc::new(processor), settings());
        let outcome = worker.poll_once().await.unwrap();
        assert!(matches!(outcome, PollOutcome::Completed { segments: 2, .. }));
        assert!(queue.is_empty());

        let snapshot = worker.status().snapshot();
        assert_eq!(snapshot.processed, 1);
        assert_eq!(snapshot.state, WorkerState::Idle);
        assert_eq!(snapshot.current_job, None);
    }

    #[tokio::test]
    async fn test_empty_poll() {
        let clock = ManualClock::new();
        let queue = MemoryQueue::with_clock(clock, TIMEOUT);
        let worker = WorkerRuntime::new(0, queue, Arc::new(MockJobProcessor::new()), settings());
        assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Empty);
    }

    #[tokio::test]
    async fn test_transient_failure_leaves_message_then_dead_letters() {
        let clock = ManualClock::new();
        let queue = queue_with(&clock, "amdo/flaky.wav").await;
        let mut processor = MockJobProcessor::new();
        processor
            .expect_process()
            .times(3)
            .returning(|_| Err(Error::sink_write("k", "503")));
        let worker = WorkerRuntime::new(0, queue.clone(), Arc::new(processor), settings());

        for _ in 0..2 {
            let outcome = worker.poll_once().await.unwrap();
            assert!(matches!(outcome, PollOutcome::Abandoned { .. }));
            assert_eq!(queue.len(), 1);
            assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Empty);
            clock.advance(TIMEOUT);
        }

        let outcome = worker.poll_once().await.unwrap();
        assert!(matches!(outcome, PollOutcome::DeadLettered { .. }));
        assert!(queue.is_empty());
        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);
        assert!(dead[0].reason.contains("503"));
        assert_eq!(worker.status().snapshot().dead_lettered, 1);
    }

    #[tokio::test]
    async fn test_decode_error_dead_letters_immediately() {
        let clock = ManualClock::new();
        let queue = queue_with(&clock, "amdo/corrupt.wav").await;
        let mut processor = MockJobProcessor::new();
        processor
            .expect_process()
            .times(1)
            .returning(|job| Err(Error::decode(&job.object.key, "not a RIFF file")));
        let worker = WorkerRuntime::new(0, queue.clone(), Arc::new(processor), settings());

        let outcome = worker.poll_once().await.unwrap();
        assert!(matches!(outcome, PollOutcome::DeadLettered { .. }));
        assert_eq!(queue.dead_letters()[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_conflict_is_acked_as_complete() {
        let clock = ManualClock::new();
        let queue = queue_with(&clock, "amdo/done.wav").await;
        let mut processor = MockJobProcessor::new();
        processor
            .expect_process()
            .returning(|job| Err(Error::ScheduleConflict(job.job_id.to_string())));
        let worker = WorkerRuntime::new(0, queue.clone(), Arc::new(processor), settings());

        let outcome = worker.poll_once().await.unwrap();
        assert!(matches!(outcome, PollOutcome::AlreadyComplete { .. }));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_fatal_error_keeps_message_and_propagates() {
        let clock = ManualClock::new();
        let queue = queue_with(&clock, "amdo/big.wav").await;
        let mut processor = MockJobProcessor::new();
        processor
            .expect_process()
            .returning(|_| Err(Error::Io(io::Error::new(io::ErrorKind::StorageFull, "disk full"))));
        let worker = WorkerRuntime::new(0, queue.clone(), Arc::new(processor), settings());

        let err = worker.run(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.disposition(), Disposition::Fatal);
        assert_eq!(worker.status().state(), WorkerState::Stopped);
        assert_eq!(queue.len(), 1);
        assert!(queue.dead_letters().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_extends_visibility_of_long_jobs() {
        let job = Job::new(AudioObject::from_key("amdo/long.wav", 1, None), Utc::now());
        let delivery = Delivery {
            job: job.clone(),
            receipt: "r-1".to_string(),
            receive_count: 1,
        };

        let mut queue = MockJobQueuePort::new();
        queue
            .expect_receive()
            .times(1)
            .returning(move |_| Ok(Some(delivery.clone())));
        queue
            .expect_extend_visibility()
            .withf(|receipt, timeout| receipt == "r-1" && *timeout == Duration::from_secs(900))
            .times(2)
            .returning(|_, _| Ok(()));
        queue.expect_delete().times(1).returning(|_| Ok(()));

        // Eleven minutes of paused time: two heartbeats fire before it finishes.
        struct Slow;
        #[async_trait::async_trait]
        impl JobProcessor for Slow {
            async fn process(&self, job: &Job) -> Result<SegmentMetadataRecord> {
                tokio::time::sleep(Duration::from_secs(660)).await;
                Ok(record(job, 1))
            }
        }

        let worker = WorkerRuntime::new(0, queue, Arc::new(Slow), settings());
        let outcome = worker.poll_once().await.unwrap();
        assert!(matches!(outcome, PollOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_finishes_in_flight_job() {
        let clock = ManualClock::new();
        let queue = queue_with(&clock, "amdo/a.wav").await;
        let token = CancellationToken::new();

        struct CancelsMidJob(CancellationToken);
        #[async_trait::async_trait]
        impl JobProcessor for CancelsMidJob {
            async fn process(&self, job: &Job) -> Result<SegmentMetadataRecord> {
                self.0.cancel();
                tokio::task::yield_now().await;
                Ok(record(job, 1))
            }
        }

        let worker = WorkerRuntime::new(
            0,
            queue.clone(),
            Arc::new(CancelsMidJob(token.clone())),
            settings(),
        );
        worker.run(token).await.unwrap();
        assert!(queue.is_empty());
        let snapshot = worker.status().snapshot();
        assert_eq!(snapshot.processed, 1);
        assert_eq!(snapshot.state, WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_dead_letter_without_destination_is_not_counted() {
        let job = Job::new(AudioObject::from_key("amdo/corrupt.wav", 1, None), Utc::now());
        let delivery = Delivery {
            job,
            receipt: "r-1".to_string(),
            receive_count: 1,
        };
        let mut queue = MockJobQueuePort::new();
        queue
            .expect_receive()
            .returning(move |_| Ok(Some(delivery.clone())));
        queue.expect_dead_letter().times(1).returning(|_, _| Ok(false));
        queue.expect_delete().never();

        let mut processor = MockJobProcessor::new();
        processor
            .expect_process()
            .returning(|job| Err(Error::decode(&job.object.key, "not a RIFF file")));
        let worker = WorkerRuntime::new(0, queue, Arc::new(processor), settings());

        let outcome = worker.poll_once().await.unwrap();
        assert!(matches!(outcome, PollOutcome::Abandoned { .. }));
        let snapshot = worker.status().snapshot();
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.dead_lettered, 0);
    }

    #[tokio::test]
    async fn test_panicking_worker_stops_the_pool() {
        let queue = MemoryQueue::new(TIMEOUT);
        queue
            .send(&Job::new(AudioObject::from_key("amdo/a.wav", 1, None), Utc::now()))
            .await
            .unwrap();

        struct Panics;
        #[async_trait::async_trait]
        impl JobProcessor for Panics {
            async fn process(&self, _job: &Job) -> Result<SegmentMetadataRecord> {
                panic!("decoder state corrupted");
            }
        }

        let token = CancellationToken::new();
        let pool = WorkerPool::start(
            2,
            queue,
            Arc::new(Panics),
            WorkerSettings {
                poll_wait: Duration::from_millis(10),
                ..WorkerSettings::default()
            },
            token.clone(),
        );
        let err = pool.join().await.unwrap_err();
        assert!(matches!(err, Error::WorkerPanic(_)));
        assert_eq!(err.disposition(), Disposition::Fatal);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_pool_drains_queue_and_stops() {
        let queue = MemoryQueue::new(TIMEOUT);
        for i in 0..6 {
            queue
                .send(&Job::new(
                    AudioObject::from_key(format!("amdo/{i}.wav"), 1, None),
                    Utc::now(),
                ))
                .await
                .unwrap();
        }
        let mut processor = MockJobProcessor::new();
        processor.expect_process().times(6).returning(|job| Ok(record(job, 1)));

        let token = CancellationToken::new();
        let pool = WorkerPool::start(
            3,
            queue.clone(),
            Arc::new(processor),
            WorkerSettings {
                poll_wait: Duration::from_millis(10),
                ..WorkerSettings::default()
            },
            token.clone(),
        );
        let statuses = pool.statuses();
        assert_eq!(statuses.len(), 3);

        for _ in 0..200 {
            if queue.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        token.cancel();
        pool.join().await.unwrap();

        assert!(queue.is_empty());
        let processed: u64 = statuses.iter().map(|s| s.snapshot().processed).sum();
        assert_eq!(processed, 6);
        assert!(statuses.iter().all(|s| s.state() == WorkerState::Stopped));
    }
}
