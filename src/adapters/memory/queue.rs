use crate::domain::jobs::{DeadLetter, Delivery, Job, QueueStats};
use crate::error::{Error, Result};
use crate::ports::clock::{Clock, SystemClock};
use crate::ports::queue::JobQueuePort;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[derive(Debug)]
struct Message {
    id: u64,
    job: Job,
    receive_count: u32,
    visible_at: Instant,
    receipt: Option<String>,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    messages: Vec<Message>,
    dead_letters: Vec<DeadLetter>,
}

/// In-process queue with SQS semantics: visibility timeouts, receive counts
/// and a redrive policy. All timing goes through the injected [`Clock`].
#[derive(Clone)]
pub struct MemoryQueue<C = SystemClock> {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    clock: C,
    visibility_timeout: Duration,
    max_receives: Option<u32>,
}

impl MemoryQueue<SystemClock> {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self::with_clock(SystemClock, visibility_timeout)
    }
}

impl<C: Clock> MemoryQueue<C> {
    pub fn with_clock(clock: C, visibility_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
            clock,
            visibility_timeout,
            max_receives: None,
        }
    }

    /// Move a message to the dead-letter list once it becomes visible after
    /// `max_receives` deliveries.
    pub fn with_max_receives(mut self, max_receives: u32) -> Self {
        self.max_receives = Some(max_receives.max(1));
        self
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().dead_letters.clone()
    }

    /// Messages still owned by the queue, visible or in flight.
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn redrive(&self, state: &mut QueueState, now: Instant) {
        let Some(limit) = self.max_receives else {
            return;
        };
        let (expired, kept): (Vec<Message>, Vec<Message>) = std::mem::take(&mut state.messages)
            .into_iter()
            .partition(|m| m.visible_at <= now && m.receive_count >= limit);
        state.messages = kept;
        for message in expired {
            tracing::warn!(
                job_id = %message.job.job_id,
                receives = message.receive_count,
                "message exceeded max receives, moving to dead-letter"
            );
            state.dead_letters.push(DeadLetter {
                reason: format!("exceeded max receive count ({limit})"),
                attempts: message.receive_count,
                failed_at: Utc::now(),
                job: message.job,
            });
        }
    }

    fn try_receive(&self) -> Option<Delivery> {
        let now = self.clock.now();
        let mut state = self.lock();
        self.redrive(&mut state, now);

        let message = state
            .messages
            .iter_mut()
            .filter(|m| m.visible_at <= now)
            .min_by_key(|m| m.id)?;
        message.receive_count += 1;
        message.visible_at = now + self.visibility_timeout;
        let receipt = format!("{}-{}", message.id, message.receive_count);
        message.receipt = Some(receipt.clone());

        let mut job = message.job.clone();
        job.attempt_count = message.receive_count;
        Some(Delivery {
            job,
            receipt,
            receive_count: message.receive_count,
        })
    }

    fn position(state: &QueueState, receipt: &str) -> Result<usize> {
        state
            .messages
            .iter()
            .position(|m| m.receipt.as_deref() == Some(receipt))
            .ok_or_else(|| Error::Queue(format!("receipt handle {receipt} is not current")))
    }
}

#[async_trait]
impl<C: Clock + Clone + 'static> JobQueuePort for MemoryQueue<C> {
    async fn send(&self, job: &Job) -> Result<()> {
        let now = self.clock.now();
        {
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.messages.push(Message {
                id,
                job: job.clone(),
                receive_count: 0,
                visible_at: now,
                receipt: None,
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, max_wait: Duration) -> Result<Option<Delivery>> {
        if let Some(delivery) = self.try_receive() {
            return Ok(Some(delivery));
        }
        if max_wait.is_zero() {
            return Ok(None);
        }
        let _ = tokio::time::timeout(max_wait, self.notify.notified()).await;
        Ok(self.try_receive())
    }

    async fn delete(&self, receipt: &str) -> Result<()> {
        let mut state = self.lock();
        let index = Self::position(&state, receipt)?;
        state.messages.remove(index);
        Ok(())
    }

    async fn extend_visibility(&self, receipt: &str, timeout: Duration) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.lock();
        let index = Self::position(&state, receipt)?;
        state.messages[index].visible_at = now + timeout;
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<bool> {
        let mut state = self.lock();
        let index = Self::position(&state, &delivery.receipt)?;
        let message = state.messages.remove(index);
        state.dead_letters.push(DeadLetter {
            job: message.job,
            reason: reason.to_string(),
            attempts: message.receive_count,
            failed_at: Utc::now(),
        });
        Ok(true)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let now = self.clock.now();
        let state = self.lock();
        let visible = state.messages.iter().filter(|m| m.visible_at <= now).count();
        Ok(QueueStats {
            visible,
            in_flight: state.messages.len() - visible,
            delayed: 0,
        })
    }
}
