use crate::domain::jobs::{Delivery, Job, QueueStats};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Durable work queue with at-least-once delivery.
///
/// A received message stays hidden from other consumers until it is deleted
/// or its visibility timeout elapses, after which it is delivered again.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobQueuePort: Send + Sync {
    async fn send(&self, job: &Job) -> Result<()>;

    /// Long-poll for one message, waiting at most `max_wait`.
    async fn receive(&self, max_wait: Duration) -> Result<Option<Delivery>>;

    /// Ack a message so it is never delivered again.
    async fn delete(&self, receipt: &str) -> Result<()>;

    /// Push the redelivery deadline of an in-flight message `timeout` into the future.
    async fn extend_visibility(&self, receipt: &str, timeout: Duration) -> Result<()>;

    /// Move a message to the dead-letter destination with the last failure reason.
    /// Returns `false` when there is no destination and the message stays queued.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<bool>;

    async fn stats(&self) -> Result<QueueStats>;
}
