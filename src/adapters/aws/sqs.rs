use super::classify;
use crate::domain::jobs::{DeadLetter, Delivery, Job, QueueStats};
use crate::error::{Error, Result};
use crate::ports::queue::JobQueuePort;
use async_trait::async_trait;
use aws_sdk_sqs::types::{MessageSystemAttributeName, QueueAttributeName};
use aws_sdk_sqs::Client;
use chrono::Utc;
use std::time::Duration;

/// Longest long-poll SQS accepts.
pub const MAX_WAIT_SECONDS: u64 = 20;

/// SqsQueue implements JobQueuePort for AWS SQS, standard or FIFO.
#[derive(Clone)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
    dead_letter_url: Option<String>,
    visibility_timeout: Option<Duration>,
}

/// Upper bound SQS accepts for a visibility timeout.
const MAX_VISIBILITY_SECONDS: u64 = 43_200;

fn visibility_seconds(timeout: Duration) -> i32 {
    timeout.as_secs().min(MAX_VISIBILITY_SECONDS) as i32
}

fn is_fifo(url: &str) -> bool {
    url.ends_with(".fifo")
}

impl SqsQueue {
    pub fn new(client: Client, queue_url: String) -> Self {
        Self {
            client,
            queue_url,
            dead_letter_url: None,
            visibility_timeout: None,
        }
    }

    /// Visibility timeout requested on every receive instead of the queue default.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    pub fn with_dead_letter_queue(mut self, url: Option<String>) -> Self {
        self.dead_letter_url = url;
        self
    }

    async fn send_body(&self, url: &str, body: String, dedup_id: &str) -> Result<()> {
        let mut request = self.client.send_message().queue_url(url).message_body(body);
        if is_fifo(url) {
            request = request
                .message_group_id(dedup_id)
                .message_deduplication_id(dedup_id);
        }
        request
            .send()
            .await
            .map_err(|e| classify(e, Error::Queue))?;
        Ok(())
    }

    /// Park an unparseable message on the dead-letter queue so it cannot block the consumer.
    async fn quarantine(&self, body: &str, receipt: &str, reason: String) -> Result<()> {
        tracing::warn!(%reason, "dropping malformed queue message");
        if let Some(url) = &self.dead_letter_url {
            let id = uuid::Uuid::new_v4().simple().to_string();
            self.send_body(url, body.to_string(), &id).await?;
            self.delete(receipt).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueuePort for SqsQueue {
    async fn send(&self, job: &Job) -> Result<()> {
        let body = serde_json::to_string(job)?;
        self.send_body(&self.queue_url, body, job.job_id.as_str()).await
    }

    async fn receive(&self, max_wait: Duration) -> Result<Option<Delivery>> {
        let wait = max_wait.as_secs().min(MAX_WAIT_SECONDS) as i32;
        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(wait)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .set_visibility_timeout(self.visibility_timeout.map(visibility_seconds))
            .send()
            .await
            .map_err(|e| classify(e, Error::Queue))?;

        let Some(message) = resp.messages().first() else {
            return Ok(None);
        };
        let (Some(body), Some(receipt)) = (message.body(), message.receipt_handle()) else {
            return Ok(None);
        };

        let receive_count = message
            .attributes()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
            .and_then(|count| count.parse().ok())
            .unwrap_or(1);

        let mut job: Job = match serde_json::from_str(body) {
            Ok(job) => job,
            Err(e) => {
                self.quarantine(body, receipt, e.to_string()).await?;
                return Ok(None);
            }
        };
        job.attempt_count = receive_count;

        Ok(Some(Delivery {
            job,
            receipt: receipt.to_string(),
            receive_count,
        }))
    }

    async fn delete(&self, receipt: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|e| classify(e, Error::Queue))?;
        Ok(())
    }

    async fn extend_visibility(&self, receipt: &str, timeout: Duration) -> Result<()> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt)
            .visibility_timeout(visibility_seconds(timeout))
            .send()
            .await
            .map_err(|e| classify(e, Error::Queue))?;
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<bool> {
        let Some(url) = &self.dead_letter_url else {
            // The queue's own redrive policy takes the message after maxReceiveCount.
            tracing::warn!(
                job_id = %delivery.job.job_id,
                "no dead-letter queue configured, leaving message to the redrive policy"
            );
            return Ok(false);
        };
        let record = DeadLetter {
            job: delivery.job.clone(),
            reason: reason.to_string(),
            attempts: delivery.receive_count,
            failed_at: Utc::now(),
        };
        self.send_body(url, serde_json::to_string(&record)?, delivery.job.job_id.as_str())
            .await?;
        self.delete(&delivery.receipt).await?;
        Ok(true)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let resp = self
            .client
            .get_queue_attributes()
            .queue_url(&self.queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessagesNotVisible)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessagesDelayed)
            .send()
            .await
            .map_err(|e| classify(e, Error::Queue))?;

        let read = |name: QueueAttributeName| -> usize {
            resp.attributes()
                .and_then(|attrs| attrs.get(&name))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };
        Ok(QueueStats {
            visible: read(QueueAttributeName::ApproximateNumberOfMessages),
            in_flight: read(QueueAttributeName::ApproximateNumberOfMessagesNotVisible),
            delayed: read(QueueAttributeName::ApproximateNumberOfMessagesDelayed),
        })
    }
}
