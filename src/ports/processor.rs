use crate::domain::jobs::Job;
use crate::domain::segments::SegmentMetadataRecord;
use crate::error::Result;
use async_trait::async_trait;

/// Per-job work invoked by the worker runtime for each delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &Job) -> Result<SegmentMetadataRecord>;
}
