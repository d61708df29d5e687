use crate::domain::jobs::JobId;
use crate::error::Result;
use async_trait::async_trait;

/// External dedup store used by the scheduler.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Record a job id. Returns `false` if it was already recorded.
    async fn register(&self, job_id: &JobId) -> Result<bool>;

    /// Forget a job id, e.g. after its publish failed.
    async fn release(&self, job_id: &JobId) -> Result<()>;
}
