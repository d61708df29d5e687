use crate::error::Result;
use async_trait::async_trait;

/// Compute orchestration layer that owns the worker instances.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FleetOrchestrator: Send + Sync {
    async fn set_desired_count(&self, count: usize) -> Result<()>;

    /// Workers currently running.
    async fn current_count(&self) -> Result<usize>;
}
