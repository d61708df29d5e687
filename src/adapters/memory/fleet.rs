use crate::error::Result;
use crate::ports::fleet::FleetOrchestrator;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct FleetInner {
    current: usize,
    desired: usize,
    requests: Vec<usize>,
}

/// Orchestrator stub that converges instantly and remembers every resize request.
#[derive(Debug, Clone, Default)]
pub struct MemoryFleet {
    inner: Arc<Mutex<FleetInner>>,
}

impl MemoryFleet {
    pub fn new(current: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FleetInner {
                current,
                desired: current,
                requests: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FleetInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn desired(&self) -> usize {
        self.lock().desired
    }

    /// Every count passed to `set_desired_count`, in order.
    pub fn requests(&self) -> Vec<usize> {
        self.lock().requests.clone()
    }
}

#[async_trait]
impl FleetOrchestrator for MemoryFleet {
    async fn set_desired_count(&self, count: usize) -> Result<()> {
        let mut inner = self.lock();
        inner.desired = count;
        inner.current = count;
        inner.requests.push(count);
        Ok(())
    }

    async fn current_count(&self) -> Result<usize> {
        Ok(self.lock().current)
    }
}
