use crate::domain::jobs::JobId;
use crate::error::Result;
use crate::ports::ledger::JobLedger;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    ids: Arc<Mutex<HashSet<JobId>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.ids.lock().unwrap_or_else(|e| e.into_inner()).contains(job_id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobLedger for MemoryLedger {
    async fn register(&self, job_id: &JobId) -> Result<bool> {
        Ok(self
            .ids
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id.clone()))
    }

    async fn release(&self, job_id: &JobId) -> Result<()> {
        self.ids.lock().unwrap_or_else(|e| e.into_inner()).remove(job_id);
        Ok(())
    }
}
