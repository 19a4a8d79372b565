// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Delayed job queue with stable ids.
//!
//! Jobs are named; enqueueing an id that already exists removes the old job
//! first, so re-scheduling is a replace. Jobs are removed on completion and
//! on failure: a failed job is abandoned, the owning flow is idempotent and
//! a later sweep converges. The worker drains due jobs on a polling tick.

use crate::kv::StoreError;
use async_trait::async_trait;
use harbor_core::SessionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// One delayed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayedJob {
    /// Stable id; the dedup key.
    pub id: String,
    pub session_id: SessionId,
    /// Epoch ms at which the job becomes due.
    pub run_at_ms: u64,
}

/// Named delayed jobs.
#[async_trait]
pub trait DelayQueue: Send + Sync + 'static {
    /// Insert a job, replacing any existing job with the same id.
    async fn enqueue(&self, job: DelayedJob) -> Result<(), StoreError>;

    /// Remove a job by id. Removing an absent id is a no-op.
    async fn remove(&self, job_id: &str) -> Result<(), StoreError>;

    /// Pop every job due at `now_ms`, oldest first.
    async fn pop_due(&self, now_ms: u64) -> Result<Vec<DelayedJob>, StoreError>;

    /// Look up a job by id.
    async fn get(&self, job_id: &str) -> Result<Option<DelayedJob>, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;

    async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }
}

/// In-memory [`DelayQueue`].
#[derive(Clone, Default)]
pub struct MemoryDelayQueue {
    jobs: Arc<Mutex<HashMap<String, DelayedJob>>>,
}

impl MemoryDelayQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DelayQueue for MemoryDelayQueue {
    async fn enqueue(&self, job: DelayedJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock();
        jobs.remove(&job.id);
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn remove(&self, job_id: &str) -> Result<(), StoreError> {
        self.jobs.lock().remove(job_id);
        Ok(())
    }

    async fn pop_due(&self, now_ms: u64) -> Result<Vec<DelayedJob>, StoreError> {
        let mut jobs = self.jobs.lock();
        let due_ids: Vec<String> = jobs
            .values()
            .filter(|j| j.run_at_ms <= now_ms)
            .map(|j| j.id.clone())
            .collect();
        let mut due: Vec<DelayedJob> = due_ids.iter().filter_map(|id| jobs.remove(id)).collect();
        due.sort_by_key(|j| j.run_at_ms);
        Ok(due)
    }

    async fn get(&self, job_id: &str) -> Result<Option<DelayedJob>, StoreError> {
        Ok(self.jobs.lock().get(job_id).cloned())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.jobs.lock().len())
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
