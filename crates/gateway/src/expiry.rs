// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandbox expiry scheduling.
//!
//! One delayed job per session, fired `GRACE` ahead of the sandbox TTL so
//! the migration controller can snapshot/migrate before the provider kills
//! the sandbox. Job ids are stable (`session_expiry__<id>`); re-scheduling
//! replaces. A failed job is abandoned; migration is idempotent and the
//! orphan sweep converges later.

use async_trait::async_trait;
use harbor_core::{Clock, SessionId};
use harbor_store::{DelayQueue, DelayedJob, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const EXPIRY_JOB_PREFIX: &str = "session_expiry__";

pub fn expiry_job_id(session_id: &SessionId) -> String {
    format!("{}{}", EXPIRY_JOB_PREFIX, session_id)
}

/// Schedules and cancels per-session expiry jobs.
#[derive(Clone)]
pub struct ExpiryScheduler {
    queue: Arc<dyn DelayQueue>,
    clock: Arc<dyn Clock>,
    grace: Duration,
}

impl ExpiryScheduler {
    pub fn new(queue: Arc<dyn DelayQueue>, clock: Arc<dyn Clock>, grace: Duration) -> Self {
        Self { queue, clock, grace }
    }

    /// Schedule the expiry job for a session. `None` is a no-op. The job
    /// fires `grace` before `expires_at_ms`, clamped to "now".
    pub async fn schedule_session_expiry(
        &self,
        session_id: &SessionId,
        expires_at_ms: Option<u64>,
    ) -> Result<(), StoreError> {
        let Some(expires_at_ms) = expires_at_ms else {
            return Ok(());
        };
        let now = self.clock.epoch_ms();
        let run_at_ms = expires_at_ms.saturating_sub(self.grace.as_millis() as u64).max(now);

        let job_id = expiry_job_id(session_id);
        self.queue.remove(&job_id).await?;
        self.queue
            .enqueue(DelayedJob { id: job_id, session_id: session_id.clone(), run_at_ms })
            .await?;
        tracing::debug!(
            session_id = %session_id,
            delay_ms = run_at_ms.saturating_sub(now),
            "scheduled session expiry"
        );
        Ok(())
    }

    pub async fn cancel_session_expiry(&self, session_id: &SessionId) -> Result<(), StoreError> {
        self.queue.remove(&expiry_job_id(session_id)).await
    }
}

/// Receiver side of expiry jobs.
#[async_trait]
pub trait ExpiryHandler: Send + Sync + 'static {
    /// Handle one due expiry job. Errors are logged and the job abandoned.
    async fn handle_expiry(&self, session_id: &SessionId);
}

/// Drain due jobs once. Split from the loop for tests.
pub async fn drain_expiry_once(
    queue: &Arc<dyn DelayQueue>,
    clock: &Arc<dyn Clock>,
    handler: &Arc<dyn ExpiryHandler>,
) {
    let due = match queue.pop_due(clock.epoch_ms()).await {
        Ok(due) => due,
        Err(e) => {
            tracing::warn!(error = %e, "expiry queue poll failed");
            return;
        }
    };
    for job in due {
        tracing::info!(session_id = %job.session_id, "expiry job due");
        handler.handle_expiry(&job.session_id).await;
    }
}

/// Worker loop: polls the queue and dispatches due jobs until shutdown.
pub async fn run_expiry_worker(
    queue: Arc<dyn DelayQueue>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    handler: Arc<dyn ExpiryHandler>,
    shutdown: CancellationToken,
) {
    let mut tick = tokio::time::interval(poll_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => drain_expiry_once(&queue, &clock, &handler).await,
        }
    }
}

#[cfg(test)]
#[path = "expiry_tests.rs"]
mod tests;
