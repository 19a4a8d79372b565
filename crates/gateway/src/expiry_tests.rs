// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use harbor_core::FakeClock;
use harbor_store::MemoryDelayQueue;
use parking_lot::Mutex;

const GRACE: Duration = Duration::from_secs(300);

fn scheduler() -> (ExpiryScheduler, Arc<MemoryDelayQueue>, FakeClock) {
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_000_000);
    let queue = Arc::new(MemoryDelayQueue::new());
    let scheduler = ExpiryScheduler::new(queue.clone(), Arc::new(clock.clone()), GRACE);
    (scheduler, queue, clock)
}

fn sid() -> SessionId {
    SessionId::new("ses-1")
}

#[tokio::test]
async fn schedules_grace_before_expiry() {
    let (scheduler, queue, _) = scheduler();
    scheduler.schedule_session_expiry(&sid(), Some(1_000_000 + 600_000)).await.unwrap();

    let job = queue.get("session_expiry__ses-1").await.unwrap().unwrap();
    assert_eq!(job.run_at_ms, 1_000_000 + 300_000);
    assert_eq!(job.session_id, sid());
}

#[tokio::test]
async fn none_expiry_is_a_noop() {
    let (scheduler, queue, _) = scheduler();
    scheduler.schedule_session_expiry(&sid(), None).await.unwrap();
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn near_past_expiry_clamps_to_now() {
    let (scheduler, queue, clock) = scheduler();
    // expires one millisecond ago
    scheduler.schedule_session_expiry(&sid(), Some(clock.epoch_ms() - 1)).await.unwrap();

    let job = queue.get("session_expiry__ses-1").await.unwrap().unwrap();
    assert_eq!(job.run_at_ms, clock.epoch_ms());
    // Fires promptly
    let due = queue.pop_due(clock.epoch_ms()).await.unwrap();
    assert_eq!(due.len(), 1);
}

#[tokio::test]
async fn rescheduling_same_time_leaves_one_job() {
    let (scheduler, queue, _) = scheduler();
    let at = Some(1_000_000 + 600_000);
    scheduler.schedule_session_expiry(&sid(), at).await.unwrap();
    scheduler.schedule_session_expiry(&sid(), at).await.unwrap();

    assert_eq!(queue.len().await.unwrap(), 1);
}

#[tokio::test]
async fn cancel_removes_the_job() {
    let (scheduler, queue, _) = scheduler();
    scheduler.schedule_session_expiry(&sid(), Some(2_000_000)).await.unwrap();
    scheduler.cancel_session_expiry(&sid()).await.unwrap();
    assert!(queue.is_empty().await.unwrap());
}

struct RecordingHandler {
    handled: Mutex<Vec<SessionId>>,
}

#[async_trait]
impl ExpiryHandler for RecordingHandler {
    async fn handle_expiry(&self, session_id: &SessionId) {
        self.handled.lock().push(session_id.clone());
    }
}

#[tokio::test]
async fn drain_dispatches_due_jobs_only() {
    let (scheduler, queue, clock) = scheduler();
    scheduler.schedule_session_expiry(&sid(), Some(clock.epoch_ms())).await.unwrap();
    scheduler
        .schedule_session_expiry(&SessionId::new("ses-later"), Some(clock.epoch_ms() + 10_000_000))
        .await
        .unwrap();

    let handler = Arc::new(RecordingHandler { handled: Mutex::new(Vec::new()) });
    let queue_dyn: Arc<dyn DelayQueue> = queue.clone();
    let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
    let handler_dyn: Arc<dyn ExpiryHandler> = handler.clone();
    drain_expiry_once(&queue_dyn, &clock_dyn, &handler_dyn).await;

    assert_eq!(handler.handled.lock().clone(), vec![sid()]);
    // The late job is still queued
    assert_eq!(queue.len().await.unwrap(), 1);
}
