// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn job(id: &str, run_at_ms: u64) -> DelayedJob {
    DelayedJob { id: id.to_string(), session_id: SessionId::new("ses-1"), run_at_ms }
}

#[tokio::test]
async fn enqueue_replaces_same_id() {
    let queue = MemoryDelayQueue::new();
    queue.enqueue(job("j1", 1_000)).await.unwrap();
    queue.enqueue(job("j1", 9_000)).await.unwrap();

    assert_eq!(queue.len().await.unwrap(), 1);
    assert_eq!(queue.get("j1").await.unwrap().unwrap().run_at_ms, 9_000);
}

#[tokio::test]
async fn pop_due_drains_only_due_jobs() {
    let queue = MemoryDelayQueue::new();
    queue.enqueue(job("early", 1_000)).await.unwrap();
    queue.enqueue(job("late", 60_000)).await.unwrap();

    let due = queue.pop_due(5_000).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, "early");
    assert_eq!(queue.len().await.unwrap(), 1);

    // Popped jobs are gone for good
    assert!(queue.pop_due(5_000).await.unwrap().is_empty());
}

#[tokio::test]
async fn pop_due_orders_oldest_first() {
    let queue = MemoryDelayQueue::new();
    queue.enqueue(job("b", 2_000)).await.unwrap();
    queue.enqueue(job("a", 1_000)).await.unwrap();
    queue.enqueue(job("c", 3_000)).await.unwrap();

    let due = queue.pop_due(10_000).await.unwrap();
    let ids: Vec<&str> = due.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn remove_absent_is_noop() {
    let queue = MemoryDelayQueue::new();
    queue.remove("ghost").await.unwrap();
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test]
async fn due_in_the_past_pops_immediately() {
    let queue = MemoryDelayQueue::new();
    queue.enqueue(job("past", 0)).await.unwrap();
    let due = queue.pop_due(1).await.unwrap();
    assert_eq!(due.len(), 1);
}
