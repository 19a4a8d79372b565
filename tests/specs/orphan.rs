// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orphan reconciliation after a gateway restart.

use harbor_core::{Clock as _, PauseReason, SessionBuilder, SessionStatus};
use harbor_gateway::hub::HubRegistry;
use harbor_gateway::sweeper::sweep_once;
use harbor_gateway::test_support::TestWorld;
use harbor_store::DelayQueue as _;

#[tokio::test]
async fn orphan_after_restart_is_reconciled() {
    let world = TestWorld::new();
    // The store remembers a running session; no process holds a runtime lease
    let session_id = world
        .seed_record(
            SessionBuilder::new("ses-lost")
                .status(SessionStatus::Running)
                .sandbox_id("sbx-x")
                .tunnel_url("http://sbx-x.sandbox.local:8080")
                .build(),
        )
        .await;
    world
        .deps
        .expiry()
        .schedule_session_expiry(&session_id, Some(world.clock.epoch_ms() + 10_000_000))
        .await
        .unwrap();
    // Fresh registry, as after a restart: no hubs
    let registry = HubRegistry::new(world.deps.clone());

    sweep_once(&world.deps, &registry).await;

    let row = world.session(&session_id).await;
    assert_eq!(row.status, SessionStatus::Paused);
    assert_eq!(row.pause_reason, Some(PauseReason::Orphaned));
    assert!(row.snapshot_id.is_some());
    assert_eq!(row.sandbox_id, None);
    row.check_invariants().unwrap();

    assert!(world.queue.is_empty().await.unwrap());
    assert_eq!(world.notifier.calls().len(), 1);
}

#[tokio::test]
async fn adopted_sessions_are_left_alone() {
    let world = TestWorld::new();
    let session_id = world
        .seed_record(
            SessionBuilder::new("ses-owned")
                .status(SessionStatus::Running)
                .sandbox_id("sbx-y")
                .tunnel_url("http://sbx-y.sandbox.local:8080")
                .build(),
        )
        .await;
    // Another replica is alive and renewing
    world.deps.leases().set_runtime_lease(&session_id).await.unwrap();
    let registry = HubRegistry::new(world.deps.clone());

    sweep_once(&world.deps, &registry).await;

    assert_eq!(world.session(&session_id).await.status, SessionStatus::Running);
    assert!(world.provider.calls().is_empty());
}
