// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Expiry migration and idle pause scenarios.

use super::common::*;
use harbor_core::{Clock as _, PauseReason, SessionStatus};
use harbor_gateway::expiry::{drain_expiry_once, ExpiryHandler};
use harbor_gateway::hub::RegistryExpiryHandler;
use harbor_store::DelayQueue as _;
use std::sync::Arc;

#[tokio::test]
async fn expiry_with_active_client_migrates() {
    let scenario = Scenario::new().await;
    // Sandbox expires soon; the expiry job fires early (grace window)
    scenario
        .world
        .provider
        .set_expires_at_ms(Some(scenario.world.clock.epoch_ms() + 300_000));
    let (_hub, _connection_id, mut rx) = scenario.connect_client("user-1").await;
    drain_frames(&mut rx);
    let before = scenario.world.session(&scenario.session_id).await;
    assert_eq!(before.sandbox_id.as_deref(), Some("sbx-1"));
    // The next ensure_sandbox should produce a fresh sandbox with no TTL
    scenario.world.provider.set_expires_at_ms(None);

    // The scheduled job is due now (expiry minus the 5 min grace)
    let queue: Arc<dyn harbor_store::DelayQueue> = scenario.world.queue.clone();
    let clock: Arc<dyn harbor_core::Clock> = Arc::new(scenario.world.clock.clone());
    let handler: Arc<dyn ExpiryHandler> =
        Arc::new(RegistryExpiryHandler(scenario.registry.clone()));
    drain_expiry_once(&queue, &clock, &handler).await;
    settle().await;

    let row = scenario.world.session(&scenario.session_id).await;
    assert_eq!(row.status, SessionStatus::Running);
    // New sandbox, recorded snapshot of the old one
    assert_eq!(row.sandbox_id.as_deref(), Some("sbx-2"));
    assert_eq!(row.snapshot_id.as_deref(), Some("snap-1"));

    // Clients observed migrating → running
    let statuses: Vec<SessionStatus> = drain_frames(&mut rx)
        .iter()
        .filter_map(|f| match f {
            harbor_wire::ServerMessage::Status { status, .. } => Some(*status),
            _ => None,
        })
        .collect();
    assert!(statuses.contains(&SessionStatus::Migrating));
    assert_eq!(statuses.last(), Some(&SessionStatus::Running));
}

#[tokio::test]
async fn idle_pause_after_last_client_leaves() {
    let mut config = harbor_gateway::config::GatewayConfig::default();
    config.idle_delay = std::time::Duration::from_millis(20);
    let world = harbor_gateway::test_support::TestWorld::with_config(config);
    let session_id = world
        .seed_record(
            harbor_core::SessionBuilder::new("ses-spec").created_by("user-1").build(),
        )
        .await;
    let registry = harbor_gateway::hub::HubRegistry::new(world.deps.clone());
    let hub = registry.get_or_create(&session_id).await.unwrap();
    let (connection_id, _rx) = hub.add_client(Some("user-1".to_string()));
    settle().await;

    hub.remove_client(&connection_id);
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let row = world.session(&session_id).await;
    assert_eq!(row.status, SessionStatus::Paused);
    assert_eq!(row.pause_reason, Some(PauseReason::Inactivity));
    assert!(row.snapshot_id.is_some());
    assert_eq!(row.sandbox_id, None);
    row.check_invariants().unwrap();

    // Expiry cancelled, hub evicted
    assert!(world.queue.is_empty().await.unwrap());
    assert!(registry.get(&session_id).is_none());
}

#[tokio::test]
async fn expired_job_in_the_past_fires_promptly() {
    let scenario = Scenario::new().await;
    let expiry = scenario.world.deps.expiry();
    expiry
        .schedule_session_expiry(&scenario.session_id, Some(scenario.world.clock.epoch_ms() - 1))
        .await
        .unwrap();

    let due = scenario
        .world
        .queue
        .pop_due(scenario.world.clock.epoch_ms())
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].session_id, scenario.session_id);
}
