// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concurrency scenarios: single-flight guarantees.

use super::common::*;
use harbor_gateway::runtime::EnsureOpts;

#[tokio::test]
async fn concurrent_ensure_provisions_one_sandbox() {
    let scenario = Scenario::new().await;
    let hub = scenario.hub().await;

    let (a, b) = tokio::join!(
        hub.ensure_ready(EnsureOpts::connect()),
        hub.ensure_ready(EnsureOpts::connect()),
    );
    let a = a.unwrap();
    let b = b.unwrap();

    assert_eq!(scenario.world.provider.ensure_count(), 1);
    assert_eq!(a.tunnel_url, b.tunnel_url);
    assert_eq!(a.agent_session_id, b.agent_session_id);
}

#[tokio::test]
async fn concurrent_hub_creation_yields_one_hub() {
    let scenario = Scenario::new().await;

    let (a, b, c) = tokio::join!(
        scenario.registry.get_or_create(&scenario.session_id),
        scenario.registry.get_or_create(&scenario.session_id),
        scenario.registry.get_or_create(&scenario.session_id),
    );
    let a = a.unwrap();
    assert!(std::sync::Arc::ptr_eq(&a, &b.unwrap()));
    assert!(std::sync::Arc::ptr_eq(&a, &c.unwrap()));
}

#[tokio::test]
async fn owner_lease_is_exclusive_across_instances() {
    let scenario = Scenario::new().await;
    let hub = scenario.hub().await;
    hub.ensure_ready(EnsureOpts::connect()).await.unwrap();

    // A second instance cannot take the session while this one renews
    let other = harbor_core::InstanceId::from_string("ins-b");
    let leases = scenario.world.deps.leases();
    assert!(!leases
        .acquire_owner_lease(&scenario.session_id, &other)
        .await
        .unwrap());
}
