// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::TestWorld;
use harbor_core::SessionBuilder;

#[tokio::test]
async fn get_or_create_returns_same_hub() {
    let world = TestWorld::new();
    let session_id = world.seed_session().await;
    let registry = HubRegistry::new(world.deps.clone());

    let a = registry.get_or_create(&session_id).await.unwrap();
    let b = registry.get_or_create(&session_id).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn concurrent_creation_is_single_flighted() {
    let world = TestWorld::new();
    let session_id = world.seed_session().await;
    let registry = HubRegistry::new(world.deps.clone());

    let (a, b, c) = tokio::join!(
        registry.get_or_create(&session_id),
        registry.get_or_create(&session_id),
        registry.get_or_create(&session_id),
    );
    let a = a.unwrap();
    assert!(Arc::ptr_eq(&a, &b.unwrap()));
    assert!(Arc::ptr_eq(&a, &c.unwrap()));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn missing_session_is_an_error() {
    let world = TestWorld::new();
    let registry = HubRegistry::new(world.deps.clone());

    let result = registry.get_or_create(&harbor_core::SessionId::new("ses-ghost")).await;
    assert!(matches!(result, Err(RegistryError::NotFound(_))));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn remove_stops_migration_monitoring() {
    let world = TestWorld::new();
    let session_id = world.seed_session().await;
    let registry = HubRegistry::new(world.deps.clone());
    let hub = registry.get_or_create(&session_id).await.unwrap();

    registry.remove(&session_id);
    assert!(registry.get(&session_id).is_none());
    assert!(hub.migration().is_stopped());
}

#[tokio::test]
async fn eviction_callback_removes_from_registry() {
    let world = TestWorld::new();
    let session_id = world.seed_session().await;
    let registry = HubRegistry::new(world.deps.clone());
    let hub = registry.get_or_create(&session_id).await.unwrap();

    hub.self_terminate().await;
    assert!(registry.get(&session_id).is_none());
}

#[tokio::test]
async fn release_all_leases_frees_every_session() {
    let world = TestWorld::new();
    let a = world.seed_record(SessionBuilder::new("ses-a").build()).await;
    let b = world.seed_record(SessionBuilder::new("ses-b").build()).await;
    let registry = HubRegistry::new(world.deps.clone());
    let hub_a = registry.get_or_create(&a).await.unwrap();
    let hub_b = registry.get_or_create(&b).await.unwrap();
    hub_a.ensure_ready(crate::runtime::EnsureOpts::connect()).await.unwrap();
    hub_b.ensure_ready(crate::runtime::EnsureOpts::connect()).await.unwrap();

    registry.release_all_leases().await;

    // A replacement replica can adopt both immediately
    let leases = world.deps.leases();
    let other = harbor_core::InstanceId::from_string("ins-next");
    assert!(leases.acquire_owner_lease(&a, &other).await.unwrap());
    assert!(leases.acquire_owner_lease(&b, &other).await.unwrap());
    assert!(!leases.has_runtime_lease(&a).await.unwrap());
}
