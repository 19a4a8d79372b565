// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{RecordingHub, TestWorld};
use harbor_adapters::ProviderError;
use harbor_core::{Clock as _, SessionBuilder, SessionStatus};
use harbor_store::DelayQueue as _;

fn runtime(world: &TestWorld, session_id: &SessionId) -> Arc<SessionRuntime> {
    Arc::new(SessionRuntime::new(session_id.clone(), world.deps.clone()))
}

#[tokio::test]
async fn cold_start_walks_all_steps() {
    let world = TestWorld::new();
    let session_id = world.seed_session().await;
    let runtime = runtime(&world, &session_id);
    let hub = RecordingHub::new(session_id.clone());

    let ready = runtime
        .ensure_runtime_ready(hub.clone(), EnsureOpts::connect())
        .await
        .unwrap();

    assert_eq!(ready.tunnel_url, "http://sbx-1.sandbox.local:8080");
    assert_eq!(ready.agent_session_id, "agt-1");
    assert!(runtime.is_ready());

    // Persisted row satisfies the running invariant
    let row = world.session(&session_id).await;
    assert_eq!(row.status, SessionStatus::Running);
    assert_eq!(row.sandbox_id.as_deref(), Some("sbx-1"));
    assert_eq!(row.tunnel_url.as_deref(), Some("http://sbx-1.sandbox.local:8080"));
    assert_eq!(row.agent_session_id.as_deref(), Some("agt-1"));
    row.check_invariants().unwrap();

    // Stream connected to the tunnel, processor bound, status announced
    assert_eq!(world.streams.connects(), vec!["http://sbx-1.sandbox.local:8080".to_string()]);
    assert_eq!(hub.bound_agent_session.lock().as_deref(), Some("agt-1"));
    assert_eq!(hub.statuses(), vec![SessionStatus::Running]);
}

#[tokio::test]
async fn ready_runtime_elides_provider_calls() {
    let world = TestWorld::new();
    let session_id = world.seed_session().await;
    let runtime = runtime(&world, &session_id);
    let hub = RecordingHub::new(session_id.clone());

    runtime.ensure_runtime_ready(hub.clone(), EnsureOpts::connect()).await.unwrap();
    assert_eq!(world.provider.ensure_count(), 1);

    runtime.ensure_runtime_ready(hub, EnsureOpts::prompt()).await.unwrap();
    assert_eq!(world.provider.ensure_count(), 1);
}

#[tokio::test]
async fn concurrent_ensure_is_single_flighted() {
    let world = TestWorld::new();
    let session_id = world.seed_session().await;
    let runtime = runtime(&world, &session_id);
    let hub = RecordingHub::new(session_id.clone());

    let (a, b) = tokio::join!(
        runtime.ensure_runtime_ready(hub.clone(), EnsureOpts::connect()),
        runtime.ensure_runtime_ready(hub.clone(), EnsureOpts::connect()),
    );
    let a = a.unwrap();
    let b = b.unwrap();

    assert_eq!(world.provider.ensure_count(), 1);
    assert_eq!(a.tunnel_url, b.tunnel_url);
}

#[tokio::test]
async fn auto_reconnect_aborts_when_session_paused() {
    let world = TestWorld::new();
    let record = SessionBuilder::new("ses-p")
        .status(SessionStatus::Paused)
        .snapshot_id("snap-1")
        .build();
    let session_id = world.seed_record(record).await;
    let runtime = runtime(&world, &session_id);
    let hub = RecordingHub::new(session_id.clone());

    let result = runtime.ensure_runtime_ready(hub, EnsureOpts::auto_reconnect()).await;
    assert!(matches!(result, Err(RuntimeError::Aborted(_))));
    assert_eq!(world.provider.ensure_count(), 0);
}

#[tokio::test]
async fn billing_denial_emits_error_status_and_fails() {
    let world = TestWorld::new();
    let record = SessionBuilder::new("ses-b").configuration_id("cfg-1").build();
    let session_id = world.seed_record(record).await;
    world.billing.deny_with("plan exhausted");
    let runtime = runtime(&world, &session_id);
    let hub = RecordingHub::new(session_id.clone());

    let result = runtime.ensure_runtime_ready(hub.clone(), EnsureOpts::connect()).await;
    assert!(matches!(result, Err(RuntimeError::BillingDenied(_))));
    assert_eq!(hub.statuses(), vec![SessionStatus::Error]);
    assert_eq!(world.provider.ensure_count(), 0);
}

#[tokio::test]
async fn scratch_session_skips_billing() {
    let world = TestWorld::new();
    let session_id = world.seed_session().await;
    world.billing.deny_with("would deny if asked");
    let runtime = runtime(&world, &session_id);
    let hub = RecordingHub::new(session_id.clone());

    runtime.ensure_runtime_ready(hub, EnsureOpts::connect()).await.unwrap();
    assert_eq!(world.billing.checks(), 0);
}

#[tokio::test]
async fn snapshot_restore_failure_clears_snapshot_id() {
    let world = TestWorld::new();
    let record = SessionBuilder::new("ses-r").snapshot_id("mem:snap-1").build();
    let session_id = world.seed_record(record).await;
    world
        .provider
        .fail_next_ensure(ProviderError::SnapshotRestoreFailed("vm image corrupt".to_string()));
    let runtime = runtime(&world, &session_id);
    let hub = RecordingHub::new(session_id.clone());

    let result = runtime.ensure_runtime_ready(hub.clone(), EnsureOpts::connect()).await;
    assert!(matches!(result, Err(RuntimeError::SnapshotRestore(_))));
    // The next attempt cold-starts
    assert_eq!(world.session(&session_id).await.snapshot_id, None);

    runtime.ensure_runtime_ready(hub, EnsureOpts::connect()).await.unwrap();
    assert_eq!(world.session(&session_id).await.status, SessionStatus::Running);
}

#[tokio::test]
async fn expiry_is_scheduled_from_provider_ttl() {
    let world = TestWorld::new();
    let session_id = world.seed_session().await;
    let expires = world.clock.epoch_ms() + 3_600_000;
    world.provider.set_expires_at_ms(Some(expires));
    let runtime = runtime(&world, &session_id);
    let hub = RecordingHub::new(session_id.clone());

    runtime.ensure_runtime_ready(hub, EnsureOpts::connect()).await.unwrap();
    // Scheduling is fire-and-forget; let it land
    tokio::task::yield_now().await;

    let job = world.queue.get("session_expiry__ses-test").await.unwrap().unwrap();
    assert_eq!(job.run_at_ms, expires - 300_000);
    assert_eq!(world.session(&session_id).await.sandbox_expires_at_ms, Some(expires));
}

#[tokio::test]
async fn recovered_sandbox_keeps_stored_expiry() {
    let world = TestWorld::new();
    let record = SessionBuilder::new("ses-rec")
        .status(SessionStatus::Running)
        .sandbox_id("sbx-9")
        .tunnel_url("http://old")
        .sandbox_expires_at_ms(5_000_000_000)
        .build();
    let session_id = world.seed_record(record).await;
    world.provider.set_recovered(true);
    world.provider.set_expires_at_ms(None);
    let runtime = runtime(&world, &session_id);
    let hub = RecordingHub::new(session_id.clone());

    runtime.ensure_runtime_ready(hub, EnsureOpts::connect()).await.unwrap();

    let row = world.session(&session_id).await;
    assert_eq!(row.sandbox_id.as_deref(), Some("sbx-9"));
    assert_eq!(row.sandbox_expires_at_ms, Some(5_000_000_000));
}

#[tokio::test]
async fn fresh_sandbox_without_ttl_clears_expiry() {
    let world = TestWorld::new();
    let record = SessionBuilder::new("ses-f")
        .sandbox_id("sbx-old")
        .sandbox_expires_at_ms(5_000_000_000)
        .build();
    let session_id = world.seed_record(record).await;
    let runtime = runtime(&world, &session_id);
    let hub = RecordingHub::new(session_id.clone());

    runtime.ensure_runtime_ready(hub, EnsureOpts::connect()).await.unwrap();

    let row = world.session(&session_id).await;
    assert_eq!(row.sandbox_id.as_deref(), Some("sbx-1"));
    assert_eq!(row.sandbox_expires_at_ms, None);
}

#[tokio::test]
async fn post_thaw_git_pull_runs_for_snapshot_starts() {
    let world = TestWorld::new();
    let record = SessionBuilder::new("ses-g").snapshot_id("snap-1").build();
    let session_id = world.seed_record(record).await;
    let runtime = runtime(&world, &session_id);
    let hub = RecordingHub::new(session_id.clone());

    runtime.ensure_runtime_ready(hub, EnsureOpts::connect()).await.unwrap();

    let execs: Vec<String> = world
        .provider
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            harbor_adapters::sandbox::FakeProviderCall::Exec { command, .. } => Some(command),
            _ => None,
        })
        .collect();
    assert_eq!(execs, vec!["git pull --ff-only".to_string()]);
}

#[tokio::test]
async fn cold_start_skips_git_pull() {
    let world = TestWorld::new();
    let session_id = world.seed_session().await;
    let runtime = runtime(&world, &session_id);
    let hub = RecordingHub::new(session_id.clone());

    runtime.ensure_runtime_ready(hub, EnsureOpts::connect()).await.unwrap();
    assert!(world
        .provider
        .calls()
        .iter()
        .all(|c| !matches!(c, harbor_adapters::sandbox::FakeProviderCall::Exec { .. })));
}

#[tokio::test]
async fn sandbox_env_injects_session_credentials() {
    let world = TestWorld::new();
    let session_id = SessionId::new("ses-env");
    let runtime = Arc::new(SessionRuntime::new(session_id.clone(), world.deps.clone()));

    let env = runtime.sandbox_env(&std::collections::BTreeMap::new());
    assert_eq!(env.get("HARBOR_SESSION_ID").map(String::as_str), Some("ses-env"));
    assert!(env.get("HARBOR_SESSION_TOKEN").is_some_and(|t| t.starts_with("hbs_")));
    assert!(env.contains_key("HARBOR_GATEWAY_URL"));
}

#[test]
fn session_token_is_deterministic_and_session_scoped() {
    let a = derive_session_token("svc", &SessionId::new("ses-1"));
    let b = derive_session_token("svc", &SessionId::new("ses-1"));
    let c = derive_session_token("svc", &SessionId::new("ses-2"));
    let d = derive_session_token("other", &SessionId::new("ses-1"));
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_ne!(a, d);
}

#[tokio::test]
async fn reset_preserves_agent_session_identity() {
    let world = TestWorld::new();
    let session_id = world.seed_session().await;
    let runtime = runtime(&world, &session_id);
    let hub = RecordingHub::new(session_id.clone());

    runtime.ensure_runtime_ready(hub.clone(), EnsureOpts::connect()).await.unwrap();
    runtime.disconnect_stream();
    runtime.reset_sandbox_state();

    assert!(!runtime.is_ready());
    assert_eq!(runtime.agent_session_id().as_deref(), Some("agt-1"));

    // Re-ensure reuses the verified stored id instead of creating a new one
    runtime.ensure_runtime_ready(hub, EnsureOpts::migration()).await.unwrap();
    assert_eq!(runtime.agent_session_id().as_deref(), Some("agt-1"));
}

#[tokio::test]
async fn unknown_provider_is_fatal() {
    let world = TestWorld::new();
    let record = SessionBuilder::new("ses-u").sandbox_provider("marsbox").build();
    let session_id = world.seed_record(record).await;
    let runtime = runtime(&world, &session_id);
    let hub = RecordingHub::new(session_id.clone());

    let result = runtime.ensure_runtime_ready(hub, EnsureOpts::connect()).await;
    assert!(matches!(result, Err(RuntimeError::UnknownProvider(p)) if p == "marsbox"));
}
