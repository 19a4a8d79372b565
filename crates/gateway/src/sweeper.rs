// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orphan sweeper.
//!
//! Periodic reconciliation of lease state against the store: a session whose
//! row says `running` but whose runtime lease is gone has lost its gateway
//! (crash, deploy without drain). Local hubs get a normal idle snapshot;
//! truly orphaned sessions get the lock-guarded cleanup directly. Runs once
//! at startup, then every sweep interval.

use crate::deps::Deps;
use crate::hub::HubRegistry;
use harbor_adapters::{snapshot_keeps_sandbox, NoticeKind, SessionNotice};
use harbor_core::{PauseReason, SessionId, SessionPatch, SessionStatus};
use harbor_store::CasOutcome;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ORPHAN_LOCK_TTL: Duration = Duration::from_secs(300);

/// One full reconciliation pass. Split from the loop for tests.
pub async fn sweep_once(deps: &Arc<Deps>, registry: &Arc<HubRegistry>) {
    let leases = deps.leases();
    let running = match deps.sessions.list_running().await {
        Ok(running) => running,
        Err(e) => {
            tracing::warn!(error = %e, "orphan sweep query failed");
            return;
        }
    };

    for session_id in running {
        // A live runtime lease means some process is tending the session
        match leases.has_runtime_lease(&session_id).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "lease check failed, skipping");
                continue;
            }
        }

        if let Some(hub) = registry.get(&session_id) {
            tracing::info!(session_id = %session_id, "leaseless session has a local hub, idle snapshotting");
            if hub.should_idle_snapshot() {
                hub.idle_fire().await;
            }
            continue;
        }

        tracing::info!(session_id = %session_id, "orphaned session, cleaning up");
        cleanup_orphan(deps, &session_id).await;
    }
}

/// Lock-guarded cleanup of a session with no hub anywhere.
async fn cleanup_orphan(deps: &Arc<Deps>, session_id: &SessionId) {
    let leases = deps.leases();
    let ran = leases
        .run_with_migration_lock(session_id, ORPHAN_LOCK_TTL, || async {
            cleanup_orphan_locked(deps, session_id).await
        })
        .await;
    match ran {
        Ok(Some(())) => {}
        Ok(None) => {
            tracing::info!(session_id = %session_id, "migration lock held, skipping orphan cleanup");
        }
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "orphan cleanup lock unavailable");
        }
    }
}

async fn cleanup_orphan_locked(deps: &Arc<Deps>, session_id: &SessionId) {
    let leases = deps.leases();
    // Re-check the lease: another replica may have adopted the session while
    // we waited for the lock
    match leases.has_runtime_lease(session_id).await {
        Ok(false) => {}
        _ => return,
    }

    let session = match deps.sessions.get(session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "orphan reload failed");
            return;
        }
    };
    if session.status != SessionStatus::Running {
        return;
    }

    let now = deps.clock.epoch_ms();
    let Some(sandbox_id) = session.sandbox_id.clone() else {
        // Row says running but there is no sandbox: repair to paused
        let _ = deps
            .sessions
            .update_if_sandbox(
                session_id,
                None,
                SessionPatch {
                    status: Some(SessionStatus::Paused),
                    paused_at_ms: Some(Some(now)),
                    pause_reason: Some(Some(PauseReason::Orphaned)),
                    ..SessionPatch::default()
                },
            )
            .await;
        notify_orphaned(deps, session_id).await;
        return;
    };

    let Some(provider) = deps.providers.get(&session.sandbox_provider) else {
        tracing::warn!(
            session_id = %session_id,
            provider = %session.sandbox_provider,
            "orphaned session has unknown provider"
        );
        return;
    };

    // Snapshot strategy: memory → pause → filesystem
    let snapshot_id = if provider.supports_memory_snapshot() {
        provider.memory_snapshot(&sandbox_id).await
    } else if provider.supports_pause() {
        provider.pause(&sandbox_id).await
    } else {
        provider.snapshot(&sandbox_id, Some("orphan")).await
    };
    let snapshot_id = match snapshot_id {
        Ok(snapshot_id) => snapshot_id,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "orphan snapshot failed");
            return;
        }
    };
    let keep_sandbox = snapshot_keeps_sandbox(&snapshot_id);
    if !keep_sandbox {
        if let Err(e) = provider.terminate(&sandbox_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "orphan terminate failed");
        }
    }

    let outcome = deps
        .sessions
        .update_if_sandbox(
            session_id,
            Some(&sandbox_id),
            SessionPatch {
                status: Some(SessionStatus::Paused),
                snapshot_id: Some(Some(snapshot_id)),
                sandbox_id: Some(keep_sandbox.then(|| sandbox_id.clone())),
                paused_at_ms: Some(Some(now)),
                pause_reason: Some(Some(PauseReason::Orphaned)),
                ..SessionPatch::default()
            },
        )
        .await;
    match outcome {
        Ok(CasOutcome::Applied) => {}
        Ok(CasOutcome::Lost) => {
            tracing::info!(session_id = %session_id, "orphan cleanup lost CAS");
            return;
        }
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "orphan persist failed");
            return;
        }
    }

    if let Err(e) = deps.expiry().cancel_session_expiry(session_id).await {
        tracing::warn!(session_id = %session_id, error = %e, "expiry cancel failed");
    }
    notify_orphaned(deps, session_id).await;
    tracing::info!(session_id = %session_id, "orphan cleaned up");
}

async fn notify_orphaned(deps: &Arc<Deps>, session_id: &SessionId) {
    let _ = deps
        .notifier
        .notify(SessionNotice {
            session_id: session_id.clone(),
            kind: NoticeKind::Paused { reason: PauseReason::Orphaned },
            message: "session paused (orphaned)".to_string(),
        })
        .await;
}

/// Sweeper loop: one pass at startup, then every sweep interval.
pub async fn run_sweeper(
    deps: Arc<Deps>,
    registry: Arc<HubRegistry>,
    shutdown: CancellationToken,
) {
    let mut tick = tokio::time::interval(deps.config.sweep_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => sweep_once(&deps, &registry).await,
        }
    }
}

#[cfg(test)]
#[path = "sweeper_tests.rs"]
mod tests;
