// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Migration controller.
//!
//! Decides and executes snapshot/migrate/terminate under the per-session
//! migration lock. Every persistent transition is CAS-guarded on the
//! observed `sandbox_id`; losing the CAS means another actor advanced the
//! session and the local flow aborts silently after cleaning local state.
//!
//! A failure counter circuit-breaks repeated snapshot failures into a
//! force-terminate so a broken sandbox cannot burn compute forever.

use crate::deps::Deps;
use crate::expiry::ExpiryScheduler;
use crate::hub::HubPort;
use crate::leases::Leases;
use crate::runtime::{EnsureOpts, RuntimeError, SessionRuntime};
use crate::telemetry::TelemetryAccumulator;
use harbor_adapters::{
    snapshot_keeps_sandbox, NoticeKind, ProviderError, SandboxProvider, SessionNotice,
};
use harbor_core::{
    PauseReason, SessionId, SessionOutcome, SessionPatch, SessionRecord, SessionStatus,
};
use harbor_store::CasOutcome;
use harbor_wire::ServerMessage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const EXPIRY_LOCK_TTL: Duration = Duration::from_secs(60);
const IDLE_LOCK_TTL: Duration = Duration::from_secs(300);
const DRAIN_POLL: Duration = Duration::from_millis(500);
pub const MAX_SNAPSHOT_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    Normal,
    Migrating,
}

#[derive(Debug, Error)]
enum MigrationError {
    /// Another actor advanced the session; nothing to do.
    #[error("superseded by another actor")]
    Superseded,
    #[error("provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("store: {0}")]
    Store(#[from] harbor_store::StoreError),
    #[error("runtime: {0}")]
    Runtime(#[from] RuntimeError),
}

/// One snapshot-for-pause attempt.
struct PauseSnapshot {
    snapshot_id: String,
    keep_sandbox: bool,
}

/// Per-session migration controller.
pub struct MigrationController {
    session_id: SessionId,
    deps: Arc<Deps>,
    leases: Leases,
    expiry: ExpiryScheduler,
    runtime: Arc<SessionRuntime>,
    telemetry: Arc<TelemetryAccumulator>,
    state: Mutex<MigrationState>,
    snapshot_failures: Mutex<u32>,
    stopped: AtomicBool,
}

impl MigrationController {
    pub fn new(
        session_id: SessionId,
        deps: Arc<Deps>,
        runtime: Arc<SessionRuntime>,
        telemetry: Arc<TelemetryAccumulator>,
    ) -> Self {
        Self {
            leases: deps.leases(),
            expiry: deps.expiry(),
            session_id,
            deps,
            runtime,
            telemetry,
            state: Mutex::new(MigrationState::Normal),
            snapshot_failures: Mutex::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> MigrationState {
        *self.state.lock()
    }

    #[cfg(test)]
    pub(crate) fn set_state_for_tests(&self, state: MigrationState) {
        *self.state.lock() = state;
    }

    pub fn snapshot_failures(&self) -> u32 {
        *self.snapshot_failures.lock()
    }

    /// Stop monitoring; further migration calls are no-ops.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn provider(&self, session: &SessionRecord) -> Result<Arc<dyn SandboxProvider>, MigrationError> {
        self.deps
            .providers
            .get(&session.sandbox_provider)
            .ok_or_else(|| RuntimeError::UnknownProvider(session.sandbox_provider.clone()).into())
    }

    /// The sandbox TTL is about to elapse: migrate (clients present) or
    /// pause (idle). Runs under the migration lock; a held lock skips.
    pub async fn run_expiry_migration(&self, hub: &Arc<dyn HubPort>) {
        if self.is_stopped() {
            return;
        }
        let create_new_sandbox = hub.effective_client_count() > 0;
        let ran = self
            .leases
            .run_with_migration_lock(&self.session_id, EXPIRY_LOCK_TTL, || async {
                if create_new_sandbox {
                    self.migrate_active(hub).await
                } else {
                    self.idle_expiry(hub).await
                }
            })
            .await;
        match ran {
            Ok(Some(Ok(()))) => {}
            Ok(Some(Err(MigrationError::Superseded))) => {
                tracing::info!(session_id = %self.session_id, "expiry migration superseded");
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "expiry migration failed");
                *self.state.lock() = MigrationState::Normal;
            }
            Ok(None) => {
                tracing::info!(session_id = %self.session_id, "migration lock held, skipping expiry");
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "migration lock unavailable");
            }
        }
    }

    /// Replace the sandbox under the feet of connected clients.
    async fn migrate_active(&self, hub: &Arc<dyn HubPort>) -> Result<(), MigrationError> {
        let session = self.reload().await?;
        let Some(sandbox_id) = session.sandbox_id.clone() else {
            return Err(MigrationError::Superseded);
        };
        let provider = self.provider(&session)?;

        *self.state.lock() = MigrationState::Migrating;
        hub.emit_status(SessionStatus::Migrating, None);

        // Drain the in-flight assistant message, force-aborting at deadline
        self.ensure_agent_stopped(hub, self.deps.config.msg_complete_timeout).await;

        let snapshot_id = provider.snapshot(&sandbox_id, Some("expiry-migration")).await?;
        self.deps
            .sessions
            .update(
                &self.session_id,
                SessionPatch {
                    snapshot_id: Some(Some(snapshot_id.clone())),
                    ..SessionPatch::default()
                },
            )
            .await?;

        self.runtime.disconnect_stream();
        self.runtime.reset_sandbox_state();

        self.runtime
            .ensure_runtime_ready(hub.clone(), EnsureOpts::migration())
            .await?;

        hub.emit_status(SessionStatus::Running, None);
        *self.state.lock() = MigrationState::Normal;
        *self.snapshot_failures.lock() = 0;
        tracing::info!(session_id = %self.session_id, %snapshot_id, "expiry migration complete");
        Ok(())
    }

    /// No clients: pause instead of migrating.
    async fn idle_expiry(&self, hub: &Arc<dyn HubPort>) -> Result<(), MigrationError> {
        let session = self.reload().await?;
        let Some(sandbox_id) = session.sandbox_id.clone() else {
            return Err(MigrationError::Superseded);
        };
        let provider = self.provider(&session)?;

        self.runtime.disconnect_stream();

        let snapshot = self.snapshot_for_pause(provider.as_ref(), &sandbox_id).await?;
        if !snapshot.keep_sandbox {
            if let Err(e) = provider.terminate(&sandbox_id).await {
                tracing::warn!(session_id = %self.session_id, error = %e, "terminate failed");
            }
        }

        let now = self.deps.clock.epoch_ms();
        let outcome = self
            .deps
            .sessions
            .update_if_sandbox(
                &self.session_id,
                Some(&sandbox_id),
                SessionPatch {
                    status: Some(SessionStatus::Paused),
                    snapshot_id: Some(Some(snapshot.snapshot_id.clone())),
                    sandbox_id: Some(snapshot.keep_sandbox.then(|| sandbox_id.clone())),
                    paused_at_ms: Some(Some(now)),
                    pause_reason: Some(Some(PauseReason::Inactivity)),
                    latest_task: Some(None),
                    ..SessionPatch::default()
                },
            )
            .await?;
        if outcome == CasOutcome::Lost {
            tracing::info!(session_id = %self.session_id, "idle expiry lost CAS, cleaning local state");
        }

        self.notify_paused(PauseReason::Inactivity).await;
        self.runtime.reset_sandbox_state();
        self.stop();
        hub.signal_evict();
        Ok(())
    }

    /// Pause the session after an idle window with no clients and no
    /// in-flight tools. Caller has already re-checked `should_idle_snapshot`
    /// and cancelled pending reconnect timers.
    pub async fn run_idle_snapshot(&self, hub: &Arc<dyn HubPort>) {
        if self.is_stopped() {
            return;
        }
        if self.snapshot_failures() >= MAX_SNAPSHOT_FAILURES {
            tracing::warn!(
                session_id = %self.session_id,
                failures = self.snapshot_failures(),
                "snapshot circuit breaker tripped, force terminating"
            );
            self.force_terminate(hub).await;
            return;
        }

        let ran = self
            .leases
            .run_with_migration_lock(&self.session_id, IDLE_LOCK_TTL, || async {
                self.idle_snapshot_locked(hub).await
            })
            .await;
        match ran {
            Ok(Some(Ok(()))) => {
                *self.snapshot_failures.lock() = 0;
            }
            Ok(Some(Err(MigrationError::Superseded))) => {
                tracing::info!(session_id = %self.session_id, "idle snapshot superseded");
            }
            Ok(Some(Err(e))) => {
                let failures = {
                    let mut failures = self.snapshot_failures.lock();
                    *failures += 1;
                    *failures
                };
                tracing::warn!(session_id = %self.session_id, error = %e, failures, "idle snapshot failed");
                self.runtime.reset_sandbox_state();
                hub.signal_evict();
            }
            Ok(None) => {
                tracing::info!(session_id = %self.session_id, "migration lock held, skipping idle snapshot");
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "migration lock unavailable");
            }
        }
    }

    async fn idle_snapshot_locked(&self, hub: &Arc<dyn HubPort>) -> Result<(), MigrationError> {
        // 1. Fresh row; another actor may have paused already
        let session = self.reload().await?;
        let Some(sandbox_id) = session.sandbox_id.clone() else {
            return Err(MigrationError::Superseded);
        };

        // 2. A client may have reappeared while we waited for the lock
        if hub.client_count() > 0 || hub.external_tool_count() > 0 || hub.has_running_tools() {
            tracing::info!(session_id = %self.session_id, "activity resumed, aborting idle snapshot");
            return Err(MigrationError::Superseded);
        }

        // 3. Disconnect before any provider mutation (reconnect race)
        self.runtime.disconnect_stream();

        // 4.-5. Snapshot, then terminate unless the strategy keeps the sandbox
        let provider = self.provider(&session)?;
        let snapshot = self.snapshot_for_pause(provider.as_ref(), &sandbox_id).await?;
        if !snapshot.keep_sandbox {
            if let Err(e) = provider.terminate(&sandbox_id).await {
                tracing::warn!(session_id = %self.session_id, error = %e, "terminate failed");
            }
        }

        // 6. Best-effort telemetry flush
        self.flush_telemetry().await;

        // 7. CAS-guarded persist
        let now = self.deps.clock.epoch_ms();
        let outcome = self
            .deps
            .sessions
            .update_if_sandbox(
                &self.session_id,
                Some(&sandbox_id),
                SessionPatch {
                    status: Some(SessionStatus::Paused),
                    snapshot_id: Some(Some(snapshot.snapshot_id.clone())),
                    sandbox_id: Some(snapshot.keep_sandbox.then(|| sandbox_id.clone())),
                    paused_at_ms: Some(Some(now)),
                    pause_reason: Some(Some(PauseReason::Inactivity)),
                    latest_task: Some(None),
                    ..SessionPatch::default()
                },
            )
            .await?;
        if outcome == CasOutcome::Lost {
            tracing::info!(session_id = %self.session_id, "idle snapshot lost CAS, cleaning local state");
        }

        // 8.-10. Cancel expiry, notify, clean local state, evict
        if let Err(e) = self.expiry.cancel_session_expiry(&self.session_id).await {
            tracing::warn!(session_id = %self.session_id, error = %e, "expiry cancel failed");
        }
        self.notify_paused(PauseReason::Inactivity).await;
        self.runtime.reset_sandbox_state();
        self.stop();
        hub.signal_evict();
        tracing::info!(
            session_id = %self.session_id,
            snapshot_id = %snapshot.snapshot_id,
            kept_sandbox = snapshot.keep_sandbox,
            "idle snapshot complete"
        );
        Ok(())
    }

    /// Strategy priority: memory snapshot → pause → filesystem snapshot.
    async fn snapshot_for_pause(
        &self,
        provider: &dyn SandboxProvider,
        sandbox_id: &str,
    ) -> Result<PauseSnapshot, MigrationError> {
        let snapshot_id = if provider.supports_memory_snapshot() {
            provider.memory_snapshot(sandbox_id).await?
        } else if provider.supports_pause() {
            provider.pause(sandbox_id).await?
        } else {
            provider.snapshot(sandbox_id, Some("idle")).await?
        };
        let keep_sandbox = snapshot_keeps_sandbox(&snapshot_id);
        Ok(PauseSnapshot { snapshot_id, keep_sandbox })
    }

    /// Poll until the in-flight assistant message completes; at the deadline
    /// abort upstream, broadcast the cancellation, and clear.
    pub async fn ensure_agent_stopped(&self, hub: &Arc<dyn HubPort>, timeout: Duration) {
        if !hub.assistant_in_flight() {
            return;
        }
        let polls = (timeout.as_millis() / DRAIN_POLL.as_millis()).max(1) as u64;
        for _ in 0..polls {
            tokio::time::sleep(DRAIN_POLL).await;
            if !hub.assistant_in_flight() {
                return;
            }
        }

        tracing::info!(session_id = %self.session_id, "drain deadline hit, aborting upstream");
        if let Some((tunnel_url, agent_session_id)) = self.runtime.upstream_ids() {
            if let Err(e) = self.deps.agent.abort(&tunnel_url, &agent_session_id).await {
                tracing::debug!(session_id = %self.session_id, error = %e, "abort failed");
            }
        }
        let message_id = hub.clear_current_assistant_message();
        hub.broadcast(&ServerMessage::MessageCancelled { message_id });
    }

    /// Circuit-breaker path: repeated snapshot failures cap compute spend.
    pub async fn force_terminate(&self, hub: &Arc<dyn HubPort>) {
        self.runtime.disconnect_stream();

        if let Ok(session) = self.reload().await {
            if let (Some(sandbox_id), Ok(provider)) =
                (session.sandbox_id.clone(), self.provider(&session))
            {
                if let Err(e) = provider.terminate(&sandbox_id).await {
                    tracing::warn!(session_id = %self.session_id, error = %e, "terminate failed");
                }
            }
        }

        self.flush_telemetry().await;

        if let Err(e) = self
            .deps
            .sessions
            .update(
                &self.session_id,
                SessionPatch {
                    status: Some(SessionStatus::Stopped),
                    sandbox_id: Some(None),
                    pause_reason: Some(Some(PauseReason::SnapshotFailed)),
                    outcome: Some(SessionOutcome::Failed),
                    ..SessionPatch::default()
                },
            )
            .await
        {
            tracing::warn!(session_id = %self.session_id, error = %e, "force terminate persist failed");
        }

        if let Err(e) = self.expiry.cancel_session_expiry(&self.session_id).await {
            tracing::warn!(session_id = %self.session_id, error = %e, "expiry cancel failed");
        }
        let _ = self
            .deps
            .notifier
            .notify(SessionNotice {
                session_id: self.session_id.clone(),
                kind: NoticeKind::Stopped,
                message: "session stopped after repeated snapshot failures".to_string(),
            })
            .await;

        self.runtime.reset_sandbox_state();
        self.stop();
        hub.signal_evict();
    }

    async fn flush_telemetry(&self) {
        let sessions = self.deps.sessions.clone();
        let session_id = self.session_id.clone();
        let result = self
            .telemetry
            .flush(move |snap| {
                let sessions = sessions.clone();
                let session_id = session_id.clone();
                async move {
                    let metrics = serde_json::json!({
                        "toolCalls": snap.tool_calls,
                        "messagesExchanged": snap.messages_exchanged,
                        "activeMs": snap.active_ms,
                    });
                    sessions
                        .update(
                            &session_id,
                            SessionPatch {
                                metrics: Some(metrics),
                                pr_urls: Some(snap.pr_urls.clone()),
                                latest_task: snap.latest_task.clone().map(Some),
                                ..SessionPatch::default()
                            },
                        )
                        .await
                        .map(|_| ())
                }
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(session_id = %self.session_id, error = %e, "telemetry flush failed");
        }
    }

    async fn notify_paused(&self, reason: PauseReason) {
        let _ = self
            .deps
            .notifier
            .notify(SessionNotice {
                session_id: self.session_id.clone(),
                kind: NoticeKind::Paused { reason },
                message: format!("session paused ({})", reason),
            })
            .await;
    }

    async fn reload(&self) -> Result<SessionRecord, MigrationError> {
        Ok(crate::runtime::reload_session(&self.deps, &self.session_id).await?)
    }
}

#[cfg(test)]
#[path = "migration_tests.rs"]
mod tests;
