// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session runtime: sandbox + agent-session lifecycle.
//!
//! The hot path is [`SessionRuntime::ensure_runtime_ready`], single-flighted
//! per hub: concurrent callers share one in-progress attempt and observe the
//! same result. "Ready" means a tunnel URL, an agent session id, and a
//! connected event stream; everything past the migration-lock barrier is
//! elided when the runtime is already there.

pub mod agent_session;

use crate::deps::Deps;
use crate::hub::HubPort;
use crate::leases::{LeaseError, Leases};
use crate::upstream::{AgentApiError, StreamError, StreamFrame, StreamHandle};
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use harbor_adapters::{BillingAction, BillingDecision, ProviderError};
use harbor_core::{SessionId, SessionPatch, SessionRecord, SessionStatus};
use harbor_store::BaseSnapshotKey;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Why the runtime is being brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureReason {
    Connect,
    Prompt,
    AutoReconnect,
    Migration,
    Command,
}

#[derive(Debug, Clone, Copy)]
pub struct EnsureOpts {
    pub reason: EnsureReason,
    pub skip_migration_lock: bool,
}

impl EnsureOpts {
    pub fn connect() -> Self {
        Self { reason: EnsureReason::Connect, skip_migration_lock: false }
    }

    pub fn prompt() -> Self {
        Self { reason: EnsureReason::Prompt, skip_migration_lock: false }
    }

    pub fn command() -> Self {
        Self { reason: EnsureReason::Command, skip_migration_lock: false }
    }

    pub fn auto_reconnect() -> Self {
        Self { reason: EnsureReason::AutoReconnect, skip_migration_lock: false }
    }

    pub fn migration() -> Self {
        Self { reason: EnsureReason::Migration, skip_migration_lock: true }
    }
}

/// Errors out of `ensure_runtime_ready`. Clone so the single-flight result
/// can be shared between concurrent callers.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("unknown sandbox provider: {0}")]
    UnknownProvider(String),

    /// Billing denied the resume; already surfaced to clients.
    #[error("billing denied: {0}")]
    BillingDenied(String),

    /// Memory snapshot restore failed; the snapshot id was cleared so the
    /// next attempt cold-starts.
    #[error("snapshot restore failed: {0}")]
    SnapshotRestore(String),

    /// The attempt was abandoned (session paused/stopped during reconnect).
    #[error("runtime attempt aborted: {0}")]
    Aborted(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("lease error: {0}")]
    Lease(String),

    #[error("agent api error: {0}")]
    Agent(String),

    #[error("stream error: {0}")]
    Stream(String),
}

impl From<ProviderError> for RuntimeError {
    fn from(e: ProviderError) -> Self {
        RuntimeError::Provider(e.to_string())
    }
}

impl From<harbor_store::StoreError> for RuntimeError {
    fn from(e: harbor_store::StoreError) -> Self {
        RuntimeError::Store(e.to_string())
    }
}

impl From<LeaseError> for RuntimeError {
    fn from(e: LeaseError) -> Self {
        RuntimeError::Lease(e.to_string())
    }
}

impl From<AgentApiError> for RuntimeError {
    fn from(e: AgentApiError) -> Self {
        RuntimeError::Agent(e.to_string())
    }
}

impl From<StreamError> for RuntimeError {
    fn from(e: StreamError) -> Self {
        RuntimeError::Stream(e.to_string())
    }
}

/// What a successful `ensure_runtime_ready` guarantees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ready {
    pub tunnel_url: String,
    pub agent_session_id: String,
}

#[derive(Default)]
struct RuntimeState {
    sandbox_id: Option<String>,
    tunnel_url: Option<String>,
    preview_url: Option<String>,
    agent_session_id: Option<String>,
    expires_at_ms: Option<u64>,
    started_from_snapshot: bool,
}

type EnsureFlight = Shared<BoxFuture<'static, Result<Ready, RuntimeError>>>;

/// Per-session runtime.
pub struct SessionRuntime {
    session_id: SessionId,
    deps: Arc<Deps>,
    leases: Leases,
    state: Mutex<RuntimeState>,
    stream: Mutex<Option<Box<dyn StreamHandle>>>,
    frame_tx: mpsc::Sender<StreamFrame>,
    frame_rx: Mutex<Option<mpsc::Receiver<StreamFrame>>>,
    flight: Mutex<Option<EnsureFlight>>,
}

impl SessionRuntime {
    pub fn new(session_id: SessionId, deps: Arc<Deps>) -> Self {
        let (frame_tx, frame_rx) = mpsc::channel(256);
        Self {
            leases: deps.leases(),
            session_id,
            deps,
            state: Mutex::new(RuntimeState::default()),
            stream: Mutex::new(None),
            frame_tx,
            frame_rx: Mutex::new(Some(frame_rx)),
            flight: Mutex::new(None),
        }
    }

    /// The hub pump takes the frame receiver exactly once.
    pub fn take_frame_rx(&self) -> Option<mpsc::Receiver<StreamFrame>> {
        self.frame_rx.lock().take()
    }

    pub fn tunnel_url(&self) -> Option<String> {
        self.state.lock().tunnel_url.clone()
    }

    pub fn preview_url(&self) -> Option<String> {
        self.state.lock().preview_url.clone()
    }

    pub fn sandbox_id(&self) -> Option<String> {
        self.state.lock().sandbox_id.clone()
    }

    pub fn agent_session_id(&self) -> Option<String> {
        self.state.lock().agent_session_id.clone()
    }

    /// `(tunnel_url, agent_session_id)` when both are known.
    pub fn upstream_ids(&self) -> Option<(String, String)> {
        let state = self.state.lock();
        Some((state.tunnel_url.clone()?, state.agent_session_id.clone()?))
    }

    pub fn is_ready(&self) -> bool {
        let state = self.state.lock();
        state.tunnel_url.is_some()
            && state.agent_session_id.is_some()
            && self.stream.lock().as_ref().is_some_and(|h| h.is_connected())
    }

    /// Disconnect the event stream, if any.
    pub fn disconnect_stream(&self) {
        if let Some(handle) = self.stream.lock().take() {
            handle.disconnect();
        }
    }

    /// Forget the sandbox. The next ensure cold-starts or resumes.
    pub fn reset_sandbox_state(&self) {
        let mut state = self.state.lock();
        state.sandbox_id = None;
        state.tunnel_url = None;
        state.preview_url = None;
        state.expires_at_ms = None;
        // agent_session_id survives: transcript identity is preserved
        // across migrations.
    }

    /// Single-flighted runtime bring-up. Concurrent callers share the same
    /// in-progress attempt; the slot clears on success and failure alike.
    pub async fn ensure_runtime_ready(
        self: &Arc<Self>,
        hub: Arc<dyn HubPort>,
        opts: EnsureOpts,
    ) -> Result<Ready, RuntimeError> {
        let flight = {
            let mut slot = self.flight.lock();
            match slot.as_ref() {
                Some(flight) => flight.clone(),
                None => {
                    let this = self.clone();
                    let task = tokio::spawn(async move { this.ensure_inner(hub, opts).await });
                    let flight: EnsureFlight = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) => {
                                Err(RuntimeError::Aborted(format!("ensure task died: {}", e)))
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        let result = flight.await;
        self.flight.lock().take();
        result
    }

    async fn ensure_inner(
        self: Arc<Self>,
        hub: Arc<dyn HubPort>,
        opts: EnsureOpts,
    ) -> Result<Ready, RuntimeError> {
        // 1. Migration lock barrier
        if !opts.skip_migration_lock {
            self.leases.wait_for_migration_lock_release(&self.session_id).await?;
        }

        // Elide everything else when already ready
        if self.is_ready() {
            let state = self.state.lock();
            if let (Some(tunnel_url), Some(agent_session_id)) =
                (state.tunnel_url.clone(), state.agent_session_id.clone())
            {
                return Ok(Ready { tunnel_url, agent_session_id });
            }
        }

        // 2. Context reload from persistence
        let session = self
            .deps
            .sessions
            .get(&self.session_id)
            .await?
            .ok_or_else(|| RuntimeError::SessionNotFound(self.session_id.clone()))?;
        if opts.reason == EnsureReason::AutoReconnect && session.status.blocks_auto_reconnect() {
            return Err(RuntimeError::Aborted(format!(
                "session is {} during auto reconnect",
                session.status
            )));
        }
        let context = self
            .deps
            .contexts
            .load(&self.session_id)
            .await
            .map_err(|e| RuntimeError::Store(e.to_string()))?;

        // 3. Billing gate for configuration-backed sessions
        if session.configuration_id.is_some() {
            let decision = self
                .deps
                .billing
                .check(&session, BillingAction::SessionResume)
                .await
                .map_err(|e| RuntimeError::Aborted(e.to_string()))?;
            if let BillingDecision::Deny { message } = decision {
                hub.emit_status(SessionStatus::Error, Some(message.clone()));
                return Err(RuntimeError::BillingDenied(message));
            }
        }

        // 4. Provider dispatch + base snapshot
        let provider = self
            .deps
            .providers
            .get(&session.sandbox_provider)
            .ok_or_else(|| RuntimeError::UnknownProvider(session.sandbox_provider.clone()))?;
        let base_snapshot_id = self
            .deps
            .base_snapshots
            .lookup(&BaseSnapshotKey {
                version_key: self.deps.config.version_key.clone(),
                provider: provider.name().to_string(),
                app_name: self.deps.config.app_name.clone(),
            })
            .await?;

        // 5. Ensure sandbox
        let started_from_snapshot = session.snapshot_id.is_some();
        let request = harbor_adapters::EnsureSandboxRequest {
            session_id: self.session_id.clone(),
            env: self.sandbox_env(&context.env),
            repos: context.repos.clone(),
            snapshot_id: session.snapshot_id.clone(),
            base_snapshot_id,
            previous_sandbox_id: session.sandbox_id.clone(),
            snapshot_has_deps: context.snapshot_has_deps,
        };
        let result = match provider.ensure_sandbox(request).await {
            Ok(result) => result,
            Err(ProviderError::SnapshotRestoreFailed(msg)) => {
                // Clear the persisted snapshot so the next attempt cold-starts
                let _ = self
                    .deps
                    .sessions
                    .update(
                        &self.session_id,
                        SessionPatch { snapshot_id: Some(None), ..SessionPatch::default() },
                    )
                    .await;
                return Err(RuntimeError::SnapshotRestore(msg));
            }
            Err(e) => return Err(e.into()),
        };

        // 6. Expiry reconciliation
        let expires_at_ms = result.expires_at_ms.or_else(|| {
            if result.recovered && session.sandbox_id.as_deref() == Some(result.sandbox_id.as_str())
            {
                session.sandbox_expires_at_ms
            } else {
                None
            }
        });

        // 7. Post-thaw git freshness, best effort
        if started_from_snapshot && provider.supports_exec() {
            let workspace = context
                .workspace_path
                .clone()
                .unwrap_or_else(|| self.deps.config.workspace_dir.clone());
            match provider
                .exec_command(&result.sandbox_id, "git pull --ff-only", Some(&workspace))
                .await
            {
                Ok(out) if !out.success() => {
                    tracing::debug!(
                        session_id = %self.session_id,
                        stderr = %out.stderr,
                        "post-thaw git pull failed"
                    );
                }
                Err(e) => {
                    tracing::debug!(session_id = %self.session_id, error = %e, "post-thaw git pull error");
                }
                _ => {}
            }
        }

        // 8. Persist
        self.deps
            .sessions
            .update(
                &self.session_id,
                SessionPatch {
                    status: Some(SessionStatus::Running),
                    sandbox_id: Some(Some(result.sandbox_id.clone())),
                    tunnel_url: Some(Some(result.tunnel_url.clone())),
                    preview_url: Some(result.preview_url.clone()),
                    sandbox_expires_at_ms: Some(expires_at_ms),
                    pause_reason: Some(None),
                    paused_at_ms: Some(None),
                    ..SessionPatch::default()
                },
            )
            .await?;

        {
            let mut state = self.state.lock();
            state.sandbox_id = Some(result.sandbox_id.clone());
            state.tunnel_url = Some(result.tunnel_url.clone());
            state.preview_url = result.preview_url.clone();
            state.expires_at_ms = expires_at_ms;
            state.started_from_snapshot = started_from_snapshot;
        }

        // 9. Schedule expiry, fire and forget
        {
            let expiry = self.deps.expiry();
            let session_id = self.session_id.clone();
            tokio::spawn(async move {
                if let Err(e) = expiry.schedule_session_expiry(&session_id, expires_at_ms).await {
                    tracing::warn!(session_id = %session_id, error = %e, "expiry scheduling failed");
                }
            });
        }

        // 10. Agent session identity
        let restored = started_from_snapshot && !result.recovered;
        let agent_session_id = agent_session::ensure_agent_session(
            self.deps.agent.as_ref(),
            &result.tunnel_url,
            session.agent_session_id.as_deref(),
            restored,
        )
        .await?;
        if session.agent_session_id.as_deref() != Some(agent_session_id.as_str()) {
            self.deps
                .sessions
                .update(
                    &self.session_id,
                    SessionPatch {
                        agent_session_id: Some(Some(agent_session_id.clone())),
                        ..SessionPatch::default()
                    },
                )
                .await?;
        }
        self.state.lock().agent_session_id = Some(agent_session_id.clone());
        hub.bind_agent_session(&agent_session_id);

        // 11. Connect the event stream
        self.disconnect_stream();
        let handle =
            self.deps.streams.connect(&result.tunnel_url, self.frame_tx.clone()).await?;
        *self.stream.lock() = Some(handle);

        // 12. Announce
        hub.emit_status(SessionStatus::Running, None);
        tracing::info!(
            session_id = %self.session_id,
            sandbox_id = %result.sandbox_id,
            recovered = result.recovered,
            "runtime ready"
        );

        Ok(Ready { tunnel_url: result.tunnel_url, agent_session_id })
    }

    /// Merged env for the sandbox: context env plus the injected
    /// session-scoped credentials under well-known names.
    fn sandbox_env(&self, context_env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut env = context_env.clone();
        env.insert(
            "HARBOR_SESSION_TOKEN".to_string(),
            derive_session_token(&self.deps.config.service_token, &self.session_id),
        );
        env.insert("HARBOR_GATEWAY_URL".to_string(), self.deps.config.gateway_url.clone());
        env.insert("HARBOR_SESSION_ID".to_string(), self.session_id.to_string());
        env
    }
}

/// Deterministic per-session token: restored snapshots keep valid
/// credentials because the derivation has no random input.
pub fn derive_session_token(service_token: &str, session_id: &SessionId) -> String {
    let mut hasher = Sha256::new();
    hasher.update(service_token.as_bytes());
    hasher.update(b":");
    hasher.update(session_id.as_str().as_bytes());
    format!("hbs_{:x}", hasher.finalize())
}

/// Fetch the latest session record, for callers that need a fresh row.
pub(crate) async fn reload_session(
    deps: &Deps,
    session_id: &SessionId,
) -> Result<SessionRecord, RuntimeError> {
    deps.sessions
        .get(session_id)
        .await?
        .ok_or_else(|| RuntimeError::SessionNotFound(session_id.clone()))
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
