// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandbox provider adapter.
//!
//! Capability-based: `ensure_sandbox`, `snapshot`, and `terminate` are
//! required; pause, memory snapshots, and in-sandbox command execution are
//! optional and discovered through `supports_*` probes. Snapshot identifiers
//! with a `mem:` prefix denote memory snapshots, which leave the sandbox
//! alive; `pause:` identifiers are resume tokens from a provider pause.

use async_trait::async_trait;
use harbor_core::{RepoSpec, SessionId};
use std::collections::BTreeMap;
use thiserror::Error;

/// Snapshot id prefix for memory snapshots.
pub const MEMORY_SNAPSHOT_PREFIX: &str = "mem:";
/// Snapshot id prefix for pause resume tokens.
pub const PAUSE_SNAPSHOT_PREFIX: &str = "pause:";

/// Errors from provider operations.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Restoring from a memory snapshot failed. The caller clears the
    /// persisted snapshot id so the next attempt cold-starts.
    #[error("memory snapshot restore failed: {0}")]
    SnapshotRestoreFailed(String),

    #[error("sandbox not found: {0}")]
    NotFound(String),

    #[error("operation not supported by provider: {0}")]
    Unsupported(&'static str),

    /// Transient transport/infrastructure failure; retryable.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider operation failed: {0}")]
    Failed(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Unavailable(_))
    }
}

/// Everything a provider needs to produce a live sandbox for a session.
#[derive(Debug, Clone)]
pub struct EnsureSandboxRequest {
    pub session_id: SessionId,
    /// Merged env vars, session service token already injected.
    pub env: BTreeMap<String, String>,
    pub repos: Vec<RepoSpec>,
    /// Session snapshot to restore from, if any.
    pub snapshot_id: Option<String>,
    /// Immutable base snapshot for cold starts.
    pub base_snapshot_id: Option<String>,
    /// The sandbox the session last ran in, for recovery matching.
    pub previous_sandbox_id: Option<String>,
    pub snapshot_has_deps: bool,
}

impl EnsureSandboxRequest {
    pub fn for_session(session_id: SessionId) -> Self {
        Self {
            session_id,
            env: BTreeMap::new(),
            repos: Vec::new(),
            snapshot_id: None,
            base_snapshot_id: None,
            previous_sandbox_id: None,
            snapshot_has_deps: false,
        }
    }
}

/// What the provider reports back from `ensure_sandbox`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureSandboxResult {
    pub sandbox_id: String,
    pub tunnel_url: String,
    pub preview_url: Option<String>,
    pub ssh_host: Option<String>,
    pub ssh_port: Option<u16>,
    /// Epoch ms when the sandbox expires, if the provider enforces a TTL.
    pub expires_at_ms: Option<u64>,
    /// True when the provider found the previous sandbox still alive
    /// instead of creating a new one.
    pub recovered: bool,
}

/// Output of a command executed inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Adapter for an external sandbox provider.
#[async_trait]
pub trait SandboxProvider: Send + Sync + 'static {
    /// Provider name as stored in the session row.
    fn name(&self) -> &str;

    /// Create, resume, or recover a sandbox for the session.
    async fn ensure_sandbox(
        &self,
        req: EnsureSandboxRequest,
    ) -> Result<EnsureSandboxResult, ProviderError>;

    /// Take a filesystem snapshot. Returns the new snapshot id.
    async fn snapshot(
        &self,
        sandbox_id: &str,
        label: Option<&str>,
    ) -> Result<String, ProviderError>;

    /// Destroy the sandbox.
    async fn terminate(&self, sandbox_id: &str) -> Result<(), ProviderError>;

    fn supports_pause(&self) -> bool {
        false
    }

    /// Pause the sandbox in place. Returns a `pause:` resume token.
    /// The sandbox stays alive.
    async fn pause(&self, _sandbox_id: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Unsupported("pause"))
    }

    fn supports_memory_snapshot(&self) -> bool {
        false
    }

    /// Take a memory-inclusive snapshot. Returns a `mem:` snapshot id.
    /// The sandbox stays alive.
    async fn memory_snapshot(&self, _sandbox_id: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Unsupported("memory_snapshot"))
    }

    fn supports_exec(&self) -> bool {
        false
    }

    /// Run a shell command inside the sandbox.
    async fn exec_command(
        &self,
        _sandbox_id: &str,
        _command: &str,
        _cwd: Option<&str>,
    ) -> Result<ExecOutput, ProviderError> {
        Err(ProviderError::Unsupported("exec_command"))
    }

    fn supports_auto_pause(&self) -> bool {
        false
    }
}

/// Whether a snapshot id denotes a strategy that keeps the sandbox alive.
pub fn snapshot_keeps_sandbox(snapshot_id: &str) -> bool {
    snapshot_id.starts_with(MEMORY_SNAPSHOT_PREFIX)
        || snapshot_id.starts_with(PAUSE_SNAPSHOT_PREFIX)
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Recorded provider operation.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ProviderCall {
        Ensure { session_id: String, snapshot_id: Option<String> },
        Snapshot { sandbox_id: String },
        MemorySnapshot { sandbox_id: String },
        Pause { sandbox_id: String },
        Terminate { sandbox_id: String },
        Exec { sandbox_id: String, command: String },
    }

    struct FakeState {
        calls: Vec<ProviderCall>,
        ensure_count: u32,
        snapshot_count: u32,
        next_sandbox: u32,
        expires_at_ms: Option<u64>,
        recovered: bool,
        fail_ensure: Option<ProviderError>,
        fail_snapshot: Option<ProviderError>,
        fail_terminate: bool,
        exec_output: ExecOutput,
    }

    /// Fake provider for testing: records every call, hands out sequential
    /// sandbox ids, and can be told to fail specific operations.
    #[derive(Clone)]
    pub struct FakeSandboxProvider {
        supports_pause: bool,
        supports_memory: bool,
        supports_exec: bool,
        state: Arc<Mutex<FakeState>>,
    }

    impl Default for FakeSandboxProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    impl FakeSandboxProvider {
        pub fn new() -> Self {
            Self {
                supports_pause: false,
                supports_memory: false,
                supports_exec: true,
                state: Arc::new(Mutex::new(FakeState {
                    calls: Vec::new(),
                    ensure_count: 0,
                    snapshot_count: 0,
                    next_sandbox: 1,
                    expires_at_ms: None,
                    recovered: false,
                    fail_ensure: None,
                    fail_snapshot: None,
                    fail_terminate: false,
                    exec_output: ExecOutput {
                        exit_code: 0,
                        stdout: String::new(),
                        stderr: String::new(),
                    },
                })),
            }
        }

        pub fn with_pause(mut self) -> Self {
            self.supports_pause = true;
            self
        }

        pub fn with_memory_snapshot(mut self) -> Self {
            self.supports_memory = true;
            self
        }

        pub fn without_exec(mut self) -> Self {
            self.supports_exec = false;
            self
        }

        pub fn set_expires_at_ms(&self, at: Option<u64>) {
            self.state.lock().expires_at_ms = at;
        }

        pub fn set_recovered(&self, recovered: bool) {
            self.state.lock().recovered = recovered;
        }

        pub fn fail_next_ensure(&self, err: ProviderError) {
            self.state.lock().fail_ensure = Some(err);
        }

        pub fn fail_next_snapshot(&self, err: ProviderError) {
            self.state.lock().fail_snapshot = Some(err);
        }

        pub fn fail_terminate(&self, fail: bool) {
            self.state.lock().fail_terminate = fail;
        }

        pub fn set_exec_output(&self, output: ExecOutput) {
            self.state.lock().exec_output = output;
        }

        pub fn calls(&self) -> Vec<ProviderCall> {
            self.state.lock().calls.clone()
        }

        pub fn ensure_count(&self) -> u32 {
            self.state.lock().ensure_count
        }
    }

    #[async_trait]
    impl SandboxProvider for FakeSandboxProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn ensure_sandbox(
            &self,
            req: EnsureSandboxRequest,
        ) -> Result<EnsureSandboxResult, ProviderError> {
            let mut state = self.state.lock();
            state.calls.push(ProviderCall::Ensure {
                session_id: req.session_id.as_str().to_string(),
                snapshot_id: req.snapshot_id.clone(),
            });
            state.ensure_count += 1;
            if let Some(err) = state.fail_ensure.take() {
                return Err(err);
            }
            let (sandbox_id, recovered) = match (&req.previous_sandbox_id, state.recovered) {
                (Some(prev), true) => (prev.clone(), true),
                _ => {
                    let id = format!("sbx-{}", state.next_sandbox);
                    state.next_sandbox += 1;
                    (id, false)
                }
            };
            Ok(EnsureSandboxResult {
                tunnel_url: format!("http://{}.sandbox.local:8080", sandbox_id),
                preview_url: Some(format!("http://{}.preview.local", sandbox_id)),
                ssh_host: None,
                ssh_port: None,
                expires_at_ms: state.expires_at_ms,
                recovered,
                sandbox_id,
            })
        }

        async fn snapshot(
            &self,
            sandbox_id: &str,
            _label: Option<&str>,
        ) -> Result<String, ProviderError> {
            let mut state = self.state.lock();
            state.calls.push(ProviderCall::Snapshot { sandbox_id: sandbox_id.to_string() });
            if let Some(err) = state.fail_snapshot.take() {
                return Err(err);
            }
            state.snapshot_count += 1;
            Ok(format!("snap-{}", state.snapshot_count))
        }

        async fn terminate(&self, sandbox_id: &str) -> Result<(), ProviderError> {
            let mut state = self.state.lock();
            state.calls.push(ProviderCall::Terminate { sandbox_id: sandbox_id.to_string() });
            if state.fail_terminate {
                return Err(ProviderError::Failed("terminate refused".to_string()));
            }
            Ok(())
        }

        fn supports_pause(&self) -> bool {
            self.supports_pause
        }

        async fn pause(&self, sandbox_id: &str) -> Result<String, ProviderError> {
            if !self.supports_pause {
                return Err(ProviderError::Unsupported("pause"));
            }
            let mut state = self.state.lock();
            state.calls.push(ProviderCall::Pause { sandbox_id: sandbox_id.to_string() });
            Ok(format!("{}{}", PAUSE_SNAPSHOT_PREFIX, sandbox_id))
        }

        fn supports_memory_snapshot(&self) -> bool {
            self.supports_memory
        }

        async fn memory_snapshot(&self, sandbox_id: &str) -> Result<String, ProviderError> {
            if !self.supports_memory {
                return Err(ProviderError::Unsupported("memory_snapshot"));
            }
            let mut state = self.state.lock();
            state
                .calls
                .push(ProviderCall::MemorySnapshot { sandbox_id: sandbox_id.to_string() });
            if let Some(err) = state.fail_snapshot.take() {
                return Err(err);
            }
            state.snapshot_count += 1;
            Ok(format!("{}snap-{}", MEMORY_SNAPSHOT_PREFIX, state.snapshot_count))
        }

        fn supports_exec(&self) -> bool {
            self.supports_exec
        }

        async fn exec_command(
            &self,
            sandbox_id: &str,
            command: &str,
            _cwd: Option<&str>,
        ) -> Result<ExecOutput, ProviderError> {
            if !self.supports_exec {
                return Err(ProviderError::Unsupported("exec_command"));
            }
            let mut state = self.state.lock();
            state.calls.push(ProviderCall::Exec {
                sandbox_id: sandbox_id.to_string(),
                command: command.to_string(),
            });
            Ok(state.exec_output.clone())
        }
    }

    pub use ProviderCall as FakeProviderCall;
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeProviderCall, FakeSandboxProvider};

#[cfg(test)]
#[path = "sandbox_tests.rs"]
mod tests;
