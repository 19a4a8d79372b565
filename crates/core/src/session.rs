// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The persistent session entity.
//!
//! A session is the identity of a long-lived conversation. The relational
//! store holds one row per session; the gateway mutates it through
//! [`SessionPatch`] values, optionally CAS-guarded on `sandbox_id`.

use crate::id::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Creating,
    Resuming,
    Running,
    Paused,
    Stopped,
    Error,
    Migrating,
}

crate::simple_display! {
    SessionStatus {
        Creating => "creating",
        Resuming => "resuming",
        Running => "running",
        Paused => "paused",
        Stopped => "stopped",
        Error => "error",
        Migrating => "migrating",
    }
}

impl SessionStatus {
    /// Terminal states: nothing will revive the session without operator action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Stopped)
    }

    /// States in which an auto-reconnect attempt must not proceed.
    pub fn blocks_auto_reconnect(&self) -> bool {
        matches!(self, SessionStatus::Paused | SessionStatus::Stopped)
    }
}

/// What kind of work the session exists for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Coding,
    Setup,
    Cli,
    Automation,
}

crate::simple_display! {
    SessionType {
        Coding => "coding",
        Setup => "setup",
        Cli => "cli",
        Automation => "automation",
    }
}

/// The kind of client that drives the session.
///
/// `Automation` sessions are headless: they count as a perpetual client for
/// reconnect purposes and are never idle-snapshotted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Web,
    Cli,
    Slack,
    Automation,
    #[serde(other)]
    Unknown,
}

crate::simple_display! {
    ClientType {
        Web => "web",
        Cli => "cli",
        Slack => "slack",
        Automation => "automation",
        Unknown => "unknown",
    }
}

impl ClientType {
    pub fn is_headless(&self) -> bool {
        matches!(self, ClientType::Automation)
    }
}

/// Why a session was paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    Inactivity,
    Orphaned,
    SnapshotFailed,
}

crate::simple_display! {
    PauseReason {
        Inactivity => "inactivity",
        Orphaned => "orphaned",
        SnapshotFailed => "snapshot_failed",
    }
}

/// Recorded outcome of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    Failed,
}

/// Telemetry blob persisted alongside the session row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionTelemetry {
    #[serde(default)]
    pub metrics: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_task: Option<String>,
    /// Deduplicated, externally visible set of PR URLs.
    #[serde(default)]
    pub pr_urls: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SessionOutcome>,
}

/// One session row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub organization_id: String,
    pub created_by: Option<String>,
    /// Nullable for "scratch" sessions with no saved configuration.
    #[serde(default)]
    pub configuration_id: Option<String>,
    pub session_type: SessionType,
    #[serde(default)]
    pub client_type: Option<ClientType>,
    pub status: SessionStatus,
    #[serde(default)]
    pub sandbox_id: Option<String>,
    pub sandbox_provider: String,
    #[serde(default)]
    pub snapshot_id: Option<String>,
    /// Epoch milliseconds when the current sandbox expires, if the provider
    /// reported one. When set it is strictly after the moment it was persisted.
    #[serde(default)]
    pub sandbox_expires_at_ms: Option<u64>,
    #[serde(default)]
    pub agent_session_id: Option<String>,
    #[serde(default)]
    pub tunnel_url: Option<String>,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub paused_at_ms: Option<u64>,
    #[serde(default)]
    pub pause_reason: Option<PauseReason>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub telemetry: SessionTelemetry,
}

/// Session row invariant violations, checked by the stores on write.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("running session must have a sandbox id and tunnel url")]
    RunningWithoutSandbox,
    #[error("paused session must have a snapshot id")]
    PausedWithoutSnapshot,
}

impl SessionRecord {
    /// Check the row-level invariants from the data model.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        match self.status {
            SessionStatus::Running if self.sandbox_id.is_none() || self.tunnel_url.is_none() => {
                Err(InvariantViolation::RunningWithoutSandbox)
            }
            SessionStatus::Paused if self.snapshot_id.is_none() => {
                Err(InvariantViolation::PausedWithoutSnapshot)
            }
            _ => Ok(()),
        }
    }

    /// Whether the session is driven by a headless client.
    pub fn is_headless(&self) -> bool {
        self.client_type.is_some_and(|c| c.is_headless())
    }
}

/// Partial update applied to a session row.
///
/// `Option<Option<T>>` fields distinguish "leave unchanged" (`None`) from
/// "set to null" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub sandbox_id: Option<Option<String>>,
    pub snapshot_id: Option<Option<String>>,
    pub tunnel_url: Option<Option<String>>,
    pub preview_url: Option<Option<String>>,
    pub agent_session_id: Option<Option<String>>,
    pub sandbox_expires_at_ms: Option<Option<u64>>,
    pub paused_at_ms: Option<Option<u64>>,
    pub pause_reason: Option<Option<PauseReason>>,
    pub latest_task: Option<Option<String>>,
    pub outcome: Option<SessionOutcome>,
    pub metrics: Option<serde_json::Value>,
    pub pr_urls: Option<BTreeSet<String>>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self == &SessionPatch::default()
    }

    /// Apply this patch to a record in place.
    pub fn apply(&self, record: &mut SessionRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(ref v) = self.sandbox_id {
            record.sandbox_id = v.clone();
        }
        if let Some(ref v) = self.snapshot_id {
            record.snapshot_id = v.clone();
        }
        if let Some(ref v) = self.tunnel_url {
            record.tunnel_url = v.clone();
        }
        if let Some(ref v) = self.preview_url {
            record.preview_url = v.clone();
        }
        if let Some(ref v) = self.agent_session_id {
            record.agent_session_id = v.clone();
        }
        if let Some(v) = self.sandbox_expires_at_ms {
            record.sandbox_expires_at_ms = v;
        }
        if let Some(v) = self.paused_at_ms {
            record.paused_at_ms = v;
        }
        if let Some(v) = self.pause_reason {
            record.pause_reason = v;
        }
        if let Some(ref v) = self.latest_task {
            record.telemetry.latest_task = v.clone();
        }
        if let Some(v) = self.outcome {
            record.telemetry.outcome = Some(v);
        }
        if let Some(ref v) = self.metrics {
            record.telemetry.metrics = v.clone();
        }
        if let Some(ref urls) = self.pr_urls {
            record.telemetry.pr_urls.extend(urls.iter().cloned());
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
mod builder {
    use super::*;

    /// Test builder for session rows.
    pub struct SessionBuilder {
        record: SessionRecord,
    }

    impl Default for SessionBuilder {
        fn default() -> Self {
            Self {
                record: SessionRecord {
                    session_id: SessionId::new("ses-test"),
                    organization_id: "org-test".to_string(),
                    created_by: Some("user-test".to_string()),
                    configuration_id: None,
                    session_type: SessionType::Coding,
                    client_type: Some(ClientType::Web),
                    status: SessionStatus::Creating,
                    sandbox_id: None,
                    sandbox_provider: "fake".to_string(),
                    snapshot_id: None,
                    sandbox_expires_at_ms: None,
                    agent_session_id: None,
                    tunnel_url: None,
                    preview_url: None,
                    paused_at_ms: None,
                    pause_reason: None,
                    created_at: chrono::DateTime::UNIX_EPOCH,
                    updated_at: chrono::DateTime::UNIX_EPOCH,
                    telemetry: SessionTelemetry::default(),
                },
            }
        }
    }

    impl SessionBuilder {
        pub fn new(session_id: impl Into<SessionId>) -> Self {
            let mut b = Self::default();
            b.record.session_id = session_id.into();
            b
        }

        pub fn status(mut self, status: SessionStatus) -> Self {
            self.record.status = status;
            self
        }

        pub fn session_type(mut self, session_type: SessionType) -> Self {
            self.record.session_type = session_type;
            self
        }

        pub fn client_type(mut self, client_type: ClientType) -> Self {
            self.record.client_type = Some(client_type);
            self
        }

        pub fn created_by(mut self, user: impl Into<String>) -> Self {
            self.record.created_by = Some(user.into());
            self
        }

        pub fn no_creator(mut self) -> Self {
            self.record.created_by = None;
            self
        }

        pub fn configuration_id(mut self, id: impl Into<String>) -> Self {
            self.record.configuration_id = Some(id.into());
            self
        }

        pub fn sandbox_id(mut self, id: impl Into<String>) -> Self {
            self.record.sandbox_id = Some(id.into());
            self
        }

        pub fn sandbox_provider(mut self, name: impl Into<String>) -> Self {
            self.record.sandbox_provider = name.into();
            self
        }

        pub fn snapshot_id(mut self, id: impl Into<String>) -> Self {
            self.record.snapshot_id = Some(id.into());
            self
        }

        pub fn tunnel_url(mut self, url: impl Into<String>) -> Self {
            self.record.tunnel_url = Some(url.into());
            self
        }

        pub fn agent_session_id(mut self, id: impl Into<String>) -> Self {
            self.record.agent_session_id = Some(id.into());
            self
        }

        pub fn sandbox_expires_at_ms(mut self, at: u64) -> Self {
            self.record.sandbox_expires_at_ms = Some(at);
            self
        }

        pub fn build(self) -> SessionRecord {
            self.record
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use builder::SessionBuilder;

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
