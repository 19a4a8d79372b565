// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notification sink for session lifecycle transitions.
//!
//! The gateway enqueues a notice whenever a migration flow reaches a terminal
//! state (idle pause, orphan cleanup, force-terminate). Delivery is
//! best-effort; production wires this to the event bus, the default just
//! logs.

use async_trait::async_trait;
use harbor_core::{PauseReason, SessionId};
use thiserror::Error;

/// Errors from notify operations
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Why the notice was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    Paused { reason: PauseReason },
    Stopped,
    Migrated,
}

/// One lifecycle notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNotice {
    pub session_id: SessionId,
    pub kind: NoticeKind,
    pub message: String,
}

/// Adapter for delivering lifecycle notices.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, notice: SessionNotice) -> Result<(), NotifyError>;
}

/// Default sink: structured log lines only.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notice: SessionNotice) -> Result<(), NotifyError> {
        tracing::info!(
            session_id = %notice.session_id,
            kind = ?notice.kind,
            message = %notice.message,
            "session notice"
        );
        Ok(())
    }
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Recorded notice
    pub type NotifyCall = SessionNotice;

    /// Fake notifier for testing
    #[derive(Clone, Default)]
    pub struct FakeNotifier {
        calls: Arc<Mutex<Vec<NotifyCall>>>,
    }

    impl FakeNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        /// Get all recorded notices
        pub fn calls(&self) -> Vec<NotifyCall> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn notify(&self, notice: SessionNotice) -> Result<(), NotifyError> {
            self.calls.lock().push(notice);
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeNotifier, NotifyCall};
