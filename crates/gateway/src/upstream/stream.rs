// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event stream abstraction.
//!
//! The runtime connects a stream per sandbox; frames flow into the hub's
//! pump channel. The client never reconnects on its own; the hub owns that
//! policy and distinguishes a requested disconnect from a transport failure
//! by the [`DisconnectReason`].

use super::types::AgentEvent;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream connect failed: {0}")]
    Connect(String),
    #[error("stream request rejected: HTTP {0}")]
    Http(u16),
    #[error("stream response had no body")]
    NoBody,
}

/// Why a stream stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called; not a failure.
    Requested,
    /// No upstream event within the heartbeat window.
    HeartbeatTimeout,
    /// A single chunk read exceeded the read timeout.
    ReadTimeout,
    /// The socket closed (EOF, abort, terminated frame).
    StreamClosed,
    /// Anything else.
    StreamError(String),
}

harbor_core::simple_display! {
    DisconnectReason {
        Requested => "requested",
        HeartbeatTimeout => "heartbeat_timeout",
        ReadTimeout => "read_timeout",
        StreamClosed => "stream_closed",
        StreamError(..) => "stream_error",
    }
}

/// One frame from the stream task to the hub pump.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Event(AgentEvent),
    Disconnected(DisconnectReason),
}

/// A live stream. Dropping the handle does not disconnect; call
/// [`StreamHandle::disconnect`].
pub trait StreamHandle: Send + Sync {
    /// Cancel in-flight reads and stop the heartbeat monitor.
    fn disconnect(&self);
    fn is_connected(&self) -> bool;
}

/// Factory for event streams.
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    async fn connect(
        &self,
        url: &str,
        tx: mpsc::Sender<StreamFrame>,
    ) -> Result<Box<dyn StreamHandle>, StreamError>;
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Handle produced by [`FakeStreamConnector`].
    pub struct FakeStreamHandle {
        connected: Arc<AtomicBool>,
        tx: mpsc::Sender<StreamFrame>,
    }

    impl StreamHandle for FakeStreamHandle {
        fn disconnect(&self) {
            if self.connected.swap(false, Ordering::SeqCst) {
                let _ = self.tx.try_send(StreamFrame::Disconnected(DisconnectReason::Requested));
            }
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    struct FakeStreamState {
        connects: Vec<String>,
        senders: Vec<mpsc::Sender<StreamFrame>>,
        flags: Vec<Arc<AtomicBool>>,
        fail_next: Option<StreamError>,
    }

    /// Fake connector: records connects and lets tests push frames through
    /// the most recent stream.
    #[derive(Clone)]
    pub struct FakeStreamConnector {
        state: Arc<Mutex<FakeStreamState>>,
    }

    impl Default for FakeStreamConnector {
        fn default() -> Self {
            Self::new()
        }
    }

    impl FakeStreamConnector {
        pub fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(FakeStreamState {
                    connects: Vec::new(),
                    senders: Vec::new(),
                    flags: Vec::new(),
                    fail_next: None,
                })),
            }
        }

        pub fn connects(&self) -> Vec<String> {
            self.state.lock().connects.clone()
        }

        pub fn fail_next_connect(&self, err: StreamError) {
            self.state.lock().fail_next = Some(err);
        }

        /// Push an event through the most recent stream.
        pub async fn emit(&self, event: AgentEvent) {
            let tx = self.state.lock().senders.last().cloned();
            if let Some(tx) = tx {
                let _ = tx.send(StreamFrame::Event(event)).await;
            }
        }

        /// Drop the most recent stream with the given reason.
        pub async fn drop_stream(&self, reason: DisconnectReason) {
            let (tx, flag) = {
                let state = self.state.lock();
                (state.senders.last().cloned(), state.flags.last().cloned())
            };
            if let Some(flag) = flag {
                flag.store(false, Ordering::SeqCst);
            }
            if let Some(tx) = tx {
                let _ = tx.send(StreamFrame::Disconnected(reason)).await;
            }
        }
    }

    #[async_trait]
    impl StreamConnector for FakeStreamConnector {
        async fn connect(
            &self,
            url: &str,
            tx: mpsc::Sender<StreamFrame>,
        ) -> Result<Box<dyn StreamHandle>, StreamError> {
            let mut state = self.state.lock();
            if let Some(err) = state.fail_next.take() {
                return Err(err);
            }
            state.connects.push(url.to_string());
            let connected = Arc::new(AtomicBool::new(true));
            state.senders.push(tx.clone());
            state.flags.push(connected.clone());
            Ok(Box::new(FakeStreamHandle { connected, tx }))
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeStreamConnector, FakeStreamHandle};
