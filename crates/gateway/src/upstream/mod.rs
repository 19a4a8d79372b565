// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream coding-agent boundary.
//!
//! # Module layout
//!
//! - [`types`] — event/part shapes and edge validation
//! - [`api`] — the agent HTTP API surface
//! - [`http`] — HTTP/1.1 transport over TCP
//! - [`sse`] — the server-sent-event stream client
//! - [`stream`] — stream connector abstraction used by the runtime
//!
//! The agent speaks plain HTTP on the sandbox tunnel; requests use
//! Content-Length framing, the event stream stays open for the life of the
//! connection. Payload shapes are dynamic at this boundary; anything that
//! fails validation goes to the log-and-drop path, never into the core.

pub mod api;
pub mod http;
pub mod sse;
pub mod stream;
pub mod types;

pub use api::{AgentApi, AgentApiError, AgentSessionInfo, PromptImage, PromptPayload};
pub use http::HttpAgentApi;
pub use sse::SseConnector;
pub use stream::{DisconnectReason, StreamConnector, StreamError, StreamFrame, StreamHandle};
pub use types::{AgentEvent, ParseOutcome, Part, PartKind, ToolPartStatus, UpstreamError};

#[cfg(any(test, feature = "test-support"))]
pub use api::{FakeAgentApi, FakeAgentCall};
#[cfg(any(test, feature = "test-support"))]
pub use stream::FakeStreamConnector;

/// Whether an error message looks like a transient network failure.
///
/// Agent-session creation retries only on these. Pattern-matched for now;
/// structured error codes would replace this.
pub fn is_network_error(message: &str) -> bool {
    const PATTERNS: [&str; 7] = [
        "fetch failed",
        "ECONN",
        "ETIMEDOUT",
        "socket",
        "connection closed",
        "connection refused",
        "os error",
    ];
    PATTERNS.iter().any(|p| message.contains(p))
}
