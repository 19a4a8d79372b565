// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Narrow hub interface for the runtime and migration controller.
//!
//! The event processor, migration controller, and runtime never reach into
//! the hub; they see only this surface.

use harbor_core::{SessionId, SessionStatus};
use harbor_wire::ServerMessage;

pub trait HubPort: Send + Sync + 'static {
    fn session_id(&self) -> &SessionId;

    /// Send a frame to every connected client.
    fn broadcast(&self, frame: &ServerMessage);

    /// Broadcast a `status` frame.
    fn emit_status(&self, status: SessionStatus, message: Option<String>);

    /// Number of connected sockets.
    fn client_count(&self) -> usize;

    /// Socket count, with headless (automation) sessions counting as one
    /// perpetual client when no socket is connected.
    fn effective_client_count(&self) -> usize;

    /// Bind the event processor to an agent session id.
    fn bind_agent_session(&self, agent_session_id: &str);

    /// Drop the in-flight assistant message; returns the cleared id.
    fn clear_current_assistant_message(&self) -> Option<String>;

    /// Whether an assistant message is in progress upstream.
    fn assistant_in_flight(&self) -> bool;

    fn has_running_tools(&self) -> bool;

    /// Externally executed tool calls currently in flight (HTTP hook).
    fn external_tool_count(&self) -> u32;

    /// Ask the registry to drop this hub.
    fn signal_evict(&self);
}
