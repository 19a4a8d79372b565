// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream events → client protocol.
//!
//! Per-prompt state machine. Invariants it maintains:
//! - for a given part, each of `start`, `args`, `end`, and any specific
//!   `summary:N` is emitted at most once per owning assistant message,
//! - `message_complete` never fires while a tool is running,
//! - events from other agent sessions are dropped,
//! - the first text part after a prompt is the echoed user message and is
//!   suppressed.

use crate::upstream::{AgentEvent, Part, PartKind, ToolPartStatus};
use harbor_wire::{Message, ServerMessage, ToolStatus};
use std::collections::{HashMap, HashSet};

/// Tracked state of one in-stream tool call.
#[derive(Debug, Clone, Default)]
pub struct ToolState {
    pub start_emitted: bool,
    pub args_emitted: bool,
    pub end_emitted: bool,
    pub running: bool,
}

/// Pure state machine mapping upstream events to client frames.
#[derive(Default)]
pub struct EventProcessor {
    /// Only events for this agent session pass the filter.
    agent_session_id: Option<String>,
    current_assistant_message_id: Option<String>,
    current_user_message_id: Option<String>,
    assistant_complete: bool,
    /// Whether any tool part was seen for the current assistant message.
    tools_seen: bool,
    tool_states: HashMap<String, ToolState>,
    sent_keys: HashSet<String>,
}

impl EventProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the processor to an agent session; events for others are dropped.
    pub fn bind_agent_session(&mut self, agent_session_id: impl Into<String>) {
        self.agent_session_id = Some(agent_session_id.into());
    }

    /// Reset all per-prompt state. Called when a new prompt is sent.
    pub fn reset_for_new_prompt(&mut self) {
        self.current_assistant_message_id = None;
        self.current_user_message_id = None;
        self.assistant_complete = false;
        self.tools_seen = false;
        self.tool_states.clear();
        self.sent_keys.clear();
    }

    /// Clear the in-flight assistant message (cancellation path, driven by
    /// the hub). Returns the cleared id.
    pub fn clear_current_assistant_message(&mut self) -> Option<String> {
        self.tool_states.clear();
        self.tools_seen = false;
        self.assistant_complete = false;
        self.current_assistant_message_id.take()
    }

    /// Whether an assistant message is in progress.
    pub fn assistant_in_flight(&self) -> bool {
        self.current_assistant_message_id.is_some() && !self.assistant_complete
    }

    pub fn has_running_tools(&self) -> bool {
        self.tool_states.values().any(|t| t.running)
    }

    pub fn current_assistant_message_id(&self) -> Option<&str> {
        self.current_assistant_message_id.as_deref()
    }

    /// Consume one upstream event, producing zero or more client frames.
    pub fn handle(&mut self, event: AgentEvent) -> Vec<ServerMessage> {
        match event {
            AgentEvent::ServerConnected | AgentEvent::ServerHeartbeat => Vec::new(),
            AgentEvent::MessageUpdated { info } => {
                if !self.session_matches(info.session_id.as_deref()) {
                    return Vec::new();
                }
                // Learn the echoed user message id early when upstream tells us
                if info.role.as_deref() == Some("user") && self.current_user_message_id.is_none() {
                    self.current_user_message_id = Some(info.id);
                }
                Vec::new()
            }
            AgentEvent::MessagePartUpdated { part } => {
                if !self.session_matches(part.session_id.as_deref()) {
                    return Vec::new();
                }
                self.handle_part(part)
            }
            AgentEvent::SessionIdle { session_id } => {
                if !self.session_matches(session_id.as_deref()) {
                    return Vec::new();
                }
                self.handle_idle()
            }
            AgentEvent::SessionStatus { session_id, status_type } => {
                if !self.session_matches(session_id.as_deref()) {
                    return Vec::new();
                }
                if status_type.as_deref() == Some("idle") {
                    self.handle_idle()
                } else {
                    tracing::debug!(status = ?status_type, "unhandled session status");
                    Vec::new()
                }
            }
            AgentEvent::SessionError { session_id, error } => {
                if !self.session_matches(session_id.as_deref()) {
                    return Vec::new();
                }
                if error.is_abort() {
                    // Expected on user cancel
                    return Vec::new();
                }
                vec![ServerMessage::Error { message: error.best_message() }]
            }
        }
    }

    /// A `None` session id passes the filter (some events omit it).
    fn session_matches(&self, session_id: Option<&str>) -> bool {
        match (&self.agent_session_id, session_id) {
            (Some(bound), Some(seen)) => bound == seen,
            _ => true,
        }
    }

    /// Emit at most once per key. True if the key was fresh.
    fn claim(&mut self, key: String) -> bool {
        self.sent_keys.insert(key)
    }

    fn handle_part(&mut self, part: Part) -> Vec<ServerMessage> {
        // The first text part after a prompt is the echoed user message.
        if let PartKind::Text { .. } = part.kind {
            if self.current_user_message_id.is_none()
                && self.current_assistant_message_id.is_none()
            {
                self.current_user_message_id = Some(part.message_id);
                return Vec::new();
            }
            if self.current_user_message_id.as_deref() == Some(part.message_id.as_str()) {
                return Vec::new();
            }
        }

        let mut out = Vec::new();

        // First non-user part creates the assistant shell.
        if self.current_assistant_message_id.is_none() {
            self.current_assistant_message_id = Some(part.message_id.clone());
            self.assistant_complete = false;
            out.push(ServerMessage::Message {
                message: Message::assistant(part.message_id.clone(), ""),
            });
        }

        // Parts for stale assistant messages (e.g. the dedup'd duplicate of a
        // text-only completion) still stream through under the current id.
        let message_id = part.message_id.clone();

        match part.kind {
            PartKind::Text { text, delta, done } => {
                if let Some(delta) = delta {
                    out.push(ServerMessage::Token {
                        message_id,
                        part_id: part.id,
                        delta,
                    });
                } else if done {
                    if let Some(text) = text {
                        if self.claim(format!("{}:complete", part.id)) {
                            out.push(ServerMessage::TextPartComplete {
                                message_id,
                                part_id: part.id,
                                text,
                            });
                        }
                    }
                }
            }
            PartKind::Tool { call_id, name, status, args, summary, result } => {
                self.tools_seen = true;
                let state = self.tool_states.entry(call_id.clone()).or_default();
                let was_started = state.start_emitted;
                let had_args = state.args_emitted;
                state.running = !status.is_some_and(|s| s.is_terminal());

                if !was_started && self.claim(format!("{}:start", part.id)) {
                    let state = self.tool_states.entry(call_id.clone()).or_default();
                    state.start_emitted = true;
                    state.args_emitted = args.is_some();
                    if args.is_some() {
                        self.sent_keys.insert(format!("{}:args", part.id));
                    }
                    out.push(ServerMessage::ToolStart {
                        message_id: message_id.clone(),
                        tool_call_id: call_id.clone(),
                        part_id: part.id.clone(),
                        name: name.clone(),
                        args: args.clone(),
                    });
                } else if !had_args && args.is_some() && self.claim(format!("{}:args", part.id)) {
                    // Late-arriving args: a second tool_start carries them.
                    if let Some(state) = self.tool_states.get_mut(&call_id) {
                        state.args_emitted = true;
                    }
                    out.push(ServerMessage::ToolStart {
                        message_id: message_id.clone(),
                        tool_call_id: call_id.clone(),
                        part_id: part.id.clone(),
                        name: name.clone(),
                        args: args.clone(),
                    });
                }

                if let Some(summary) = summary {
                    if self.claim(format!("{}:summary:{}", part.id, summary.len())) {
                        out.push(ServerMessage::ToolMetadata {
                            message_id: message_id.clone(),
                            tool_call_id: call_id.clone(),
                            part_id: part.id.clone(),
                            summary,
                        });
                    }
                }

                if let Some(status) = status {
                    if status.is_terminal() && self.claim(format!("{}:end", part.id)) {
                        if let Some(state) = self.tool_states.get_mut(&call_id) {
                            state.end_emitted = true;
                            state.running = false;
                        }
                        out.push(ServerMessage::ToolEnd {
                            message_id,
                            tool_call_id: call_id,
                            part_id: part.id,
                            status: match status {
                                ToolPartStatus::Error => ToolStatus::Error,
                                _ => ToolStatus::Completed,
                            },
                            result,
                        });
                    }
                }
            }
        }

        out
    }

    /// Completion rule: `message_complete` iff idle was seen and no tool is
    /// running. Tool-bearing messages clear the current id so the next
    /// assistant message gets a fresh shell; text-only messages keep it,
    /// which deduplicates a duplicate upstream message.
    fn handle_idle(&mut self) -> Vec<ServerMessage> {
        if self.has_running_tools() {
            return Vec::new();
        }
        let Some(message_id) = self.current_assistant_message_id.clone() else {
            return Vec::new();
        };
        if self.assistant_complete {
            return Vec::new();
        }
        self.assistant_complete = true;
        if self.tools_seen {
            self.current_assistant_message_id = None;
            self.assistant_complete = false;
            self.tools_seen = false;
            self.tool_states.clear();
        }
        vec![ServerMessage::MessageComplete { message_id }]
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
