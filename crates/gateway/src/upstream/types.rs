// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream event shapes and edge validation.
//!
//! Events arrive as `{type, properties}` JSON. Unknown types are ignored;
//! malformed payloads (a part missing `id`, `messageID`, or `type`) are
//! rejected to the log-and-drop path. The core only ever sees the tagged
//! variants below.

use serde_json::Value;

/// Terminal state of a tool part upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPartStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ToolPartStatus {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ToolPartStatus::Pending),
            "running" => Some(ToolPartStatus::Running),
            "completed" => Some(ToolPartStatus::Completed),
            "error" => Some(ToolPartStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolPartStatus::Completed | ToolPartStatus::Error)
    }
}

/// The payload of a `message.part.updated` event.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub id: String,
    pub message_id: String,
    /// Agent session the part belongs to; parts from other sessions are
    /// dropped by the processor.
    pub session_id: Option<String>,
    pub kind: PartKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartKind {
    Text {
        text: Option<String>,
        delta: Option<String>,
        /// True once the part carries an end timestamp.
        done: bool,
    },
    Tool {
        call_id: String,
        name: Option<String>,
        status: Option<ToolPartStatus>,
        args: Option<Value>,
        summary: Option<String>,
        result: Option<String>,
    },
}

/// `message.updated` metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    pub id: String,
    pub session_id: Option<String>,
    pub role: Option<String>,
}

/// `session.error` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamError {
    pub name: Option<String>,
    pub message: Option<String>,
    pub data_message: Option<String>,
}

impl UpstreamError {
    /// The richest available human-readable message.
    pub fn best_message(&self) -> String {
        self.data_message
            .clone()
            .or_else(|| self.message.clone())
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| "unknown upstream error".to_string())
    }

    /// Expected on user cancel; suppressed downstream.
    pub fn is_abort(&self) -> bool {
        self.name.as_deref() == Some("MessageAbortedError")
    }
}

/// One upstream event.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    ServerConnected,
    ServerHeartbeat,
    MessageUpdated { info: MessageInfo },
    MessagePartUpdated { part: Part },
    SessionIdle { session_id: Option<String> },
    SessionStatus { session_id: Option<String>, status_type: Option<String> },
    SessionError { session_id: Option<String>, error: UpstreamError },
}

/// Outcome of decoding one event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Event(AgentEvent),
    /// Unknown event type; silently ignored.
    Ignored,
    /// Structurally invalid payload; logged and dropped by the caller.
    Malformed(String),
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parse_part(value: &Value) -> Result<Part, String> {
    let id = str_field(value, "id").ok_or("part missing id")?;
    let message_id = str_field(value, "messageID").ok_or("part missing messageID")?;
    let part_type = str_field(value, "type").ok_or("part missing type")?;
    let session_id = str_field(value, "sessionID");

    let kind = match part_type.as_str() {
        "text" => PartKind::Text {
            text: str_field(value, "text"),
            delta: str_field(value, "delta"),
            done: value
                .get("time")
                .and_then(|t| t.get("end"))
                .is_some_and(|v| !v.is_null()),
        },
        "tool" => {
            let state = value.get("state");
            PartKind::Tool {
                call_id: str_field(value, "callID").unwrap_or_else(|| id.clone()),
                name: str_field(value, "tool"),
                status: state
                    .and_then(|s| s.get("status"))
                    .and_then(Value::as_str)
                    .and_then(ToolPartStatus::parse),
                args: state.and_then(|s| s.get("input")).filter(|v| !v.is_null()).cloned(),
                summary: state
                    .and_then(|s| s.get("metadata"))
                    .and_then(|m| m.get("summary"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                result: state
                    .and_then(|s| s.get("output"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }
        }
        other => return Err(format!("unknown part type: {}", other)),
    };

    Ok(Part { id, message_id, session_id, kind })
}

/// Decode one SSE `data:` payload into an [`AgentEvent`].
pub fn parse_event(payload: &str) -> ParseOutcome {
    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => return ParseOutcome::Malformed(format!("bad json: {}", e)),
    };
    let Some(event_type) = value.get("type").and_then(Value::as_str) else {
        return ParseOutcome::Malformed("missing event type".to_string());
    };
    let props = value.get("properties").cloned().unwrap_or(Value::Null);

    match event_type {
        "server.connected" => ParseOutcome::Event(AgentEvent::ServerConnected),
        "server.heartbeat" => ParseOutcome::Event(AgentEvent::ServerHeartbeat),
        "message.updated" => {
            let info = props.get("info").cloned().unwrap_or(Value::Null);
            match str_field(&info, "id") {
                Some(id) => ParseOutcome::Event(AgentEvent::MessageUpdated {
                    info: MessageInfo {
                        id,
                        session_id: str_field(&info, "sessionID"),
                        role: str_field(&info, "role"),
                    },
                }),
                None => ParseOutcome::Malformed("message.updated missing info.id".to_string()),
            }
        }
        "message.part.updated" => {
            let part = props.get("part").cloned().unwrap_or(Value::Null);
            match parse_part(&part) {
                Ok(part) => ParseOutcome::Event(AgentEvent::MessagePartUpdated { part }),
                Err(e) => ParseOutcome::Malformed(e),
            }
        }
        "session.idle" => ParseOutcome::Event(AgentEvent::SessionIdle {
            session_id: str_field(&props, "sessionID"),
        }),
        "session.status" => ParseOutcome::Event(AgentEvent::SessionStatus {
            session_id: str_field(&props, "sessionID"),
            status_type: props
                .get("status")
                .and_then(|s| s.get("type"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        "session.error" => {
            let error = props.get("error").cloned().unwrap_or(Value::Null);
            ParseOutcome::Event(AgentEvent::SessionError {
                session_id: str_field(&props, "sessionID"),
                error: UpstreamError {
                    name: str_field(&error, "name"),
                    message: str_field(&error, "message"),
                    data_message: error
                        .get("data")
                        .and_then(|d| d.get("message"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                },
            })
        }
        _ => ParseOutcome::Ignored,
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
