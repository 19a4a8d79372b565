// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound server frames.

use crate::message::{Message, ToolStatus};
use harbor_core::SessionStatus;
use serde::{Deserialize, Serialize};

/// Per-file entry in a git status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitFileStatus {
    pub path: String,
    /// Two-letter porcelain code, e.g. `M `, `??`
    pub code: String,
}

/// Parsed `git status` for the workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitStatusReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default)]
    pub files: Vec<GitFileStatus>,
    #[serde(default)]
    pub clean: bool,
}

/// Frame from the gateway to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Keepalive reply
    Pong,

    /// Session status transition
    Status {
        status: SessionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Replay on connect: history plus the preview tunnel, if any
    Init {
        messages: Vec<Message>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preview_tunnel_url: Option<String>,
    },

    /// The sandbox preview URL became known
    PreviewUrl { url: String },

    /// A new message shell (user echo or empty assistant message)
    Message { message: Message },

    /// One streamed text delta
    Token { message_id: String, part_id: String, delta: String },

    /// A text part reached its final form
    TextPartComplete { message_id: String, part_id: String, text: String },

    /// A tool call started (sent again if args arrive late)
    ToolStart {
        message_id: String,
        tool_call_id: String,
        part_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<serde_json::Value>,
    },

    /// Progress summary for a running tool call
    ToolMetadata { message_id: String, tool_call_id: String, part_id: String, summary: String },

    /// A tool call finished
    ToolEnd {
        message_id: String,
        tool_call_id: String,
        part_id: String,
        status: ToolStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },

    /// The assistant message is complete
    MessageComplete { message_id: String },

    /// The in-flight assistant message was aborted
    MessageCancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },

    /// Terminal error surfaced to the client
    Error { message: String },

    /// Result of a `save_snapshot` command
    SnapshotResult {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// One command's output from a `run_auto_start`
    AutoStartOutput {
        run_id: String,
        command: String,
        output: String,
        #[serde(default)]
        exit_code: i32,
    },

    /// Result of `get_git_status`
    GitStatus { report: GitStatusReport },

    /// Result of a git write command
    GitResult {
        op: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ServerMessage {
    /// Status frame shorthand.
    pub fn status(status: SessionStatus) -> Self {
        ServerMessage::Status { status, message: None }
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
