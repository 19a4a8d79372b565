// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound client frames.

use serde::{Deserialize, Serialize};

/// Command from a connected client.
///
/// The dispatch set is closed: unknown `type` values fail to decode and the
/// hub answers with a single `error` frame, leaving the connection open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Keepalive; answered with `pong`
    Ping,

    /// Send a prompt to the agent
    Prompt {
        content: String,
        /// Inline images as `data:<mime>;base64,...` URIs
        #[serde(default, skip_serializing_if = "Option::is_none")]
        images: Option<Vec<String>>,
        /// Ignored; the authenticated user id always wins
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },

    /// Abort the in-flight assistant message
    Cancel,

    /// Report session status
    GetStatus,

    /// Replay message history
    GetMessages,

    /// Snapshot the sandbox on demand
    SaveSnapshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Run the configured service commands (or an explicit list)
    RunAutoStart {
        run_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commands: Option<Vec<String>>,
    },

    /// Git status of the workspace
    GetGitStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_path: Option<String>,
    },

    /// Create and switch to a branch
    GitCreateBranch {
        branch_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_path: Option<String>,
    },

    /// Commit staged (and optionally untracked) changes
    GitCommit {
        message: String,
        #[serde(default)]
        include_untracked: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        files: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_path: Option<String>,
    },

    /// Push the current branch
    GitPush {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_path: Option<String>,
    },

    /// Open a pull request for the current branch
    GitCreatePr {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_branch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workspace_path: Option<String>,
    },
}

impl ClientCommand {
    /// Whether this command mutates session state and therefore requires a
    /// logged-in user.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            ClientCommand::Prompt { .. }
                | ClientCommand::Cancel
                | ClientCommand::SaveSnapshot { .. }
                | ClientCommand::RunAutoStart { .. }
                | ClientCommand::GitCreateBranch { .. }
                | ClientCommand::GitCommit { .. }
                | ClientCommand::GitPush { .. }
                | ClientCommand::GitCreatePr { .. }
        )
    }

    /// Whether this command writes through the git helper and therefore
    /// additionally requires the caller to be the session creator.
    pub fn is_git_write(&self) -> bool {
        matches!(
            self,
            ClientCommand::GitCreateBranch { .. }
                | ClientCommand::GitCommit { .. }
                | ClientCommand::GitPush { .. }
                | ClientCommand::GitCreatePr { .. }
        )
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
