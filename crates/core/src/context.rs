// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The resolved session context.
//!
//! Everything the runtime needs to boot a sandbox, rebuilt from persistence
//! on every `ensure_runtime_ready`: repo specs with per-repo tokens, env
//! vars, system prompt, agent config, and service commands. Never cached
//! across runtime attempts because the tokens inside it expire.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One repository to materialize inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSpec {
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
    /// Access token scoped to this repo. Injected into the clone URL,
    /// never logged.
    #[serde(default)]
    pub token: Option<String>,
    /// Checkout path relative to the workspace root.
    #[serde(default)]
    pub path: Option<String>,
}

/// A long-running service command started inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCommand {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub cwd: Option<String>,
}

/// Fully resolved view the runtime needs to boot a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default)]
    pub repos: Vec<RepoSpec>,
    /// Env vars for the sandbox, auth tokens already injected.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub agent_config: serde_json::Value,
    #[serde(default)]
    pub service_commands: Vec<ServiceCommand>,
    /// Whether the active snapshot already contains installed dependencies.
    #[serde(default)]
    pub snapshot_has_deps: bool,
    /// Workspace directory inside the sandbox.
    #[serde(default)]
    pub workspace_path: Option<String>,
}

impl SessionContext {
    /// Merge extra env vars, later entries winning.
    pub fn with_env(mut self, extra: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(extra);
        self
    }
}
