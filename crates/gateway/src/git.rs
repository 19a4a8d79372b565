// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Git operations inside the sandbox.
//!
//! Everything runs through the provider's `exec_command`; the gateway never
//! touches a working tree itself. PRs go through the `gh` CLI preinstalled
//! in sandbox images.

use harbor_adapters::{ExecOutput, ProviderError, SandboxProvider};
use harbor_wire::{GitFileStatus, GitStatusReport, ServerMessage};

/// One git request from a client, workspace resolved by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitCommand {
    Status {
        workspace_path: Option<String>,
    },
    CreateBranch {
        branch_name: String,
        workspace_path: Option<String>,
    },
    Commit {
        message: String,
        include_untracked: bool,
        files: Option<Vec<String>>,
        workspace_path: Option<String>,
    },
    Push {
        workspace_path: Option<String>,
    },
    CreatePr {
        title: String,
        body: Option<String>,
        base_branch: Option<String>,
        workspace_path: Option<String>,
    },
}

impl GitCommand {
    fn workspace<'a>(&'a self, default: &'a str) -> &'a str {
        let explicit = match self {
            GitCommand::Status { workspace_path }
            | GitCommand::CreateBranch { workspace_path, .. }
            | GitCommand::Commit { workspace_path, .. }
            | GitCommand::Push { workspace_path }
            | GitCommand::CreatePr { workspace_path, .. } => workspace_path.as_deref(),
        };
        explicit.unwrap_or(default)
    }

    fn op(&self) -> &'static str {
        match self {
            GitCommand::Status { .. } => "status",
            GitCommand::CreateBranch { .. } => "create_branch",
            GitCommand::Commit { .. } => "commit",
            GitCommand::Push { .. } => "push",
            GitCommand::CreatePr { .. } => "create_pr",
        }
    }
}

/// Single-quote a string for POSIX shells.
pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Parse `git status --porcelain` output.
pub(crate) fn parse_porcelain(branch: &str, porcelain: &str) -> GitStatusReport {
    let files: Vec<GitFileStatus> = porcelain
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| GitFileStatus {
            code: line[..2].to_string(),
            path: line[3..].to_string(),
        })
        .collect();
    GitStatusReport {
        branch: {
            let branch = branch.trim();
            (!branch.is_empty()).then(|| branch.to_string())
        },
        clean: files.is_empty(),
        files,
    }
}

async fn exec(
    provider: &dyn SandboxProvider,
    sandbox_id: &str,
    workspace: &str,
    command: &str,
) -> Result<ExecOutput, ProviderError> {
    provider.exec_command(sandbox_id, command, Some(workspace)).await
}

fn result_frame(op: &str, output: Result<ExecOutput, ProviderError>) -> ServerMessage {
    match output {
        Ok(out) if out.success() => ServerMessage::GitResult {
            op: op.to_string(),
            ok: true,
            output: Some(format!("{}{}", out.stdout, out.stderr)),
            error: None,
        },
        Ok(out) => ServerMessage::GitResult {
            op: op.to_string(),
            ok: false,
            output: Some(out.stdout),
            error: Some(out.stderr),
        },
        Err(e) => ServerMessage::GitResult {
            op: op.to_string(),
            ok: false,
            output: None,
            error: Some(e.to_string()),
        },
    }
}

/// Execute one git command and produce the reply frame.
pub async fn run(
    provider: &dyn SandboxProvider,
    sandbox_id: &str,
    default_workspace: &str,
    command: GitCommand,
) -> ServerMessage {
    if !provider.supports_exec() {
        return ServerMessage::GitResult {
            op: command.op().to_string(),
            ok: false,
            output: None,
            error: Some("provider does not support command execution".to_string()),
        };
    }
    let workspace = command.workspace(default_workspace).to_string();
    let op = command.op();

    match command {
        GitCommand::Status { .. } => {
            let branch = exec(provider, sandbox_id, &workspace, "git rev-parse --abbrev-ref HEAD")
                .await;
            let porcelain =
                exec(provider, sandbox_id, &workspace, "git status --porcelain").await;
            match (branch, porcelain) {
                (Ok(branch), Ok(porcelain)) if porcelain.success() => {
                    ServerMessage::GitStatus {
                        report: parse_porcelain(&branch.stdout, &porcelain.stdout),
                    }
                }
                (_, Ok(porcelain)) => ServerMessage::GitResult {
                    op: op.to_string(),
                    ok: false,
                    output: Some(porcelain.stdout),
                    error: Some(porcelain.stderr),
                },
                (Err(e), _) | (_, Err(e)) => ServerMessage::GitResult {
                    op: op.to_string(),
                    ok: false,
                    output: None,
                    error: Some(e.to_string()),
                },
            }
        }
        GitCommand::CreateBranch { branch_name, .. } => {
            let cmd = format!("git checkout -b {}", shell_quote(&branch_name));
            result_frame(op, exec(provider, sandbox_id, &workspace, &cmd).await)
        }
        GitCommand::Commit { message, include_untracked, files, .. } => {
            let add = match (&files, include_untracked) {
                (Some(files), _) if !files.is_empty() => {
                    let quoted: Vec<String> = files.iter().map(|f| shell_quote(f)).collect();
                    format!("git add -- {}", quoted.join(" "))
                }
                (_, true) => "git add -A".to_string(),
                (_, false) => "git add -u".to_string(),
            };
            let cmd = format!("{} && git commit -m {}", add, shell_quote(&message));
            result_frame(op, exec(provider, sandbox_id, &workspace, &cmd).await)
        }
        GitCommand::Push { .. } => {
            result_frame(
                op,
                exec(provider, sandbox_id, &workspace, "git push -u origin HEAD").await,
            )
        }
        GitCommand::CreatePr { title, body, base_branch, .. } => {
            let mut cmd = format!("gh pr create --title {}", shell_quote(&title));
            cmd.push_str(&format!(" --body {}", shell_quote(body.as_deref().unwrap_or(""))));
            if let Some(base) = base_branch {
                cmd.push_str(&format!(" --base {}", shell_quote(&base)));
            }
            result_frame(op, exec(provider, sandbox_id, &workspace, &cmd).await)
        }
    }
}

#[cfg(test)]
#[path = "git_tests.rs"]
mod tests;
