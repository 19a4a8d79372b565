// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use harbor_adapters::FakeSandboxProvider;

#[test]
fn quote_escapes_single_quotes() {
    assert_eq!(shell_quote("plain"), "'plain'");
    assert_eq!(shell_quote("it's"), r"'it'\''s'");
    assert_eq!(shell_quote("a;rm -rf /"), "'a;rm -rf /'");
}

#[test]
fn porcelain_parsing() {
    let report = parse_porcelain("main\n", " M src/lib.rs\n?? notes.md\n");
    assert_eq!(report.branch.as_deref(), Some("main"));
    assert!(!report.clean);
    assert_eq!(report.files.len(), 2);
    assert_eq!(report.files[0].code, " M");
    assert_eq!(report.files[0].path, "src/lib.rs");
    assert_eq!(report.files[1].code, "??");
    assert_eq!(report.files[1].path, "notes.md");
}

#[test]
fn empty_porcelain_is_clean() {
    let report = parse_porcelain("feature/x\n", "");
    assert!(report.clean);
    assert!(report.files.is_empty());
    assert_eq!(report.branch.as_deref(), Some("feature/x"));
}

fn exec_commands(provider: &FakeSandboxProvider) -> Vec<String> {
    provider
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            harbor_adapters::sandbox::FakeProviderCall::Exec { command, .. } => Some(command),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn status_runs_both_commands() {
    let provider = FakeSandboxProvider::new();
    let frame = run(&provider, "sbx-1", "/workspace", GitCommand::Status { workspace_path: None })
        .await;
    assert!(matches!(frame, ServerMessage::GitStatus { .. }));
    assert_eq!(
        exec_commands(&provider),
        vec!["git rev-parse --abbrev-ref HEAD".to_string(), "git status --porcelain".to_string()]
    );
}

#[tokio::test]
async fn commit_quotes_message_and_respects_untracked() {
    let provider = FakeSandboxProvider::new();
    run(
        &provider,
        "sbx-1",
        "/workspace",
        GitCommand::Commit {
            message: "fix the 'edge' case".to_string(),
            include_untracked: true,
            files: None,
            workspace_path: None,
        },
    )
    .await;
    assert_eq!(
        exec_commands(&provider),
        vec![format!("git add -A && git commit -m {}", shell_quote("fix the 'edge' case"))]
    );
}

#[tokio::test]
async fn commit_with_explicit_files_adds_only_those() {
    let provider = FakeSandboxProvider::new();
    run(
        &provider,
        "sbx-1",
        "/workspace",
        GitCommand::Commit {
            message: "scoped".to_string(),
            include_untracked: false,
            files: Some(vec!["a.rs".to_string(), "b.rs".to_string()]),
            workspace_path: None,
        },
    )
    .await;
    assert_eq!(
        exec_commands(&provider),
        vec!["git add -- 'a.rs' 'b.rs' && git commit -m 'scoped'".to_string()]
    );
}

#[tokio::test]
async fn create_pr_builds_gh_invocation() {
    let provider = FakeSandboxProvider::new();
    run(
        &provider,
        "sbx-1",
        "/workspace",
        GitCommand::CreatePr {
            title: "Add feature".to_string(),
            body: Some("Does things".to_string()),
            base_branch: Some("main".to_string()),
            workspace_path: None,
        },
    )
    .await;
    assert_eq!(
        exec_commands(&provider),
        vec!["gh pr create --title 'Add feature' --body 'Does things' --base 'main'".to_string()]
    );
}

#[tokio::test]
async fn failed_command_reports_stderr() {
    let provider = FakeSandboxProvider::new();
    provider.set_exec_output(harbor_adapters::ExecOutput {
        exit_code: 128,
        stdout: String::new(),
        stderr: "fatal: not a git repository".to_string(),
    });
    let frame =
        run(&provider, "sbx-1", "/workspace", GitCommand::Push { workspace_path: None }).await;
    match frame {
        ServerMessage::GitResult { op, ok, error, .. } => {
            assert_eq!(op, "push");
            assert!(!ok);
            assert!(error.unwrap().contains("not a git repository"));
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn provider_without_exec_is_rejected() {
    let provider = FakeSandboxProvider::new().without_exec();
    let frame =
        run(&provider, "sbx-1", "/workspace", GitCommand::Push { workspace_path: None }).await;
    match frame {
        ServerMessage::GitResult { ok, error, .. } => {
            assert!(!ok);
            assert!(error.unwrap().contains("does not support"));
        }
        other => panic!("unexpected: {:?}", other),
    }
}
