// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::decode_command;
use yare::parameterized;

#[test]
fn ping_decodes() {
    let cmd = decode_command(r#"{"type":"ping"}"#).unwrap();
    assert_eq!(cmd, ClientCommand::Ping);
}

#[test]
fn prompt_decodes_with_optional_fields() {
    let cmd = decode_command(r#"{"type":"prompt","content":"hello"}"#).unwrap();
    assert_eq!(
        cmd,
        ClientCommand::Prompt { content: "hello".to_string(), images: None, user_id: None }
    );

    let cmd = decode_command(
        r#"{"type":"prompt","content":"hi","images":["data:image/png;base64,aGk="],"userId":"u2"}"#,
    )
    .unwrap();
    match cmd {
        ClientCommand::Prompt { images, user_id, .. } => {
            assert_eq!(images.unwrap().len(), 1);
            assert_eq!(user_id.as_deref(), Some("u2"));
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn unknown_type_is_rejected() {
    assert!(decode_command(r#"{"type":"reboot_the_world"}"#).is_err());
}

#[test]
fn missing_required_field_is_rejected() {
    assert!(decode_command(r#"{"type":"git_commit"}"#).is_err());
}

#[test]
fn git_commit_defaults() {
    let cmd = decode_command(r#"{"type":"git_commit","message":"fix"}"#).unwrap();
    assert_eq!(
        cmd,
        ClientCommand::GitCommit {
            message: "fix".to_string(),
            include_untracked: false,
            files: None,
            workspace_path: None,
        }
    );
}

#[parameterized(
    ping = { r#"{"type":"ping"}"#, false },
    get_status = { r#"{"type":"get_status"}"#, false },
    get_git_status = { r#"{"type":"get_git_status"}"#, false },
    get_messages = { r#"{"type":"get_messages"}"#, false },
    cancel = { r#"{"type":"cancel"}"#, true },
    prompt = { r#"{"type":"prompt","content":"x"}"#, true },
    save_snapshot = { r#"{"type":"save_snapshot"}"#, true },
    git_push = { r#"{"type":"git_push"}"#, true },
)]
fn mutation_classification(frame: &str, mutation: bool) {
    assert_eq!(decode_command(frame).unwrap().is_mutation(), mutation);
}

#[test]
fn git_write_classification() {
    assert!(ClientCommand::GitPush { workspace_path: None }.is_git_write());
    assert!(!ClientCommand::GetGitStatus { workspace_path: None }.is_git_write());
    assert!(!ClientCommand::Cancel.is_git_write());
}
