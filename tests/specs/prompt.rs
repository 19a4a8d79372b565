// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prompt streaming scenarios.

use super::common::*;
use harbor_core::SessionStatus;
use harbor_wire::{decode_command, MessageRole, ServerMessage, ToolStatus};

#[tokio::test]
async fn happy_path_prompt() {
    let scenario = Scenario::new().await;
    let (hub, connection_id, mut rx) = scenario.connect_client("user-1").await;
    let row_before = scenario.world.session(&scenario.session_id).await;
    drain_frames(&mut rx);

    hub.handle_client_message(
        &connection_id,
        decode_command(r#"{"type":"prompt","content":"hello"}"#).unwrap(),
    )
    .await;

    // User echo suppressed, assistant streamed, strict in-message order
    scenario.world.streams.emit(text_delta("prt-u", "msg-user", "hello")).await;
    scenario.world.streams.emit(text_delta("prt-a", "msg-asst", "hi ")).await;
    scenario.world.streams.emit(text_delta("prt-a", "msg-asst", "there")).await;
    scenario.world.streams.emit(text_final("prt-a", "msg-asst", "hi there")).await;
    scenario.world.streams.emit(idle()).await;
    settle().await;

    let frames = drain_frames(&mut rx);
    assert_eq!(
        frame_types(&frames),
        vec![
            "message",
            "message",
            "token",
            "token",
            "text_part_complete",
            "message_complete"
        ]
    );
    match &frames[0] {
        ServerMessage::Message { message } => assert_eq!(message.role, MessageRole::User),
        other => panic!("unexpected: {:?}", other),
    }
    match &frames[1] {
        ServerMessage::Message { message } => {
            assert_eq!(message.role, MessageRole::Assistant);
            assert_eq!(message.content, "");
        }
        other => panic!("unexpected: {:?}", other),
    }

    // The session row is untouched by the prompt flow
    let row_after = scenario.world.session(&scenario.session_id).await;
    assert_eq!(row_after.status, SessionStatus::Running);
    assert_eq!(row_after.sandbox_id, row_before.sandbox_id);
    assert_eq!(row_after.snapshot_id, row_before.snapshot_id);
}

#[tokio::test]
async fn interleaved_tool_call() {
    let scenario = Scenario::new().await;
    let (hub, connection_id, mut rx) = scenario.connect_client("user-1").await;
    drain_frames(&mut rx);

    hub.handle_client_message(
        &connection_id,
        decode_command(r#"{"type":"prompt","content":"run the tests"}"#).unwrap(),
    )
    .await;
    scenario.world.streams.emit(text_delta("prt-u", "msg-user", "run the tests")).await;

    use harbor_gateway::upstream::ToolPartStatus;
    scenario
        .world
        .streams
        .emit(tool_event("prt-t", "msg-a", "call-1", ToolPartStatus::Running, None))
        .await;
    let args = serde_json::json!({"command": "cargo test"});
    scenario
        .world
        .streams
        .emit(tool_event("prt-t", "msg-a", "call-1", ToolPartStatus::Running, Some(args.clone())))
        .await;
    scenario
        .world
        .streams
        .emit(tool_event("prt-t", "msg-a", "call-1", ToolPartStatus::Completed, None))
        .await;
    // Duplicate completion: no extra tool_end
    scenario
        .world
        .streams
        .emit(tool_event("prt-t", "msg-a", "call-1", ToolPartStatus::Completed, None))
        .await;
    scenario.world.streams.emit(idle()).await;
    settle().await;

    let frames = drain_frames(&mut rx);
    let types = frame_types(&frames);
    assert_eq!(
        types,
        vec![
            "message",      // user prompt broadcast
            "message",      // assistant shell
            "tool_start",   // without args
            "tool_start",   // args arrived late
            "tool_end",
            "message_complete"
        ]
    );
    let ends: Vec<_> = frames
        .iter()
        .filter_map(|f| match f {
            ServerMessage::ToolEnd { status, .. } => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(ends, vec![ToolStatus::Completed]);
}

#[tokio::test]
async fn cancel_mid_message() {
    let scenario = Scenario::new().await;
    let (hub, connection_id, mut rx) = scenario.connect_client("user-1").await;
    drain_frames(&mut rx);

    hub.handle_client_message(
        &connection_id,
        decode_command(r#"{"type":"prompt","content":"slow task"}"#).unwrap(),
    )
    .await;
    scenario.world.streams.emit(text_delta("prt-u", "msg-user", "slow task")).await;
    scenario.world.streams.emit(text_delta("prt-a", "msg-asst", "working")).await;
    settle().await;
    drain_frames(&mut rx);

    hub.handle_client_message(&connection_id, decode_command(r#"{"type":"cancel"}"#).unwrap())
        .await;

    assert_eq!(scenario.world.agent.aborts(), 1);
    let frames = drain_frames(&mut rx);
    assert_eq!(
        frames,
        vec![ServerMessage::MessageCancelled { message_id: Some("msg-asst".to_string()) }]
    );
    // Agent session identity preserved across the cancel
    let row = scenario.world.session(&scenario.session_id).await;
    assert_eq!(row.agent_session_id.as_deref(), Some("agt-1"));
}
