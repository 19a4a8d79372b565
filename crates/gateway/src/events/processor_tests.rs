// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::upstream::{AgentEvent, Part, PartKind, ToolPartStatus, UpstreamError};
use harbor_wire::{MessageRole, ServerMessage, ToolStatus};

fn text_part(part_id: &str, message_id: &str, delta: Option<&str>, text: Option<&str>, done: bool) -> AgentEvent {
    AgentEvent::MessagePartUpdated {
        part: Part {
            id: part_id.to_string(),
            message_id: message_id.to_string(),
            session_id: Some("agt-1".to_string()),
            kind: PartKind::Text {
                text: text.map(str::to_string),
                delta: delta.map(str::to_string),
                done,
            },
        },
    }
}

fn tool_part(
    part_id: &str,
    message_id: &str,
    call_id: &str,
    status: ToolPartStatus,
    args: Option<serde_json::Value>,
) -> AgentEvent {
    AgentEvent::MessagePartUpdated {
        part: Part {
            id: part_id.to_string(),
            message_id: message_id.to_string(),
            session_id: Some("agt-1".to_string()),
            kind: PartKind::Tool {
                call_id: call_id.to_string(),
                name: Some("bash".to_string()),
                status: Some(status),
                args,
                summary: None,
                result: None,
            },
        },
    }
}

fn idle() -> AgentEvent {
    AgentEvent::SessionIdle { session_id: Some("agt-1".to_string()) }
}

fn processor() -> EventProcessor {
    let mut p = EventProcessor::new();
    p.bind_agent_session("agt-1");
    p
}

fn frame_types(frames: &[ServerMessage]) -> Vec<&'static str> {
    frames
        .iter()
        .map(|f| match f {
            ServerMessage::Message { .. } => "message",
            ServerMessage::Token { .. } => "token",
            ServerMessage::TextPartComplete { .. } => "text_part_complete",
            ServerMessage::ToolStart { .. } => "tool_start",
            ServerMessage::ToolMetadata { .. } => "tool_metadata",
            ServerMessage::ToolEnd { .. } => "tool_end",
            ServerMessage::MessageComplete { .. } => "message_complete",
            ServerMessage::Error { .. } => "error",
            _ => "other",
        })
        .collect()
}

#[test]
fn happy_path_prompt_sequence() {
    let mut p = processor();
    let mut all = Vec::new();

    // Echoed user message: suppressed
    assert!(p.handle(text_part("prt-u", "msg-user", Some("hello"), None, false)).is_empty());
    assert!(p.handle(text_part("prt-u", "msg-user", None, Some("hello"), true)).is_empty());

    // Assistant streams
    all.extend(p.handle(text_part("prt-a", "msg-asst", Some("he"), None, false)));
    all.extend(p.handle(text_part("prt-a", "msg-asst", Some("llo"), None, false)));
    all.extend(p.handle(text_part("prt-a", "msg-asst", None, Some("hello"), true)));
    all.extend(p.handle(idle()));

    assert_eq!(
        frame_types(&all),
        vec!["message", "token", "token", "text_part_complete", "message_complete"]
    );
    match &all[0] {
        ServerMessage::Message { message } => {
            assert_eq!(message.id, "msg-asst");
            assert_eq!(message.role, MessageRole::Assistant);
            assert_eq!(message.content, "");
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn text_only_completion_keeps_assistant_id() {
    let mut p = processor();
    p.handle(text_part("prt-u", "msg-user", Some("q"), None, false));
    p.handle(text_part("prt-a", "msg-asst", Some("a"), None, false));
    let frames = p.handle(idle());
    assert_eq!(frame_types(&frames), vec!["message_complete"]);

    // Duplicate upstream message: no second shell, no second complete
    let frames = p.handle(text_part("prt-a2", "msg-asst", Some("a"), None, false));
    assert_eq!(frame_types(&frames), vec!["token"]);
    assert!(p.handle(idle()).is_empty());
}

#[test]
fn tool_lifecycle_emits_each_frame_once() {
    let mut p = processor();
    p.handle(text_part("prt-u", "msg-user", Some("run"), None, false));

    let frames =
        p.handle(tool_part("prt-t", "msg-asst", "call-1", ToolPartStatus::Running, None));
    assert_eq!(frame_types(&frames), vec!["message", "tool_start"]);

    // Same running status again: nothing new
    let frames =
        p.handle(tool_part("prt-t", "msg-asst", "call-1", ToolPartStatus::Running, None));
    assert!(frames.is_empty());

    // Late args: a second tool_start carrying them
    let args = serde_json::json!({"command": "ls"});
    let frames = p.handle(tool_part(
        "prt-t",
        "msg-asst",
        "call-1",
        ToolPartStatus::Running,
        Some(args.clone()),
    ));
    assert_eq!(frame_types(&frames), vec!["tool_start"]);
    match &frames[0] {
        ServerMessage::ToolStart { args: sent, .. } => assert_eq!(sent.as_ref(), Some(&args)),
        other => panic!("unexpected: {:?}", other),
    }

    // Args again: suppressed
    let frames =
        p.handle(tool_part("prt-t", "msg-asst", "call-1", ToolPartStatus::Running, Some(args)));
    assert!(frames.is_empty());

    // Completion
    let frames =
        p.handle(tool_part("prt-t", "msg-asst", "call-1", ToolPartStatus::Completed, None));
    assert_eq!(frame_types(&frames), vec!["tool_end"]);
    match &frames[0] {
        ServerMessage::ToolEnd { status, .. } => assert_eq!(*status, ToolStatus::Completed),
        other => panic!("unexpected: {:?}", other),
    }

    // Re-posting the completed event produces no additional tool_end
    let frames =
        p.handle(tool_part("prt-t", "msg-asst", "call-1", ToolPartStatus::Completed, None));
    assert!(frames.is_empty());
}

#[test]
fn args_present_at_start_block_late_args_duplicate() {
    let mut p = processor();
    p.handle(text_part("prt-u", "msg-user", Some("run"), None, false));

    let args = serde_json::json!({"path": "/tmp"});
    let frames = p.handle(tool_part(
        "prt-t",
        "msg-asst",
        "call-1",
        ToolPartStatus::Running,
        Some(args.clone()),
    ));
    assert_eq!(frame_types(&frames), vec!["message", "tool_start"]);

    let frames =
        p.handle(tool_part("prt-t", "msg-asst", "call-1", ToolPartStatus::Running, Some(args)));
    assert!(frames.is_empty());
}

#[test]
fn no_message_complete_while_tool_running() {
    let mut p = processor();
    p.handle(text_part("prt-u", "msg-user", Some("run"), None, false));
    p.handle(tool_part("prt-t", "msg-asst", "call-1", ToolPartStatus::Running, None));

    assert!(p.handle(idle()).is_empty());

    p.handle(tool_part("prt-t", "msg-asst", "call-1", ToolPartStatus::Completed, None));
    let frames = p.handle(idle());
    assert_eq!(frame_types(&frames), vec!["message_complete"]);
}

#[test]
fn tool_completion_clears_assistant_id_for_next_message() {
    let mut p = processor();
    p.handle(text_part("prt-u", "msg-user", Some("run"), None, false));
    p.handle(tool_part("prt-t", "msg-1", "call-1", ToolPartStatus::Completed, None));
    p.handle(idle());
    assert_eq!(p.current_assistant_message_id(), None);

    // Next assistant message gets a fresh shell
    let frames = p.handle(text_part("prt-a", "msg-2", Some("done"), None, false));
    assert_eq!(frame_types(&frames), vec!["message", "token"]);
}

#[test]
fn tool_metadata_keyed_by_summary_length() {
    let mut p = processor();
    p.handle(text_part("prt-u", "msg-user", Some("run"), None, false));
    p.handle(tool_part("prt-t", "msg-asst", "call-1", ToolPartStatus::Running, None));

    let summary_event = |summary: &str| AgentEvent::MessagePartUpdated {
        part: Part {
            id: "prt-t".to_string(),
            message_id: "msg-asst".to_string(),
            session_id: Some("agt-1".to_string()),
            kind: PartKind::Tool {
                call_id: "call-1".to_string(),
                name: Some("bash".to_string()),
                status: Some(ToolPartStatus::Running),
                args: None,
                summary: Some(summary.to_string()),
                result: None,
            },
        },
    };

    let frames = p.handle(summary_event("read 3 files"));
    assert_eq!(frame_types(&frames), vec!["tool_metadata"]);

    // Same length: suppressed. Longer summary: emitted.
    assert!(p.handle(summary_event("read 3 files")).is_empty());
    let frames = p.handle(summary_event("read 30 files, wrote 2"));
    assert_eq!(frame_types(&frames), vec!["tool_metadata"]);
}

#[test]
fn events_for_other_agent_sessions_are_dropped() {
    let mut p = processor();
    let foreign = AgentEvent::MessagePartUpdated {
        part: Part {
            id: "prt-x".to_string(),
            message_id: "msg-x".to_string(),
            session_id: Some("agt-other".to_string()),
            kind: PartKind::Text { text: None, delta: Some("x".to_string()), done: false },
        },
    };
    assert!(p.handle(foreign).is_empty());
    assert!(p
        .handle(AgentEvent::SessionIdle { session_id: Some("agt-other".to_string()) })
        .is_empty());
}

#[test]
fn session_status_idle_completes_like_session_idle() {
    let mut p = processor();
    p.handle(text_part("prt-u", "msg-user", Some("q"), None, false));
    p.handle(text_part("prt-a", "msg-asst", Some("a"), None, false));

    let frames = p.handle(AgentEvent::SessionStatus {
        session_id: Some("agt-1".to_string()),
        status_type: Some("idle".to_string()),
    });
    assert_eq!(frame_types(&frames), vec!["message_complete"]);

    // Unknown status values are ignored
    let mut p = processor();
    assert!(p
        .handle(AgentEvent::SessionStatus {
            session_id: Some("agt-1".to_string()),
            status_type: Some("busy".to_string()),
        })
        .is_empty());
}

#[test]
fn aborted_error_is_silent_others_surface() {
    let mut p = processor();
    let aborted = AgentEvent::SessionError {
        session_id: Some("agt-1".to_string()),
        error: UpstreamError {
            name: Some("MessageAbortedError".to_string()),
            ..UpstreamError::default()
        },
    };
    assert!(p.handle(aborted).is_empty());

    let real = AgentEvent::SessionError {
        session_id: Some("agt-1".to_string()),
        error: UpstreamError {
            name: Some("ProviderError".to_string()),
            message: Some("rate limited".to_string()),
            data_message: None,
        },
    };
    let frames = p.handle(real);
    assert_eq!(
        frames,
        vec![ServerMessage::Error { message: "rate limited".to_string() }]
    );
}

#[test]
fn clear_current_assistant_message_supports_cancel() {
    let mut p = processor();
    p.handle(text_part("prt-u", "msg-user", Some("q"), None, false));
    p.handle(text_part("prt-a", "msg-asst", Some("a"), None, false));
    assert!(p.assistant_in_flight());

    assert_eq!(p.clear_current_assistant_message(), Some("msg-asst".to_string()));
    assert!(!p.assistant_in_flight());
    assert_eq!(p.clear_current_assistant_message(), None);
}

#[test]
fn reset_for_new_prompt_clears_dedup_keys() {
    let mut p = processor();
    p.handle(text_part("prt-u", "msg-user", Some("q"), None, false));
    p.handle(tool_part("prt-t", "msg-asst", "call-1", ToolPartStatus::Completed, None));
    p.handle(idle());

    p.reset_for_new_prompt();

    // Same part ids are fresh again after the reset
    p.handle(text_part("prt-u", "msg-user2", Some("q2"), None, false));
    let frames =
        p.handle(tool_part("prt-t", "msg-asst2", "call-1", ToolPartStatus::Running, None));
    assert_eq!(frame_types(&frames), vec!["message", "tool_start"]);
}

#[test]
fn message_updated_user_role_primes_echo_suppression() {
    let mut p = processor();
    p.handle(AgentEvent::MessageUpdated {
        info: crate::upstream::types::MessageInfo {
            id: "msg-user".to_string(),
            session_id: Some("agt-1".to_string()),
            role: Some("user".to_string()),
        },
    });
    // The echoed user part is suppressed even though a text part never
    // preceded it
    assert!(p.handle(text_part("prt-u", "msg-user", Some("hi"), None, false)).is_empty());
    // And an assistant part still creates the shell
    let frames = p.handle(text_part("prt-a", "msg-asst", Some("a"), None, false));
    assert_eq!(frame_types(&frames), vec!["message", "token"]);
}

#[test]
fn heartbeat_and_connected_are_silent() {
    let mut p = processor();
    assert!(p.handle(AgentEvent::ServerConnected).is_empty());
    assert!(p.handle(AgentEvent::ServerHeartbeat).is_empty());
}

#[test]
fn per_part_frames_at_most_once_over_message_lifetime() {
    let mut p = processor();
    p.handle(text_part("prt-u", "msg-user", Some("q"), None, false));

    let args = serde_json::json!({"f": 1});
    let mut all = Vec::new();
    // Hammer the same part with every combination twice
    for _ in 0..2 {
        all.extend(p.handle(tool_part("prt-t", "msg-asst", "c1", ToolPartStatus::Running, None)));
        all.extend(p.handle(tool_part(
            "prt-t",
            "msg-asst",
            "c1",
            ToolPartStatus::Running,
            Some(args.clone()),
        )));
        all.extend(p.handle(tool_part(
            "prt-t",
            "msg-asst",
            "c1",
            ToolPartStatus::Completed,
            Some(args.clone()),
        )));
    }

    let starts = all
        .iter()
        .filter(|f| matches!(f, ServerMessage::ToolStart { .. }))
        .count();
    let ends = all.iter().filter(|f| matches!(f, ServerMessage::ToolEnd { .. })).count();
    // start once, args once (second tool_start), end once
    assert_eq!(starts, 2);
    assert_eq!(ends, 1);
}
