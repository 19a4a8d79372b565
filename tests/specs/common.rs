// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared scenario fixtures.

use harbor_core::{SessionBuilder, SessionId};
use harbor_gateway::hub::{HubRegistry, Outbound, SessionHub};
use harbor_gateway::test_support::TestWorld;
use harbor_gateway::upstream::{AgentEvent, Part, PartKind, ToolPartStatus};
use harbor_wire::ServerMessage;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Scenario {
    pub world: TestWorld,
    pub registry: Arc<HubRegistry>,
    pub session_id: SessionId,
}

impl Scenario {
    /// A fresh, never-started session.
    pub async fn new() -> Self {
        let world = TestWorld::new();
        let session_id = world
            .seed_record(SessionBuilder::new("ses-spec").created_by("user-1").build())
            .await;
        let registry = HubRegistry::new(world.deps.clone());
        Self { world, registry, session_id }
    }

    pub async fn hub(&self) -> Arc<SessionHub> {
        self.registry.get_or_create(&self.session_id).await.unwrap()
    }

    pub async fn connect_client(
        &self,
        user: &str,
    ) -> (Arc<SessionHub>, harbor_core::ConnectionId, mpsc::UnboundedReceiver<Outbound>) {
        let hub = self.hub().await;
        let (connection_id, rx) = hub.add_client(Some(user.to_string()));
        settle().await;
        (hub, connection_id, rx)
    }

}

/// Let spawned tasks (init, pump, fire-and-forget) run to quiescence.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub fn drain_frames(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<ServerMessage> {
    let mut frames = Vec::new();
    while let Ok(out) = rx.try_recv() {
        if let Outbound::Frame(text) = out {
            if let Ok(frame) = serde_json::from_str(&text) {
                frames.push(frame);
            }
        }
    }
    frames
}

pub fn frame_types(frames: &[ServerMessage]) -> Vec<String> {
    frames
        .iter()
        .map(|f| {
            serde_json::to_value(f).unwrap()["type"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect()
}

pub fn text_delta(part_id: &str, message_id: &str, delta: &str) -> AgentEvent {
    AgentEvent::MessagePartUpdated {
        part: Part {
            id: part_id.to_string(),
            message_id: message_id.to_string(),
            session_id: Some("agt-1".to_string()),
            kind: PartKind::Text { text: None, delta: Some(delta.to_string()), done: false },
        },
    }
}

pub fn text_final(part_id: &str, message_id: &str, text: &str) -> AgentEvent {
    AgentEvent::MessagePartUpdated {
        part: Part {
            id: part_id.to_string(),
            message_id: message_id.to_string(),
            session_id: Some("agt-1".to_string()),
            kind: PartKind::Text { text: Some(text.to_string()), delta: None, done: true },
        },
    }
}

pub fn tool_event(
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

pub fn idle() -> AgentEvent {
    AgentEvent::SessionIdle { session_id: Some("agt-1".to_string()) }
}
