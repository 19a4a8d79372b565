// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent API surface consumed by the runtime and hub.
//!
//! One conversation identity ("agent session") lives inside each sandbox,
//! independent of the gateway session id. All calls are addressed by tunnel
//! URL because the sandbox (and with it the base address) changes across
//! migrations.

use async_trait::async_trait;
use harbor_wire::Message;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AgentApiError {
    /// Definitive 404 from the agent: the resource does not exist.
    #[error("not found")]
    NotFound,

    /// Non-2xx response other than 404.
    #[error("agent HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Transport-level failure; possibly transient.
    #[error("agent network error: {0}")]
    Network(String),

    #[error("agent bad response: {0}")]
    BadResponse(String),
}

impl AgentApiError {
    /// Only network-class errors are retryable; a 404 or a 500 is definitive.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentApiError::Network(msg) => super::is_network_error(msg) || msg.contains("timed out"),
            _ => false,
        }
    }
}

/// Identity of an agent session as listed on the tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSessionInfo {
    pub id: String,
    pub created_ms: Option<u64>,
    pub updated_ms: Option<u64>,
}

impl AgentSessionInfo {
    /// Recency key: newest by `(updated, created)`.
    pub fn recency(&self) -> (u64, u64) {
        (self.updated_ms.unwrap_or(0), self.created_ms.unwrap_or(0))
    }
}

/// One inline image forwarded upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptImage {
    pub mime: String,
    /// The original `data:` URI, passed through verbatim.
    pub data_uri: String,
}

/// A prompt to hand to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPayload {
    pub text: String,
    pub images: Vec<PromptImage>,
}

impl PromptPayload {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self { text: text.into(), images: Vec::new() }
    }
}

/// The upstream agent HTTP API.
#[async_trait]
pub trait AgentApi: Send + Sync + 'static {
    /// `POST /session` — create a fresh agent session.
    async fn create_session(&self, tunnel_url: &str) -> Result<String, AgentApiError>;

    /// `GET /session/{id}` — HTTP success is proof of existence.
    async fn get_session(
        &self,
        tunnel_url: &str,
        agent_session_id: &str,
    ) -> Result<AgentSessionInfo, AgentApiError>;

    /// `GET /session` — list sessions on this tunnel.
    async fn list_sessions(&self, tunnel_url: &str)
        -> Result<Vec<AgentSessionInfo>, AgentApiError>;

    /// `GET /session/{id}/message` — replayable history.
    async fn list_messages(
        &self,
        tunnel_url: &str,
        agent_session_id: &str,
    ) -> Result<Vec<Message>, AgentApiError>;

    /// `POST /session/{id}/prompt_async`
    async fn prompt_async(
        &self,
        tunnel_url: &str,
        agent_session_id: &str,
        payload: PromptPayload,
    ) -> Result<(), AgentApiError>;

    /// `POST /session/{id}/abort`
    async fn abort(&self, tunnel_url: &str, agent_session_id: &str) -> Result<(), AgentApiError>;
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use harbor_wire::Message;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Recorded API call.
    #[derive(Debug, Clone, PartialEq)]
    pub enum AgentCall {
        CreateSession,
        GetSession { id: String },
        ListSessions,
        ListMessages { id: String },
        Prompt { id: String, text: String },
        Abort { id: String },
    }

    struct FakeAgentState {
        calls: Vec<AgentCall>,
        sessions: Vec<AgentSessionInfo>,
        messages: Vec<Message>,
        next_session: u32,
        create_failures: VecDeque<AgentApiError>,
        get_failures: VecDeque<AgentApiError>,
    }

    /// Fake agent API: serves sessions from an in-memory list and records
    /// every call. Failure queues let tests inject transient errors.
    #[derive(Clone)]
    pub struct FakeAgentApi {
        state: Arc<Mutex<FakeAgentState>>,
    }

    impl Default for FakeAgentApi {
        fn default() -> Self {
            Self::new()
        }
    }

    impl FakeAgentApi {
        pub fn new() -> Self {
            Self {
                state: Arc::new(Mutex::new(FakeAgentState {
                    calls: Vec::new(),
                    sessions: Vec::new(),
                    messages: Vec::new(),
                    next_session: 1,
                    create_failures: VecDeque::new(),
                    get_failures: VecDeque::new(),
                })),
            }
        }

        pub fn calls(&self) -> Vec<AgentCall> {
            self.state.lock().calls.clone()
        }

        pub fn add_session(&self, info: AgentSessionInfo) {
            self.state.lock().sessions.push(info);
        }

        pub fn set_messages(&self, messages: Vec<Message>) {
            self.state.lock().messages = messages;
        }

        pub fn push_create_failure(&self, err: AgentApiError) {
            self.state.lock().create_failures.push_back(err);
        }

        pub fn push_get_failure(&self, err: AgentApiError) {
            self.state.lock().get_failures.push_back(err);
        }

        pub fn prompts(&self) -> Vec<String> {
            self.state
                .lock()
                .calls
                .iter()
                .filter_map(|c| match c {
                    AgentCall::Prompt { text, .. } => Some(text.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn aborts(&self) -> usize {
            self.state
                .lock()
                .calls
                .iter()
                .filter(|c| matches!(c, AgentCall::Abort { .. }))
                .count()
        }
    }

    #[async_trait]
    impl AgentApi for FakeAgentApi {
        async fn create_session(&self, _tunnel_url: &str) -> Result<String, AgentApiError> {
            let mut state = self.state.lock();
            state.calls.push(AgentCall::CreateSession);
            if let Some(err) = state.create_failures.pop_front() {
                return Err(err);
            }
            let id = format!("agt-{}", state.next_session);
            state.next_session += 1;
            let ts = state.next_session as u64;
            state.sessions.push(AgentSessionInfo {
                id: id.clone(),
                created_ms: Some(ts),
                updated_ms: Some(ts),
            });
            Ok(id)
        }

        async fn get_session(
            &self,
            _tunnel_url: &str,
            agent_session_id: &str,
        ) -> Result<AgentSessionInfo, AgentApiError> {
            let mut state = self.state.lock();
            state.calls.push(AgentCall::GetSession { id: agent_session_id.to_string() });
            if let Some(err) = state.get_failures.pop_front() {
                return Err(err);
            }
            state
                .sessions
                .iter()
                .find(|s| s.id == agent_session_id)
                .cloned()
                .ok_or(AgentApiError::NotFound)
        }

        async fn list_sessions(
            &self,
            _tunnel_url: &str,
        ) -> Result<Vec<AgentSessionInfo>, AgentApiError> {
            let mut state = self.state.lock();
            state.calls.push(AgentCall::ListSessions);
            Ok(state.sessions.clone())
        }

        async fn list_messages(
            &self,
            _tunnel_url: &str,
            agent_session_id: &str,
        ) -> Result<Vec<Message>, AgentApiError> {
            let mut state = self.state.lock();
            state.calls.push(AgentCall::ListMessages { id: agent_session_id.to_string() });
            Ok(state.messages.clone())
        }

        async fn prompt_async(
            &self,
            _tunnel_url: &str,
            agent_session_id: &str,
            payload: PromptPayload,
        ) -> Result<(), AgentApiError> {
            self.state.lock().calls.push(AgentCall::Prompt {
                id: agent_session_id.to_string(),
                text: payload.text,
            });
            Ok(())
        }

        async fn abort(
            &self,
            _tunnel_url: &str,
            agent_session_id: &str,
        ) -> Result<(), AgentApiError> {
            self.state
                .lock()
                .calls
                .push(AgentCall::Abort { id: agent_session_id.to_string() });
            Ok(())
        }
    }

    pub use AgentCall as FakeAgentCall;
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeAgentApi, FakeAgentCall};
