// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session context resolution.
//!
//! The resolved context (repos, tokens, env, prompts) is rebuilt from
//! persistence on every runtime attempt; it is never cached because the
//! tokens inside it expire.

use async_trait::async_trait;
use harbor_core::{SessionContext, SessionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("session has no resolvable context: {0}")]
    NotFound(String),
    #[error("context backend unavailable: {0}")]
    Unavailable(String),
}

/// Adapter resolving the full boot view for a session.
#[async_trait]
pub trait ContextLoader: Send + Sync + 'static {
    async fn load(&self, session_id: &SessionId) -> Result<SessionContext, ContextError>;
}

/// Context loader backed by an in-memory table.
///
/// Serves single-node deployments and tests; sessions without an entry get
/// an empty context.
#[derive(Clone, Default)]
pub struct StaticContextLoader {
    contexts: Arc<Mutex<HashMap<SessionId, SessionContext>>>,
}

impl StaticContextLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_id: SessionId, context: SessionContext) {
        self.contexts.lock().insert(session_id, context);
    }
}

#[async_trait]
impl ContextLoader for StaticContextLoader {
    async fn load(&self, session_id: &SessionId) -> Result<SessionContext, ContextError> {
        Ok(self.contexts.lock().get(session_id).cloned().unwrap_or_default())
    }
}
