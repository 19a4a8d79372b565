// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent session identity.
//!
//! The transcript lives in the agent session, so its id must survive
//! reconnects and migrations. Preference order:
//! 1. the stored id, verified by a direct lookup (HTTP success is proof;
//!    a transient network error keeps the stored id; never rotate on a
//!    flaky network),
//! 2. on a definitive 404, the newest listed session by `(updated, created)`,
//! 3. only when nothing is listed, a fresh session, created with bounded
//!    exponential retry on network-class errors.

use crate::runtime::RuntimeError;
use crate::upstream::{AgentApi, AgentApiError};
use std::time::Duration;

const CREATE_BASE_DELAY: Duration = Duration::from_millis(500);
const CREATE_MAX_DELAY: Duration = Duration::from_secs(5);
const CREATE_ATTEMPTS: u32 = 3;
const CREATE_ATTEMPTS_AFTER_RESTORE: u32 = 5;

pub async fn ensure_agent_session(
    agent: &dyn AgentApi,
    tunnel_url: &str,
    stored: Option<&str>,
    restored_from_snapshot: bool,
) -> Result<String, RuntimeError> {
    if let Some(stored) = stored {
        match agent.get_session(tunnel_url, stored).await {
            Ok(_) => return Ok(stored.to_string()),
            Err(AgentApiError::NotFound) => {
                tracing::info!(agent_session_id = %stored, "stored agent session gone, adopting");
            }
            Err(e) => {
                // Keep the stored id on anything that is not a definitive
                // 404. Rotating on a flaky lookup would fork the transcript.
                tracing::warn!(agent_session_id = %stored, error = %e, "agent session lookup failed, keeping id");
                return Ok(stored.to_string());
            }
        }
    }

    // Adopt the newest existing session on this tunnel
    let mut sessions = agent.list_sessions(tunnel_url).await.map_err(RuntimeError::from)?;
    sessions.sort_by_key(|s| s.recency());
    if let Some(newest) = sessions.last() {
        return Ok(newest.id.clone());
    }

    // Nothing exists: create with bounded exponential retry
    let attempts = if restored_from_snapshot {
        CREATE_ATTEMPTS_AFTER_RESTORE
    } else {
        CREATE_ATTEMPTS
    };
    let mut delay = CREATE_BASE_DELAY;
    let mut last_err: Option<AgentApiError> = None;
    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(CREATE_MAX_DELAY);
        }
        match agent.create_session(tunnel_url).await {
            Ok(id) => return Ok(id),
            Err(e) if e.is_retryable() => {
                tracing::warn!(attempt, error = %e, "agent session create failed, retrying");
                last_err = Some(e);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(last_err.map(RuntimeError::from).unwrap_or_else(|| {
        RuntimeError::Agent("agent session create exhausted retries".to_string())
    }))
}

#[cfg(test)]
#[path = "agent_session_tests.rs"]
mod tests;
