// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the gateway.

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::LifecycleError;

/// Protocol/build version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

fn duration_var(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Resolve state directory: HARBOR_STATE_DIR > XDG_STATE_HOME/harbor > ~/.local/state/harbor
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("HARBOR_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("harbor"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/harbor"))
}

/// TCP port for client WebSocket connections.
pub fn tcp_port() -> u16 {
    std::env::var("HARBOR_TCP_PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(8787)
}

/// Shared auth token clients must present in the connect handshake.
/// Unset means the handshake is unauthenticated (dev mode).
pub fn auth_token() -> Option<String> {
    std::env::var("HARBOR_AUTH_TOKEN").ok().filter(|s| !s.is_empty())
}

/// Service token from which per-session sandbox tokens are derived.
pub fn service_token() -> String {
    std::env::var("HARBOR_SERVICE_TOKEN").unwrap_or_default()
}

/// Gateway URL injected into every sandbox.
pub fn gateway_url() -> String {
    std::env::var("HARBOR_GATEWAY_URL").unwrap_or_else(|_| "http://localhost:8787".to_string())
}

/// Version key selecting the base snapshot generation.
pub fn version_key() -> String {
    std::env::var("HARBOR_VERSION_KEY").unwrap_or_else(|_| "default".to_string())
}

/// Application name in the base snapshot table.
pub fn app_name() -> String {
    std::env::var("HARBOR_APP_NAME").unwrap_or_else(|_| "harbor".to_string())
}

/// Owner lease TTL
pub fn owner_lease_ttl() -> Duration {
    duration_var("HARBOR_OWNER_LEASE_TTL_MS", Duration::from_secs(30))
}

/// Runtime lease TTL
pub fn runtime_lease_ttl() -> Duration {
    duration_var("HARBOR_RUNTIME_LEASE_TTL_MS", Duration::from_secs(45))
}

/// Time with no upstream event before the stream is declared dead.
pub fn heartbeat_timeout() -> Duration {
    duration_var("HARBOR_HEARTBEAT_TIMEOUT_MS", Duration::from_secs(90))
}

/// Per-chunk read timeout on the upstream event stream.
pub fn read_timeout() -> Duration {
    duration_var("HARBOR_READ_TIMEOUT_MS", Duration::from_secs(60))
}

/// Delay after the last client leaves before the idle snapshot fires.
pub fn idle_delay() -> Duration {
    duration_var("HARBOR_IDLE_DELAY_MS", Duration::from_secs(300))
}

/// Head start before sandbox expiry at which the expiry job fires.
pub fn expiry_grace() -> Duration {
    duration_var("HARBOR_EXPIRY_GRACE_MS", Duration::from_secs(300))
}

/// Deadline for draining an in-flight assistant message before migration.
pub fn msg_complete_timeout() -> Duration {
    duration_var("HARBOR_MSG_COMPLETE_TIMEOUT_MS", Duration::from_secs(30))
}

/// Orphan sweep interval.
pub fn sweep_interval() -> Duration {
    duration_var("HARBOR_SWEEP_INTERVAL_MS", Duration::from_secs(900))
}

/// Expiry queue poll interval.
pub fn expiry_poll_interval() -> Duration {
    duration_var("HARBOR_EXPIRY_POLL_MS", Duration::from_secs(1))
}

/// Upper bound on waiting for a migration lock to clear.
pub fn migration_lock_wait() -> Duration {
    duration_var("HARBOR_MIGRATION_LOCK_WAIT_MS", Duration::from_secs(120))
}

/// Reconnect backoff schedule, comma-separated milliseconds.
pub fn reconnect_delays() -> Vec<Duration> {
    let raw = std::env::var("HARBOR_RECONNECT_DELAYS_MS")
        .unwrap_or_else(|_| "1000,2000,5000,10000,30000".to_string());
    let delays: Vec<Duration> = raw
        .split(',')
        .filter_map(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .collect();
    if delays.is_empty() {
        vec![Duration::from_secs(1)]
    } else {
        delays
    }
}

/// Workspace directory inside sandboxes.
pub fn workspace_dir() -> String {
    std::env::var("HARBOR_WORKSPACE_DIR").unwrap_or_else(|_| "/workspace".to_string())
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
