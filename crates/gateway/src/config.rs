// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime configuration snapshot.
//!
//! All knobs come from the environment (see [`crate::env`]); the struct
//! exists so tests can shrink every timer without touching process env.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub owner_lease_ttl: Duration,
    pub runtime_lease_ttl: Duration,
    pub heartbeat_timeout: Duration,
    pub read_timeout: Duration,
    pub idle_delay: Duration,
    pub expiry_grace: Duration,
    pub msg_complete_timeout: Duration,
    pub sweep_interval: Duration,
    pub expiry_poll_interval: Duration,
    pub migration_lock_wait: Duration,
    pub reconnect_delays: Vec<Duration>,
    pub version_key: String,
    pub app_name: String,
    pub service_token: String,
    pub gateway_url: String,
    pub workspace_dir: String,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            owner_lease_ttl: crate::env::owner_lease_ttl(),
            runtime_lease_ttl: crate::env::runtime_lease_ttl(),
            heartbeat_timeout: crate::env::heartbeat_timeout(),
            read_timeout: crate::env::read_timeout(),
            idle_delay: crate::env::idle_delay(),
            expiry_grace: crate::env::expiry_grace(),
            msg_complete_timeout: crate::env::msg_complete_timeout(),
            sweep_interval: crate::env::sweep_interval(),
            expiry_poll_interval: crate::env::expiry_poll_interval(),
            migration_lock_wait: crate::env::migration_lock_wait(),
            reconnect_delays: crate::env::reconnect_delays(),
            version_key: crate::env::version_key(),
            app_name: crate::env::app_name(),
            service_token: crate::env::service_token(),
            gateway_url: crate::env::gateway_url(),
            workspace_dir: crate::env::workspace_dir(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            owner_lease_ttl: Duration::from_secs(30),
            runtime_lease_ttl: Duration::from_secs(45),
            heartbeat_timeout: Duration::from_secs(90),
            read_timeout: Duration::from_secs(60),
            idle_delay: Duration::from_secs(300),
            expiry_grace: Duration::from_secs(300),
            msg_complete_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(900),
            expiry_poll_interval: Duration::from_secs(1),
            migration_lock_wait: Duration::from_secs(120),
            reconnect_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(30),
            ],
            version_key: "default".to_string(),
            app_name: "harbor".to_string(),
            service_token: String::new(),
            gateway_url: "http://localhost:8787".to_string(),
            workspace_dir: "/workspace".to_string(),
        }
    }
}
