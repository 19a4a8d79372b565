// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared dependency bundle.
//!
//! One `Arc<Deps>` is threaded through every per-session component. The only
//! process-wide mutable state lives behind these handles: the hub registry,
//! the lease store, the delayed job queue, and the session event bus.

use harbor_adapters::{BillingGate, ContextLoader, Notifier, SandboxProvider};
use harbor_core::{Clock, InstanceId, SessionId};
use harbor_store::{BaseSnapshots, DelayQueue, KvStore, SessionStore};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::expiry::ExpiryScheduler;
use crate::leases::Leases;
use crate::upstream::{AgentApi, StreamConnector};

/// Sandbox providers by name, as stored in the session row.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn SandboxProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn SandboxProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SandboxProvider>> {
        self.providers.get(name).cloned()
    }
}

/// Session-scoped event published on the process-wide bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    UserMessage { session_id: SessionId, user_id: Option<String> },
}

/// Process-wide pub/sub for session events.
#[derive(Clone)]
pub struct SessionEventBus {
    tx: tokio::sync::broadcast::Sender<SessionEvent>,
}

impl Default for SessionEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionEventBus {
    pub fn new() -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(256);
        Self { tx }
    }

    pub fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

/// Everything a hub needs, shared across sessions.
pub struct Deps {
    pub clock: Arc<dyn Clock>,
    pub config: GatewayConfig,
    pub instance_id: InstanceId,

    pub kv: Arc<dyn KvStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub queue: Arc<dyn DelayQueue>,
    pub base_snapshots: Arc<dyn BaseSnapshots>,

    pub providers: ProviderRegistry,
    pub contexts: Arc<dyn ContextLoader>,
    pub billing: Arc<dyn BillingGate>,
    pub notifier: Arc<dyn Notifier>,

    pub agent: Arc<dyn AgentApi>,
    pub streams: Arc<dyn StreamConnector>,

    pub events: SessionEventBus,
}

impl Deps {
    pub fn leases(&self) -> Leases {
        Leases::new(
            self.kv.clone(),
            self.clock.clone(),
            self.config.owner_lease_ttl,
            self.config.runtime_lease_ttl,
            self.config.migration_lock_wait,
        )
    }

    pub fn expiry(&self) -> ExpiryScheduler {
        ExpiryScheduler::new(self.queue.clone(), self.clock.clone(), self.config.expiry_grace)
    }
}
