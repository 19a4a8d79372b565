// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-local hub index.
//!
//! One hub per session id, created lazily. Creation is single-flighted: a
//! pending creation future is stored so concurrent callers share it instead
//! of racing to build two hubs.

use super::SessionHub;
use crate::deps::Deps;
use crate::expiry::ExpiryHandler;
use crate::migration::MigrationController;
use crate::runtime::SessionRuntime;
use crate::telemetry::TelemetryAccumulator;
use async_trait::async_trait;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use harbor_core::SessionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("hub creation failed: {0}")]
    Create(String),
}

type PendingCreate = Shared<BoxFuture<'static, Result<Arc<SessionHub>, RegistryError>>>;

pub struct HubRegistry {
    deps: Arc<Deps>,
    hubs: Mutex<HashMap<SessionId, Arc<SessionHub>>>,
    pending: Mutex<HashMap<SessionId, PendingCreate>>,
}

impl HubRegistry {
    pub fn new(deps: Arc<Deps>) -> Arc<Self> {
        Arc::new(Self {
            deps,
            hubs: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Arc<SessionHub>> {
        self.hubs.lock().get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.hubs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hubs.lock().is_empty()
    }

    pub fn all(&self) -> Vec<Arc<SessionHub>> {
        self.hubs.lock().values().cloned().collect()
    }

    /// Fetch or create the hub for a session. Concurrent callers for the
    /// same id share one creation.
    pub async fn get_or_create(
        self: &Arc<Self>,
        session_id: &SessionId,
    ) -> Result<Arc<SessionHub>, RegistryError> {
        if let Some(hub) = self.get(session_id) {
            return Ok(hub);
        }
        let pending = {
            let mut pending = self.pending.lock();
            match pending.get(session_id) {
                Some(flight) => flight.clone(),
                None => {
                    let this = self.clone();
                    let id = session_id.clone();
                    let task = tokio::spawn(async move { this.create_hub(id).await });
                    let flight: PendingCreate = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) => Err(RegistryError::Create(e.to_string())),
                        }
                    }
                    .boxed()
                    .shared();
                    pending.insert(session_id.clone(), flight.clone());
                    flight
                }
            }
        };
        let result = pending.await;
        self.pending.lock().remove(session_id);
        result
    }

    async fn create_hub(
        self: Arc<Self>,
        session_id: SessionId,
    ) -> Result<Arc<SessionHub>, RegistryError> {
        if let Some(hub) = self.get(&session_id) {
            return Ok(hub);
        }
        let record = self
            .deps
            .sessions
            .get(&session_id)
            .await
            .map_err(|e| RegistryError::Create(e.to_string()))?
            .ok_or_else(|| RegistryError::NotFound(session_id.clone()))?;

        let runtime = Arc::new(SessionRuntime::new(session_id.clone(), self.deps.clone()));
        let telemetry = Arc::new(TelemetryAccumulator::new(self.deps.clock.clone()));
        let migration = Arc::new(MigrationController::new(
            session_id.clone(),
            self.deps.clone(),
            runtime.clone(),
            telemetry.clone(),
        ));

        let registry = Arc::downgrade(&self);
        let evict_cb = Box::new(move |id: &SessionId| {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        });

        let hub =
            SessionHub::new(&record, self.deps.clone(), runtime, migration, telemetry, evict_cb);
        self.hubs.lock().insert(session_id.clone(), hub.clone());
        tracing::info!(session_id = %session_id, hubs = self.len(), "hub created");
        Ok(hub)
    }

    /// Drop a hub: stop migration monitoring and delete the entry.
    pub fn remove(&self, session_id: &SessionId) {
        if let Some(hub) = self.hubs.lock().remove(session_id) {
            hub.migration().stop();
            tracing::info!(session_id = %session_id, "hub evicted");
        }
    }

    /// Graceful shutdown: flush and release every hub's leases so a
    /// replacement replica can adopt the sessions immediately.
    pub async fn release_all_leases(&self) {
        let hubs = self.all();
        for hub in hubs {
            hub.release_leases().await;
        }
    }
}

/// Adapter hooking the registry into the expiry worker.
pub struct RegistryExpiryHandler(pub Arc<HubRegistry>);

#[async_trait]
impl ExpiryHandler for RegistryExpiryHandler {
    async fn handle_expiry(&self, session_id: &SessionId) {
        match self.0.get_or_create(session_id).await {
            Ok(hub) => hub.run_expiry_migration().await,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "expiry job could not resolve hub");
            }
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
