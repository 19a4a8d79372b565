// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup, signals, graceful shutdown.
//!
//! Startup order: pid lock → dependency wiring → one orphan sweep pass →
//! background workers (sweeper, expiry) → client listener. Shutdown releases
//! every lease so a replacement replica can adopt the sessions immediately.

use crate::config::GatewayConfig;
use crate::deps::{Deps, ProviderRegistry, SessionEventBus};
use crate::expiry::{run_expiry_worker, ExpiryHandler};
use crate::hub::{HubRegistry, RegistryExpiryHandler};
use crate::listener::{ListenCtx, Listener};
use crate::sweeper;
use crate::upstream::{HttpAgentApi, SseConnector};
use fs2::FileExt;
use harbor_adapters::{OpenBillingGate, StaticContextLoader, TracingNotifier};
use harbor_core::{InstanceId, SystemClock};
use harbor_store::{MemoryDelayQueue, MemoryKv, MemorySessionStore, StaticBaseSnapshots};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot resolve a state directory (set HARBOR_STATE_DIR or HOME)")]
    NoStateDir,

    #[error("another gateway instance holds the lock at {0}")]
    AlreadyRunning(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Exclusive pid lock under the state dir. Held for the process lifetime.
pub struct PidLock {
    _file: File,
    path: PathBuf,
}

impl PidLock {
    pub fn acquire(state_dir: &PathBuf) -> Result<Self, LifecycleError> {
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join("harbord.lock");
        let file = File::create(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| LifecycleError::AlreadyRunning(path.clone()))?;
        std::fs::write(state_dir.join("harbord.pid"), std::process::id().to_string())?;
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

/// Wire the default single-node dependency set.
///
/// Stores are in-memory; production deployments swap in Redis/SQL-backed
/// implementations of the same traits. Sandbox providers are registered by
/// the embedding binary.
pub fn build_deps(config: GatewayConfig, providers: ProviderRegistry) -> Arc<Deps> {
    let clock: Arc<dyn harbor_core::Clock> = Arc::new(SystemClock);
    Arc::new(Deps {
        kv: Arc::new(MemoryKv::new(clock.clone())),
        sessions: Arc::new(MemorySessionStore::new(clock.clone())),
        queue: Arc::new(MemoryDelayQueue::new()),
        base_snapshots: Arc::new(StaticBaseSnapshots::new()),
        contexts: Arc::new(StaticContextLoader::new()),
        billing: Arc::new(OpenBillingGate),
        notifier: Arc::new(TracingNotifier),
        agent: Arc::new(HttpAgentApi::new()),
        streams: Arc::new(SseConnector::new(config.read_timeout, config.heartbeat_timeout)),
        events: SessionEventBus::new(),
        instance_id: InstanceId::new(),
        clock,
        config,
        providers,
    })
}

/// Run the daemon until a shutdown signal arrives.
pub async fn run(deps: Arc<Deps>) -> Result<(), LifecycleError> {
    let state_dir = crate::env::state_dir()?;
    let _pid_lock = PidLock::acquire(&state_dir)?;
    info!(instance_id = %deps.instance_id, state_dir = %state_dir.display(), "gateway starting");

    let registry = HubRegistry::new(deps.clone());
    let shutdown = CancellationToken::new();

    // Startup reconciliation before accepting anything
    sweeper::sweep_once(&deps, &registry).await;

    let sweeper_task = tokio::spawn(sweeper::run_sweeper(
        deps.clone(),
        registry.clone(),
        shutdown.clone(),
    ));
    let expiry_handler: Arc<dyn ExpiryHandler> =
        Arc::new(RegistryExpiryHandler(registry.clone()));
    let expiry_task = tokio::spawn(run_expiry_worker(
        deps.queue.clone(),
        deps.clock.clone(),
        deps.config.expiry_poll_interval,
        expiry_handler,
        shutdown.clone(),
    ));

    let port = crate::env::tcp_port();
    let tcp = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "listening for client connections");
    let listener = Listener::new(
        tcp,
        Arc::new(ListenCtx {
            registry: registry.clone(),
            auth_token: crate::env::auth_token(),
            shutdown: shutdown.clone(),
        }),
    );
    let listener_task = tokio::spawn(listener.run());

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining");
    shutdown.cancel();

    // Hand sessions to the next replica
    let drain = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        registry.release_all_leases(),
    )
    .await;
    if drain.is_err() {
        warn!("lease release timed out during shutdown");
    }

    listener_task.abort();
    sweeper_task.abort();
    expiry_task.abort();
    info!("gateway stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
