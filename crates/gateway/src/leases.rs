// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lease and lock layer over the keyed TTL store.
//!
//! Three primitives, all keyed by session id:
//! - the owner lease (`lease:owner:`) — at most one gateway process may hold
//!   it; its value is the holder's instance id,
//! - the runtime lease (`lease:runtime:`) — existence means some process
//!   believes the runtime is alive,
//! - the migration lock (`lock:migration:`) — mutual exclusion for
//!   migration, idle snapshot, orphan cleanup, and cold start.
//!
//! Every operation distinguishes "not held by me" from "store unreachable";
//! callers treat the latter as retryable and the former as fatal to their
//! invariant.

use harbor_core::{Clock, InstanceId, SessionId};
use harbor_store::{KvStore, StoreError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LeaseError {
    /// The lease/lock is not held by this process.
    #[error("lease not held")]
    NotHeld,

    /// The store could not be reached; retryable.
    #[error("lease store unavailable: {0}")]
    Unavailable(String),

    /// Waiting for a lock to clear exceeded the configured bound.
    #[error("timed out waiting for migration lock on {0}")]
    WaitTimeout(SessionId),
}

impl From<StoreError> for LeaseError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => LeaseError::Unavailable(msg),
        }
    }
}

fn owner_key(session_id: &SessionId) -> String {
    format!("lease:owner:{}", session_id)
}

fn runtime_key(session_id: &SessionId) -> String {
    format!("lease:runtime:{}", session_id)
}

fn migration_key(session_id: &SessionId) -> String {
    format!("lock:migration:{}", session_id)
}

/// Lease operations bound to a store and TTL configuration.
#[derive(Clone)]
pub struct Leases {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    owner_ttl: Duration,
    runtime_ttl: Duration,
    lock_wait: Duration,
}

impl Leases {
    pub fn new(
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        owner_ttl: Duration,
        runtime_ttl: Duration,
        lock_wait: Duration,
    ) -> Self {
        Self { kv, clock, owner_ttl, runtime_ttl, lock_wait }
    }

    pub fn owner_ttl(&self) -> Duration {
        self.owner_ttl
    }

    /// Take the owner lease. True iff the key was empty or already held by
    /// `instance_id` (re-acquire refreshes the TTL).
    pub async fn acquire_owner_lease(
        &self,
        session_id: &SessionId,
        instance_id: &InstanceId,
    ) -> Result<bool, LeaseError> {
        let key = owner_key(session_id);
        if self.kv.set_nx(&key, instance_id.as_str(), self.owner_ttl).await? {
            return Ok(true);
        }
        // Already present: ours?
        Ok(self
            .kv
            .set_if_eq(&key, instance_id.as_str(), instance_id.as_str(), self.owner_ttl)
            .await?)
    }

    /// Extend the owner lease. Fails with [`LeaseError::NotHeld`] if another
    /// process took it.
    pub async fn renew_owner_lease(
        &self,
        session_id: &SessionId,
        instance_id: &InstanceId,
    ) -> Result<(), LeaseError> {
        let renewed = self
            .kv
            .set_if_eq(
                &owner_key(session_id),
                instance_id.as_str(),
                instance_id.as_str(),
                self.owner_ttl,
            )
            .await?;
        if renewed {
            Ok(())
        } else {
            Err(LeaseError::NotHeld)
        }
    }

    /// Drop the owner lease iff we hold it.
    pub async fn release_owner_lease(
        &self,
        session_id: &SessionId,
        instance_id: &InstanceId,
    ) -> Result<(), LeaseError> {
        self.kv.del_if_eq(&owner_key(session_id), instance_id.as_str()).await?;
        Ok(())
    }

    /// Mark the runtime as alive.
    pub async fn set_runtime_lease(&self, session_id: &SessionId) -> Result<(), LeaseError> {
        self.kv.set(&runtime_key(session_id), "1", self.runtime_ttl).await?;
        Ok(())
    }

    pub async fn has_runtime_lease(&self, session_id: &SessionId) -> Result<bool, LeaseError> {
        Ok(self.kv.exists(&runtime_key(session_id)).await?)
    }

    pub async fn clear_runtime_lease(&self, session_id: &SessionId) -> Result<(), LeaseError> {
        self.kv.del(&runtime_key(session_id)).await?;
        Ok(())
    }

    /// Run `f` under the per-session migration lock.
    ///
    /// No retries: returns `Ok(None)` when the lock is already held
    /// elsewhere. The lock is released on every exit path.
    pub async fn run_with_migration_lock<T, F, Fut>(
        &self,
        session_id: &SessionId,
        ttl: Duration,
        f: F,
    ) -> Result<Option<T>, LeaseError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let key = migration_key(session_id);
        let token = nanoid::nanoid!(19);
        if !self.kv.set_nx(&key, &token, ttl).await? {
            return Ok(None);
        }

        let out = f().await;

        if let Err(e) = self.kv.del_if_eq(&key, &token).await {
            tracing::warn!(session_id = %session_id, error = %e, "migration lock release failed");
        }
        Ok(Some(out))
    }

    /// Wait until no one holds the migration lock, by briefly
    /// acquiring and releasing it. Bounded by the configured wait.
    pub async fn wait_for_migration_lock_release(
        &self,
        session_id: &SessionId,
    ) -> Result<(), LeaseError> {
        let key = migration_key(session_id);
        let deadline = self.clock.now() + self.lock_wait;
        loop {
            let token = nanoid::nanoid!(19);
            match self.kv.set_nx(&key, &token, Duration::from_secs(5)).await {
                Ok(true) => {
                    let _ = self.kv.del_if_eq(&key, &token).await;
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => return Err(e.into()),
            }
            if self.clock.now() >= deadline {
                return Err(LeaseError::WaitTimeout(session_id.clone()));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}

#[cfg(test)]
#[path = "leases_tests.rs"]
mod tests;
