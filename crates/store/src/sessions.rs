// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session row persistence.
//!
//! The relational store is the authority for durable state. Cross-replica
//! transitions that depend on a prior observation go through
//! [`SessionStore::update_if_sandbox`], a CAS whose WHERE clause includes the
//! previously observed `sandbox_id`. Zero rows affected is a valid, silent
//! outcome: some other actor advanced the state first.

use crate::kv::StoreError;
use async_trait::async_trait;
use harbor_core::{Clock, SessionId, SessionPatch, SessionRecord, SessionStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of a CAS-guarded update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The guard matched; the patch was applied.
    Applied,
    /// Zero rows affected: another actor won. Persistent state unchanged.
    Lost,
}

/// Store of session rows.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn get(&self, session_id: &SessionId) -> Result<Option<SessionRecord>, StoreError>;

    async fn insert(&self, record: SessionRecord) -> Result<(), StoreError>;

    /// Unconditional partial update. Returns false if the row is missing.
    async fn update(
        &self,
        session_id: &SessionId,
        patch: SessionPatch,
    ) -> Result<bool, StoreError>;

    /// Partial update guarded by `sandbox_id == expected_sandbox`.
    async fn update_if_sandbox(
        &self,
        session_id: &SessionId,
        expected_sandbox: Option<&str>,
        patch: SessionPatch,
    ) -> Result<CasOutcome, StoreError>;

    /// Ids of all sessions with `status = running`.
    async fn list_running(&self) -> Result<Vec<SessionId>, StoreError>;
}

/// In-memory [`SessionStore`].
#[derive(Clone)]
pub struct MemorySessionStore {
    clock: Arc<dyn Clock>,
    rows: Arc<Mutex<HashMap<SessionId, SessionRecord>>>,
}

impl MemorySessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock, rows: Arc::new(Mutex::new(HashMap::new())) }
    }

    fn touch(&self, record: &mut SessionRecord) {
        record.updated_at = chrono::DateTime::from_timestamp_millis(self.clock.epoch_ms() as i64)
            .unwrap_or(chrono::DateTime::UNIX_EPOCH);
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.rows.lock().get(session_id).cloned())
    }

    async fn insert(&self, mut record: SessionRecord) -> Result<(), StoreError> {
        self.touch(&mut record);
        self.rows.lock().insert(record.session_id.clone(), record);
        Ok(())
    }

    async fn update(
        &self,
        session_id: &SessionId,
        patch: SessionPatch,
    ) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock();
        match rows.get_mut(session_id) {
            Some(record) => {
                patch.apply(record);
                self.touch(record);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_if_sandbox(
        &self,
        session_id: &SessionId,
        expected_sandbox: Option<&str>,
        patch: SessionPatch,
    ) -> Result<CasOutcome, StoreError> {
        let mut rows = self.rows.lock();
        match rows.get_mut(session_id) {
            Some(record) if record.sandbox_id.as_deref() == expected_sandbox => {
                patch.apply(record);
                self.touch(record);
                Ok(CasOutcome::Applied)
            }
            _ => Ok(CasOutcome::Lost),
        }
    }

    async fn list_running(&self) -> Result<Vec<SessionId>, StoreError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|r| r.status == SessionStatus::Running)
            .map(|r| r.session_id.clone())
            .collect())
    }
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
