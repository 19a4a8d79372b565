// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Base snapshot lookup.
//!
//! Immutable `(version_key, provider, app_name) → snapshot_id` mapping used
//! to pick the cold-start image. Lookup only; the gateway never writes it.

use crate::kv::StoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Lookup key for a base snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaseSnapshotKey {
    pub version_key: String,
    pub provider: String,
    pub app_name: String,
}

/// Read-only base snapshot table.
#[async_trait]
pub trait BaseSnapshots: Send + Sync + 'static {
    async fn lookup(&self, key: &BaseSnapshotKey) -> Result<Option<String>, StoreError>;
}

/// Table backed by a static map.
#[derive(Clone, Default)]
pub struct StaticBaseSnapshots {
    entries: Arc<Mutex<HashMap<BaseSnapshotKey, String>>>,
}

impl StaticBaseSnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: BaseSnapshotKey, snapshot_id: impl Into<String>) {
        self.entries.lock().insert(key, snapshot_id.into());
    }
}

#[async_trait]
impl BaseSnapshots for StaticBaseSnapshots {
    async fn lookup(&self, key: &BaseSnapshotKey) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }
}
