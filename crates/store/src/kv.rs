// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TTL'd keyed string store with compare-and-set primitives.
//!
//! Redis semantics assumed: `set_nx` is SET NX PX, `set_if_eq` and
//! `del_if_eq` are the usual WATCH-free CAS scripts. Every operation can
//! fail with [`StoreError::Unavailable`], which callers treat as retryable,
//! distinct from "key not held", which is a plain `false`.

use async_trait::async_trait;
use harbor_core::Clock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Transport-level failure; the store may be fine. Retryable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed, TTL'd string store.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Set `key` to `value` with `ttl` only if the key is absent.
    /// Returns true if the write happened.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Set `key` unconditionally with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Set `key` to `value` with a fresh TTL only if its current value is
    /// `expected`. Returns true if the write happened.
    async fn set_if_eq(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Delete `key` only if its current value is `expected`.
    /// Returns true if the delete happened.
    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, StoreError>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory [`KvStore`] with clock-driven TTL eviction.
#[derive(Clone)]
pub struct MemoryKv {
    clock: Arc<dyn Clock>,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    unavailable: Arc<Mutex<bool>>,
}

impl MemoryKv {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Arc::new(Mutex::new(HashMap::new())),
            unavailable: Arc::new(Mutex::new(false)),
        }
    }

    /// Simulate a store outage: every call fails until cleared.
    pub fn set_unavailable(&self, down: bool) {
        *self.unavailable.lock() = down;
    }

    fn check_up(&self) -> Result<(), StoreError> {
        if *self.unavailable.lock() {
            return Err(StoreError::Unavailable("simulated outage".to_string()));
        }
        Ok(())
    }

    /// Read the live value for `key`, evicting it if expired.
    fn live<'a>(
        &self,
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
    ) -> Option<&'a mut Entry> {
        let now = self.clock.now();
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
            return None;
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check_up()?;
        let mut entries = self.entries.lock();
        if self.live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: self.clock.now() + ttl },
        );
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_up()?;
        self.entries.lock().insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: self.clock.now() + ttl },
        );
        Ok(())
    }

    async fn set_if_eq(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check_up()?;
        let mut entries = self.entries.lock();
        let expires_at = self.clock.now() + ttl;
        match self.live(&mut entries, key) {
            Some(entry) if entry.value == expected => {
                entry.value = value.to_string();
                entry.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_up()?;
        let mut entries = self.entries.lock();
        Ok(self.live(&mut entries, key).map(|e| e.value.clone()))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check_up()?;
        let mut entries = self.entries.lock();
        Ok(self.live(&mut entries, key).is_some())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.check_up()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn del_if_eq(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.check_up()?;
        let mut entries = self.entries.lock();
        let matched = self.live(&mut entries, key).is_some_and(|e| e.value == expected);
        if matched {
            entries.remove(key);
        }
        Ok(matched)
    }
}

#[cfg(test)]
#[path = "kv_tests.rs"]
mod tests;
