// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! harbor-store: storage traits and in-memory backends.
//!
//! Three substrates back the gateway:
//! - [`KvStore`] — a TTL'd keyed string store with CAS set/delete
//!   (Redis semantics); the authority for exclusivity.
//! - [`SessionStore`] — session rows with CAS updates guarded on
//!   `sandbox_id`; the authority for durable state.
//! - [`DelayQueue`] — named delayed jobs with stable ids.
//!
//! The in-memory implementations are the test substrate and serve
//! single-node deployments; they take the shared [`harbor_core::Clock`] so
//! TTLs and delays are driven by test time.

pub mod kv;
pub mod queue;
pub mod sessions;
pub mod snapshots;

pub use kv::{KvStore, MemoryKv, StoreError};
pub use queue::{DelayQueue, DelayedJob, MemoryDelayQueue};
pub use sessions::{CasOutcome, MemorySessionStore, SessionStore};
pub use snapshots::{BaseSnapshotKey, BaseSnapshots, StaticBaseSnapshots};
