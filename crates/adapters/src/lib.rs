// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! harbor-adapters: capability traits for external collaborators.
//!
//! The gateway's out-of-scope dependencies (sandbox providers, the billing
//! policy, the session-context resolver, and the notification sink) are
//! modeled as async traits here. Production implementations live outside the
//! core; fakes for tests are exported behind the `test-support` feature.

pub mod billing;
pub mod context;
pub mod notify;
pub mod sandbox;

pub use billing::{BillingAction, BillingDecision, BillingError, BillingGate, OpenBillingGate};
pub use context::{ContextError, ContextLoader, StaticContextLoader};
pub use notify::{NoticeKind, Notifier, NotifyError, SessionNotice, TracingNotifier};
pub use sandbox::{
    snapshot_keeps_sandbox, EnsureSandboxRequest, EnsureSandboxResult, ExecOutput, ProviderError,
    SandboxProvider, MEMORY_SNAPSHOT_PREFIX, PAUSE_SNAPSHOT_PREFIX,
};

#[cfg(any(test, feature = "test-support"))]
pub use billing::FakeBillingGate;
#[cfg(any(test, feature = "test-support"))]
pub use notify::{FakeNotifier, NotifyCall};
#[cfg(any(test, feature = "test-support"))]
pub use sandbox::FakeSandboxProvider;
