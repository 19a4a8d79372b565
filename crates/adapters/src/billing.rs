// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Billing policy gate.
//!
//! Consulted before resuming configuration-backed sessions. A denial is
//! terminal for the attempt: the runtime emits `status=error` with the
//! billing message and aborts.

use async_trait::async_trait;
use harbor_core::SessionRecord;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("billing backend unavailable: {0}")]
    Unavailable(String),
}

/// The metered action being gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingAction {
    SessionResume,
}

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingDecision {
    Allow,
    Deny { message: String },
}

/// Adapter for the external billing policy.
#[async_trait]
pub trait BillingGate: Send + Sync + 'static {
    async fn check(
        &self,
        session: &SessionRecord,
        action: BillingAction,
    ) -> Result<BillingDecision, BillingError>;
}

/// Policy that allows everything. Used when no billing backend is wired.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenBillingGate;

#[async_trait]
impl BillingGate for OpenBillingGate {
    async fn check(
        &self,
        _session: &SessionRecord,
        _action: BillingAction,
    ) -> Result<BillingDecision, BillingError> {
        Ok(BillingDecision::Allow)
    }
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Configurable gate for testing denial paths.
    #[derive(Clone, Default)]
    pub struct FakeBillingGate {
        deny_message: Arc<Mutex<Option<String>>>,
        checks: Arc<Mutex<u32>>,
    }

    impl FakeBillingGate {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn deny_with(&self, message: impl Into<String>) {
            *self.deny_message.lock() = Some(message.into());
        }

        pub fn allow(&self) {
            *self.deny_message.lock() = None;
        }

        pub fn checks(&self) -> u32 {
            *self.checks.lock()
        }
    }

    #[async_trait]
    impl BillingGate for FakeBillingGate {
        async fn check(
            &self,
            _session: &SessionRecord,
            _action: BillingAction,
        ) -> Result<BillingDecision, BillingError> {
            *self.checks.lock() += 1;
            match self.deny_message.lock().clone() {
                Some(message) => Ok(BillingDecision::Deny { message }),
                None => Ok(BillingDecision::Allow),
            }
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeBillingGate;
