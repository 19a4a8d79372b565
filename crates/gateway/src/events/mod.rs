// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event processing.
//!
//! [`EventProcessor`] is the pure state machine between the upstream event
//! stream and the client protocol. It owns per-prompt state only; the hub
//! feeds it events and broadcasts whatever it returns.

mod processor;

pub use processor::{EventProcessor, ToolState};
