// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client wire protocol for the Harbor gateway.
//!
//! Full-duplex JSON messages over a single socket. Inbound frames are
//! [`ClientCommand`], outbound frames are [`ServerMessage`]; both are tagged
//! by a `type` field in snake_case.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod command;
mod message;
mod server;

pub use command::ClientCommand;
pub use message::{ImageSource, Message, MessageRole, ProtocolError, ToolStatus};
pub use server::{GitFileStatus, GitStatusReport, ServerMessage};

/// Decode one inbound client frame.
pub fn decode_command(text: &str) -> Result<ClientCommand, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError::BadFrame(e.to_string()))
}

/// Encode one outbound server frame.
pub fn encode_server(msg: &ServerMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::BadFrame(e.to_string()))
}
