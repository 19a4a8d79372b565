// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat message shapes shared by both protocol directions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from protocol encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("bad frame: {0}")]
    BadFrame(String),
    #[error("bad image data uri")]
    BadImage,
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Tool call terminal state reported downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Completed,
    Error,
}

/// One chat message as replayed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Message {
    pub fn user(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { id: id.into(), role: MessageRole::User, content: content.into(), user_id: None }
    }

    pub fn assistant(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { id: id.into(), role: MessageRole::Assistant, content: content.into(), user_id: None }
    }
}

/// Decoded inline image from a `data:<mime>;base64,<data>` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSource {
    pub mime: String,
    pub data: Vec<u8>,
}

impl ImageSource {
    /// Parse a `data:` URI. Anything that is not a base64 data URI is rejected.
    pub fn from_data_uri(uri: &str) -> Result<Self, ProtocolError> {
        let rest = uri.strip_prefix("data:").ok_or(ProtocolError::BadImage)?;
        let (mime, payload) = rest.split_once(";base64,").ok_or(ProtocolError::BadImage)?;
        if mime.is_empty() {
            return Err(ProtocolError::BadImage);
        }
        use base64::Engine as _;
        let data = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|_| ProtocolError::BadImage)?;
        Ok(Self { mime: mime.to_string(), data })
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
