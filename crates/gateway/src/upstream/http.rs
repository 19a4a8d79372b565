// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the agent API on a sandbox tunnel.
//!
//! Sends HTTP/1.1 requests over TCP. Reads responses using Content-Length
//! framing (does not depend on connection close for EOF). Tunnels are
//! cluster-internal plain HTTP.

use super::api::{AgentApi, AgentApiError, AgentSessionInfo, PromptPayload};
use async_trait::async_trait;
use harbor_wire::{Message, MessageRole};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Split a tunnel URL into `host:port` and a base path.
pub(crate) fn parse_tunnel_url(url: &str) -> Result<(String, String), AgentApiError> {
    let rest = url
        .strip_prefix("http://")
        .ok_or_else(|| AgentApiError::BadResponse(format!("unsupported tunnel url: {}", url)))?;
    let (addr, path) = match rest.find('/') {
        Some(i) => (&rest[..i], rest[i..].trim_end_matches('/')),
        None => (rest, ""),
    };
    let addr = if addr.contains(':') { addr.to_string() } else { format!("{}:80", addr) };
    Ok((addr, path.to_string()))
}

pub(crate) async fn request(
    addr: &str,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> Result<(u16, String), AgentApiError> {
    tokio::time::timeout(Duration::from_secs(10), send_request(addr, method, path, body))
        .await
        .map_err(|_| AgentApiError::Network("request timed out (socket)".to_string()))?
}

async fn send_request(
    addr: &str,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> Result<(u16, String), AgentApiError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| AgentApiError::Network(format!("connect failed: {}", e)))?;

    let request = match body {
        Some(body) => format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            method,
            path,
            addr,
            body.len(),
            body
        ),
        None => format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            method, path, addr
        ),
    };
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| AgentApiError::Network(format!("write failed: {}", e)))?;

    let mut reader = BufReader::new(&mut stream);
    read_response(&mut reader).await
}

/// Read and parse an HTTP/1.1 response from a buffered stream.
pub(crate) async fn read_response<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<(u16, String), AgentApiError> {
    let mut status_line = String::new();
    reader
        .read_line(&mut status_line)
        .await
        .map_err(|e| AgentApiError::Network(format!("read status failed: {}", e)))?;

    let status_code =
        status_line.split_whitespace().nth(1).and_then(|s| s.parse::<u16>().ok()).unwrap_or(0);

    // Read headers, extract Content-Length (case-insensitive)
    let mut content_length: usize = 0;
    loop {
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| AgentApiError::Network(format!("read header failed: {}", e)))?;
        if line == "\r\n" || line.is_empty() {
            break;
        }
        let line_lower = line.to_ascii_lowercase();
        if let Some(val) = line_lower.strip_prefix("content-length:") {
            content_length = val.trim().parse().unwrap_or(0);
        }
    }

    let body = if content_length > 0 {
        let mut buf = vec![0u8; content_length];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(|e| AgentApiError::Network(format!("read body failed: {}", e)))?;
        String::from_utf8_lossy(&buf).into_owned()
    } else {
        String::new()
    };

    Ok((status_code, body))
}

fn check_status(status: u16, body: String) -> Result<String, AgentApiError> {
    match status {
        200..=299 => Ok(body),
        404 => Err(AgentApiError::NotFound),
        _ => Err(AgentApiError::Http { status, body: body.trim().to_string() }),
    }
}

fn parse_session_info(value: &Value) -> Option<AgentSessionInfo> {
    Some(AgentSessionInfo {
        id: value.get("id")?.as_str()?.to_string(),
        created_ms: value.get("time").and_then(|t| t.get("created")).and_then(Value::as_u64),
        updated_ms: value.get("time").and_then(|t| t.get("updated")).and_then(Value::as_u64),
    })
}

/// Flatten one upstream message object into the replay shape.
fn parse_message(value: &Value) -> Option<Message> {
    let info = value.get("info")?;
    let id = info.get("id")?.as_str()?.to_string();
    let role = match info.get("role").and_then(Value::as_str) {
        Some("user") => MessageRole::User,
        _ => MessageRole::Assistant,
    };
    let content = value
        .get("parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();
    Some(Message { id, role, content, user_id: None })
}

/// Agent API over the tunnel's plain-HTTP surface.
#[derive(Clone, Copy, Default)]
pub struct HttpAgentApi;

impl HttpAgentApi {
    pub fn new() -> Self {
        Self
    }

    async fn call(
        &self,
        tunnel_url: &str,
        method: &str,
        path: &str,
        body: Option<&str>,
    ) -> Result<String, AgentApiError> {
        let (addr, base) = parse_tunnel_url(tunnel_url)?;
        let (status, body) = request(&addr, method, &format!("{}{}", base, path), body).await?;
        check_status(status, body)
    }
}

#[async_trait]
impl AgentApi for HttpAgentApi {
    async fn create_session(&self, tunnel_url: &str) -> Result<String, AgentApiError> {
        let body = self.call(tunnel_url, "POST", "/session", Some("{}")).await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| AgentApiError::BadResponse(format!("create session: {}", e)))?;
        value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AgentApiError::BadResponse("create session: no id".to_string()))
    }

    async fn get_session(
        &self,
        tunnel_url: &str,
        agent_session_id: &str,
    ) -> Result<AgentSessionInfo, AgentApiError> {
        let body =
            self.call(tunnel_url, "GET", &format!("/session/{}", agent_session_id), None).await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| AgentApiError::BadResponse(format!("get session: {}", e)))?;
        parse_session_info(&value)
            .ok_or_else(|| AgentApiError::BadResponse("get session: no id".to_string()))
    }

    async fn list_sessions(
        &self,
        tunnel_url: &str,
    ) -> Result<Vec<AgentSessionInfo>, AgentApiError> {
        let body = self.call(tunnel_url, "GET", "/session", None).await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| AgentApiError::BadResponse(format!("list sessions: {}", e)))?;
        Ok(value
            .as_array()
            .map(|items| items.iter().filter_map(parse_session_info).collect())
            .unwrap_or_default())
    }

    async fn list_messages(
        &self,
        tunnel_url: &str,
        agent_session_id: &str,
    ) -> Result<Vec<Message>, AgentApiError> {
        let body = self
            .call(tunnel_url, "GET", &format!("/session/{}/message", agent_session_id), None)
            .await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| AgentApiError::BadResponse(format!("list messages: {}", e)))?;
        Ok(value
            .as_array()
            .map(|items| items.iter().filter_map(parse_message).collect())
            .unwrap_or_default())
    }

    async fn prompt_async(
        &self,
        tunnel_url: &str,
        agent_session_id: &str,
        payload: PromptPayload,
    ) -> Result<(), AgentApiError> {
        let mut parts = vec![json!({"type": "text", "text": payload.text})];
        for image in &payload.images {
            parts.push(json!({
                "type": "file",
                "mime": image.mime,
                "url": image.data_uri,
            }));
        }
        let body = json!({"parts": parts}).to_string();
        self.call(
            tunnel_url,
            "POST",
            &format!("/session/{}/prompt_async", agent_session_id),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn abort(&self, tunnel_url: &str, agent_session_id: &str) -> Result<(), AgentApiError> {
        self.call(tunnel_url, "POST", &format!("/session/{}/abort", agent_session_id), Some("{}"))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
