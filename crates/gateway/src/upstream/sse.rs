// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-sent-event stream client.
//!
//! `connect` issues `GET <tunnel>/event` with `Accept: text/event-stream`
//! and spawns a reader that parses SSE frames, JSON-decodes each payload,
//! and forwards typed events into the pump channel. The client never
//! reconnects; the hub owns that policy.
//!
//! Two timers guard the stream: a per-chunk read timeout and a heartbeat
//! window reset by every event (the agent emits `server.heartbeat`
//! periodically).

use super::http::{parse_tunnel_url, read_response};
use super::stream::{DisconnectReason, StreamConnector, StreamError, StreamFrame, StreamHandle};
use super::types::{parse_event, ParseOutcome};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Incremental SSE frame parser.
///
/// Feed lines; a blank line dispatches the accumulated `data:` payload.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    data: Vec<String>,
}

impl SseParser {
    pub(crate) fn push_line(&mut self, line: &str) -> Option<String> {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.data).join("\n"));
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
        // `event:`/`id:`/`retry:` fields are not used by the agent protocol
        None
    }
}

struct SseHandle {
    token: CancellationToken,
    connected: Arc<AtomicBool>,
}

impl StreamHandle for SseHandle {
    fn disconnect(&self) {
        self.token.cancel();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// SSE-backed [`StreamConnector`].
#[derive(Clone)]
pub struct SseConnector {
    read_timeout: Duration,
    heartbeat_timeout: Duration,
}

impl SseConnector {
    pub fn new(read_timeout: Duration, heartbeat_timeout: Duration) -> Self {
        Self { read_timeout, heartbeat_timeout }
    }
}

#[async_trait]
impl StreamConnector for SseConnector {
    async fn connect(
        &self,
        url: &str,
        tx: mpsc::Sender<StreamFrame>,
    ) -> Result<Box<dyn StreamHandle>, StreamError> {
        let (addr, base) =
            parse_tunnel_url(url).map_err(|e| StreamError::Connect(e.to_string()))?;

        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| StreamError::Connect(format!("connect {}: {}", addr, e)))?;

        let request = format!(
            "GET {}/event HTTP/1.1\r\nHost: {}\r\nAccept: text/event-stream\r\n\r\n",
            base, addr
        );
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| StreamError::Connect(format!("write failed: {}", e)))?;

        let mut reader = BufReader::new(stream);
        let status = read_stream_headers(&mut reader).await?;
        if !(200..300).contains(&status) {
            return Err(StreamError::Http(status));
        }

        let token = CancellationToken::new();
        let connected = Arc::new(AtomicBool::new(true));
        tokio::spawn(read_loop(
            reader,
            tx,
            token.clone(),
            connected.clone(),
            self.read_timeout,
            self.heartbeat_timeout,
        ));

        Ok(Box::new(SseHandle { token, connected }))
    }
}

/// Read the response status line and headers, leaving the body unread.
async fn read_stream_headers(reader: &mut BufReader<TcpStream>) -> Result<u16, StreamError> {
    let mut status_line = String::new();
    reader
        .read_line(&mut status_line)
        .await
        .map_err(|e| StreamError::Connect(format!("read status failed: {}", e)))?;
    if status_line.is_empty() {
        return Err(StreamError::NoBody);
    }
    let status =
        status_line.split_whitespace().nth(1).and_then(|s| s.parse::<u16>().ok()).unwrap_or(0);
    loop {
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| StreamError::Connect(format!("read header failed: {}", e)))?;
        if line == "\r\n" || line.is_empty() {
            break;
        }
    }
    Ok(status)
}

async fn read_loop(
    mut reader: BufReader<TcpStream>,
    tx: mpsc::Sender<StreamFrame>,
    token: CancellationToken,
    connected: Arc<AtomicBool>,
    read_timeout: Duration,
    heartbeat_timeout: Duration,
) {
    let mut parser = SseParser::default();
    let mut heartbeat_deadline = tokio::time::Instant::now() + heartbeat_timeout;
    let mut line = String::new();

    let reason = loop {
        line.clear();
        let read = tokio::select! {
            _ = token.cancelled() => break DisconnectReason::Requested,
            _ = tokio::time::sleep_until(heartbeat_deadline) => {
                break DisconnectReason::HeartbeatTimeout;
            }
            read = tokio::time::timeout(read_timeout, reader.read_line(&mut line)) => read,
        };

        match read {
            Err(_) => break DisconnectReason::ReadTimeout,
            Ok(Ok(0)) => break DisconnectReason::StreamClosed,
            Ok(Ok(_)) => {}
            Ok(Err(e)) => break classify_io_error(&e),
        }

        let Some(payload) = parser.push_line(&line) else { continue };
        match parse_event(&payload) {
            ParseOutcome::Event(event) => {
                heartbeat_deadline = tokio::time::Instant::now() + heartbeat_timeout;
                if tx.send(StreamFrame::Event(event)).await.is_err() {
                    break DisconnectReason::Requested;
                }
            }
            ParseOutcome::Ignored => {
                heartbeat_deadline = tokio::time::Instant::now() + heartbeat_timeout;
            }
            ParseOutcome::Malformed(reason) => {
                tracing::warn!(%reason, "dropping malformed upstream event");
            }
        }
    };

    connected.store(false, Ordering::SeqCst);
    tracing::debug!(reason = %reason, "event stream ended");
    let _ = tx.send(StreamFrame::Disconnected(reason)).await;
}

/// Abort, socket-closed, and terminated-frame errors are all `stream_closed`;
/// anything else is `stream_error`.
fn classify_io_error(e: &std::io::Error) -> DisconnectReason {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => DisconnectReason::StreamClosed,
        _ => DisconnectReason::StreamError(e.to_string()),
    }
}

#[cfg(test)]
#[path = "sse_tests.rs"]
mod tests;
