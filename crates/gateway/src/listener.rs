// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for client WebSocket connections.
//!
//! Accepts connections and handles them without blocking anything else; one
//! reader and one writer task per socket. Clients connect to
//! `ws://host:port/session/<session_id>?user=<user_id>&token=<token>`.
//! A protocol error answers with a single `error` frame and leaves the
//! connection open; socket close detaches the client from its hub.

use crate::hub::{HubRegistry, Outbound, SessionHub};
use futures_util::{SinkExt, StreamExt};
use harbor_core::SessionId;
use harbor_wire::{decode_command, ServerMessage};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared listener context.
pub struct ListenCtx {
    pub registry: Arc<HubRegistry>,
    /// When set, clients must present this token in the connect query.
    pub auth_token: Option<String>,
    pub shutdown: CancellationToken,
}

#[derive(Debug, Error)]
enum ConnectionError {
    #[error("handshake rejected")]
    Handshake,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
}

/// Parsed connect target from the handshake request path.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectTarget {
    session_id: SessionId,
    user_id: Option<String>,
    token: Option<String>,
}

fn parse_target(uri_path: &str) -> Option<ConnectTarget> {
    let (path, query) = match uri_path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (uri_path, None),
    };
    let session_id = path.strip_prefix("/session/").filter(|rest| !rest.is_empty())?;

    let mut user_id = None;
    let mut token = None;
    if let Some(query) = query {
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("user", v)) if !v.is_empty() => user_id = Some(v.to_string()),
                Some(("token", v)) if !v.is_empty() => token = Some(v.to_string()),
                _ => {}
            }
        }
    }
    Some(ConnectTarget { session_id: SessionId::new(session_id), user_id, token })
}

/// WebSocket listener for client connections.
pub struct Listener {
    tcp: TcpListener,
    ctx: Arc<ListenCtx>,
}

impl Listener {
    pub fn new(tcp: TcpListener, ctx: Arc<ListenCtx>) -> Self {
        Self { tcp, ctx }
    }

    /// Accept loop; spawns one task per connection until shutdown.
    pub async fn run(self) {
        loop {
            let accepted = tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                accepted = self.tcp.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer)) => {
                    let ctx = Arc::clone(&self.ctx);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &ctx).await {
                            debug!(%peer, error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => warn!("accept error: {}", e),
            }
        }
        info!("listener stopped");
    }
}

async fn handle_connection(stream: TcpStream, ctx: &Arc<ListenCtx>) -> Result<(), ConnectionError> {
    // Capture the request path during the handshake
    let mut target: Option<ConnectTarget> = None;
    let expected_token = ctx.auth_token.clone();
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default();
        let Some(parsed) = parse_target(&path) else {
            return Err(ErrorResponse::new(Some("expected /session/<id>".to_string())));
        };
        if let Some(expected) = &expected_token {
            if parsed.token.as_deref() != Some(expected.as_str()) {
                return Err(ErrorResponse::new(Some("bad token".to_string())));
            }
        }
        target = Some(parsed);
        Ok(response)
    };

    let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let Some(target) = target else {
        return Err(ConnectionError::Handshake);
    };

    let hub = ctx
        .registry
        .get_or_create(&target.session_id)
        .await
        .map_err(|_| ConnectionError::UnknownSession(target.session_id.clone()))?;

    serve_client(ws, hub, target.user_id).await;
    Ok(())
}

async fn serve_client(
    ws: tokio_tungstenite::WebSocketStream<TcpStream>,
    hub: Arc<SessionHub>,
    user_id: Option<String>,
) {
    let (mut sink, mut source) = ws.split();
    let (connection_id, mut outbound) = hub.add_client(user_id);

    // Writer: per-socket ordering is the enqueue order; slow sockets never
    // backpressure other clients.
    let writer = tokio::spawn(async move {
        while let Some(out) = outbound.recv().await {
            let result = match out {
                Outbound::Frame(text) => sink.send(WsMessage::text(text)).await,
                Outbound::Close(code) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "gateway terminating".into(),
                    };
                    let _ = sink.send(WsMessage::Close(Some(frame))).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    // Reader: dispatch frames until the socket closes
    while let Some(message) = source.next().await {
        match message {
            Ok(WsMessage::Text(text)) => match decode_command(&text) {
                Ok(command) => hub.handle_client_message(&connection_id, command).await,
                Err(e) => {
                    debug!(connection_id = %connection_id, error = %e, "bad client frame");
                    hub.send_to(
                        &connection_id,
                        &ServerMessage::Error { message: "unrecognized message".to_string() },
                    );
                }
            },
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
            Ok(_) => {} // Binary frames are not part of the protocol
        }
    }

    hub.remove_client(&connection_id);
    writer.abort();
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
