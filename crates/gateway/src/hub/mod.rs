// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-session hub.
//!
//! One hub per session id per process. It owns the client connection set,
//! the runtime, the event processor, the migration controller, and two
//! timers (owner-lease renewal, idle snapshot). Everything that can touch a
//! hub concurrently (client messages, upstream events, the lease ticker,
//! the idle timer, the orphan sweeper, the expiry worker) goes through the
//! short-lock/await-outside discipline here.

pub mod ports;
pub mod registry;

pub use ports::HubPort;
pub use registry::{HubRegistry, RegistryError, RegistryExpiryHandler};

use crate::deps::{Deps, SessionEvent};
use crate::events::EventProcessor;
use crate::git;
use crate::leases::{LeaseError, Leases};
use crate::migration::{MigrationController, MigrationState};
use crate::runtime::{EnsureOpts, Ready, RuntimeError, SessionRuntime};
use crate::telemetry::TelemetryAccumulator;
use crate::upstream::{DisconnectReason, PromptImage, PromptPayload, StreamFrame};
use harbor_core::{
    ClientType, ConnectionId, SessionId, SessionPatch, SessionRecord, SessionStatus,
};
use harbor_wire::{encode_server, ClientCommand, ImageSource, Message, ServerMessage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Close code sent when the hub terminates itself (split-brain, shutdown).
pub const GOING_AWAY: u16 = 1001;

/// Frame or control message to one client socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(String),
    Close(u16),
}

struct ClientConn {
    user_id: Option<String>,
    tx: mpsc::UnboundedSender<Outbound>,
}

/// Session attributes that never change over a hub's lifetime.
#[derive(Debug, Clone)]
struct SessionMeta {
    created_by: Option<String>,
    client_type: Option<ClientType>,
}

struct TimerTask {
    handle: tokio::task::JoinHandle<()>,
}

impl TimerTask {
    fn cancel(self) {
        self.handle.abort();
    }
}

#[derive(Default)]
struct ReconnectState {
    attempt: usize,
    task: Option<TimerTask>,
}

type EvictCallback = Box<dyn Fn(&SessionId) + Send + Sync>;

/// Per-session hub. Always lives behind an `Arc`.
pub struct SessionHub {
    session_id: SessionId,
    meta: SessionMeta,
    deps: Arc<Deps>,
    leases: Leases,
    runtime: Arc<SessionRuntime>,
    migration: Arc<MigrationController>,
    telemetry: Arc<TelemetryAccumulator>,
    processor: Mutex<EventProcessor>,
    clients: Mutex<HashMap<ConnectionId, ClientConn>>,
    external_tools: AtomicU32,
    owner_held: AtomicBool,
    last_renew: Mutex<Instant>,
    lease_task: Mutex<Option<TimerTask>>,
    idle_task: Mutex<Option<TimerTask>>,
    reconnect: Mutex<ReconnectState>,
    evicted: AtomicBool,
    evict_cb: EvictCallback,
}

impl SessionHub {
    pub fn new(
        record: &SessionRecord,
        deps: Arc<Deps>,
        runtime: Arc<SessionRuntime>,
        migration: Arc<MigrationController>,
        telemetry: Arc<TelemetryAccumulator>,
        evict_cb: EvictCallback,
    ) -> Arc<Self> {
        let now = deps.clock.now();
        let hub = Arc::new(Self {
            session_id: record.session_id.clone(),
            meta: SessionMeta {
                created_by: record.created_by.clone(),
                client_type: record.client_type,
            },
            leases: deps.leases(),
            deps,
            runtime,
            migration,
            telemetry,
            processor: Mutex::new(EventProcessor::new()),
            clients: Mutex::new(HashMap::new()),
            external_tools: AtomicU32::new(0),
            owner_held: AtomicBool::new(false),
            last_renew: Mutex::new(now),
            lease_task: Mutex::new(None),
            idle_task: Mutex::new(None),
            reconnect: Mutex::new(ReconnectState::default()),
            evicted: AtomicBool::new(false),
            evict_cb,
        });
        hub.start_pump();
        hub
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn runtime(&self) -> &Arc<SessionRuntime> {
        &self.runtime
    }

    pub fn migration(&self) -> &Arc<MigrationController> {
        &self.migration
    }

    pub fn is_headless(&self) -> bool {
        self.meta.client_type.is_some_and(|c| c.is_headless())
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::SeqCst)
    }

    fn as_port(self: &Arc<Self>) -> Arc<dyn HubPort> {
        self.clone()
    }

    // ---- stream pump -----------------------------------------------------

    fn start_pump(self: &Arc<Self>) {
        let Some(mut rx) = self.runtime.take_frame_rx() else {
            return;
        };
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let Some(hub) = weak.upgrade() else { break };
                hub.handle_frame(frame).await;
            }
        });
    }

    async fn handle_frame(self: &Arc<Self>, frame: StreamFrame) {
        match frame {
            StreamFrame::Event(event) => {
                let frames = self.processor.lock().handle(event);
                for frame in &frames {
                    self.observe_outbound(frame);
                    self.broadcast(frame);
                }
            }
            StreamFrame::Disconnected(reason) => self.on_stream_disconnect(reason),
        }
    }

    /// Telemetry taps on the outbound protocol.
    fn observe_outbound(&self, frame: &ServerMessage) {
        match frame {
            ServerMessage::ToolStart { tool_call_id, .. } => {
                self.telemetry.record_tool_call(tool_call_id.clone());
            }
            ServerMessage::TextPartComplete { text, .. } => {
                self.telemetry.record_pr_urls_from_text(text);
            }
            ServerMessage::MessageComplete { .. } => {
                self.telemetry.record_message_exchanged();
            }
            _ => {}
        }
    }

    // ---- reconnect policy ------------------------------------------------

    fn on_stream_disconnect(self: &Arc<Self>, reason: DisconnectReason) {
        if reason == DisconnectReason::Requested || self.is_evicted() {
            return;
        }
        tracing::warn!(session_id = %self.session_id, reason = %reason, "event stream lost");
        // Headless sessions are a perpetual client
        if self.client_count() > 0 || self.is_headless() {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let delays = &self.deps.config.reconnect_delays;
        let mut state = self.reconnect.lock();
        if state.task.is_some() {
            return;
        }
        let delay = delays[state.attempt.min(delays.len() - 1)];
        tracing::info!(
            session_id = %self.session_id,
            attempt = state.attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling stream reconnect"
        );
        let weak = Arc::downgrade(self);
        state.task = Some(TimerTask {
            handle: tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let Some(hub) = weak.upgrade() else { return };
                hub.reconnect.lock().task = None;
                if hub.is_evicted() {
                    return;
                }
                match hub.ensure_ready(EnsureOpts::auto_reconnect()).await {
                    Ok(_) => hub.reconnect.lock().attempt = 0,
                    Err(e) => {
                        tracing::warn!(session_id = %hub.session_id, error = %e, "reconnect failed");
                        hub.reconnect.lock().attempt += 1;
                        hub.schedule_reconnect();
                    }
                }
            }),
        });
    }

    fn cancel_reconnect(&self) {
        let mut state = self.reconnect.lock();
        if let Some(task) = state.task.take() {
            task.cancel();
        }
    }

    // ---- client set ------------------------------------------------------

    /// Attach a socket. Returns the connection id and the outbound stream.
    pub fn add_client(
        self: &Arc<Self>,
        user_id: Option<String>,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<Outbound>) {
        let connection_id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.touch_activity();
        self.clients.lock().insert(connection_id, ClientConn { user_id, tx });
        tracing::info!(
            session_id = %self.session_id,
            connection_id = %connection_id,
            clients = self.client_count(),
            "client connected"
        );

        let hub = self.clone();
        tokio::spawn(async move { hub.init_client(connection_id).await });
        (connection_id, rx)
    }

    /// Bring the runtime up and replay state for a fresh connection.
    async fn init_client(self: &Arc<Self>, connection_id: ConnectionId) {
        self.broadcast(&ServerMessage::status(SessionStatus::Resuming));
        match self.ensure_ready(EnsureOpts::connect()).await {
            Ok(ready) => {
                let messages = match self
                    .deps
                    .agent
                    .list_messages(&ready.tunnel_url, &ready.agent_session_id)
                    .await
                {
                    Ok(messages) => messages,
                    Err(e) => {
                        tracing::warn!(session_id = %self.session_id, error = %e, "history replay failed");
                        Vec::new()
                    }
                };
                self.send_to(
                    &connection_id,
                    &ServerMessage::Init {
                        messages,
                        preview_tunnel_url: self.runtime.preview_url(),
                    },
                );
                self.send_to(&connection_id, &ServerMessage::status(SessionStatus::Running));
            }
            Err(RuntimeError::BillingDenied(_)) => {
                // Already surfaced as a status=error broadcast
            }
            Err(RuntimeError::Lease(e)) => {
                tracing::info!(session_id = %self.session_id, error = %e, "init while session busy");
                self.send_to(&connection_id, &ServerMessage::status(SessionStatus::Migrating));
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "client init failed");
                self.send_to(
                    &connection_id,
                    &ServerMessage::Status {
                        status: SessionStatus::Error,
                        message: Some(e.to_string()),
                    },
                );
            }
        }
    }

    /// Detach a socket. Arms the idle-snapshot timer when the last client
    /// leaves a non-headless session.
    pub fn remove_client(self: &Arc<Self>, connection_id: &ConnectionId) {
        let empty = {
            let mut clients = self.clients.lock();
            clients.remove(connection_id);
            clients.is_empty()
        };
        tracing::info!(
            session_id = %self.session_id,
            connection_id = %connection_id,
            clients = self.client_count(),
            "client disconnected"
        );
        if empty && !self.is_headless() && !self.is_evicted() {
            self.arm_idle_timer();
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    pub(crate) fn send_to(&self, connection_id: &ConnectionId, frame: &ServerMessage) {
        let encoded = match encode_server(frame) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(error = %e, "frame encode failed");
                return;
            }
        };
        if let Some(conn) = self.clients.lock().get(connection_id) {
            let _ = conn.tx.send(Outbound::Frame(encoded));
        }
    }

    // ---- timers ----------------------------------------------------------

    /// Activity cancels a pending idle snapshot.
    pub fn touch_activity(&self) {
        if let Some(task) = self.idle_task.lock().take() {
            task.cancel();
        }
    }

    fn arm_idle_timer(self: &Arc<Self>) {
        let delay = self.deps.config.idle_delay;
        let weak = Arc::downgrade(self);
        let task = TimerTask {
            handle: tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let Some(hub) = weak.upgrade() else { return };
                hub.idle_task.lock().take();
                hub.idle_fire().await;
            }),
        };
        if let Some(previous) = self.idle_task.lock().replace(task) {
            previous.cancel();
        }
    }

    /// The idle timer fired: snapshot if still quiescent.
    pub async fn idle_fire(self: &Arc<Self>) {
        if !self.should_idle_snapshot() {
            return;
        }
        self.cancel_reconnect();
        self.migration.run_idle_snapshot(&self.as_port()).await;
    }

    /// No clients, no in-flight external tools, no running in-stream tools,
    /// and not headless.
    pub fn should_idle_snapshot(&self) -> bool {
        self.client_count() == 0
            && self.external_tools.load(Ordering::SeqCst) == 0
            && !self.processor.lock().has_running_tools()
            && !self.is_headless()
    }

    fn start_lease_ticker(self: &Arc<Self>) {
        let mut guard = self.lease_task.lock();
        if guard.is_some() {
            return;
        }
        let period = self.deps.config.owner_lease_ttl / 3;
        let weak = Arc::downgrade(self);
        *guard = Some(TimerTask {
            handle: tokio::spawn(async move {
                loop {
                    tokio::time::sleep(period).await;
                    let Some(hub) = weak.upgrade() else { break };
                    if !hub.lease_tick().await {
                        break;
                    }
                }
            }),
        });
    }

    /// One lease-renewal tick. Returns false when the hub terminated.
    pub(crate) async fn lease_tick(self: &Arc<Self>) -> bool {
        let now = self.deps.clock.now();
        let last = *self.last_renew.lock();
        // A tick arriving later than the full TTL means the event loop was
        // wedged long enough for the lease to lapse: assume split-brain.
        if now.duration_since(last) > self.deps.config.owner_lease_ttl {
            tracing::error!(
                session_id = %self.session_id,
                lag_ms = now.duration_since(last).as_millis() as u64,
                "lease renewal lag exceeded TTL, self-terminating"
            );
            self.self_terminate().await;
            return false;
        }
        match self
            .leases
            .renew_owner_lease(&self.session_id, &self.deps.instance_id)
            .await
        {
            Ok(()) => {
                *self.last_renew.lock() = now;
                if let Err(e) = self.leases.set_runtime_lease(&self.session_id).await {
                    tracing::warn!(session_id = %self.session_id, error = %e, "runtime lease refresh failed");
                }
                true
            }
            Err(LeaseError::NotHeld) => {
                tracing::error!(
                    session_id = %self.session_id,
                    "owner lease lost to another instance, self-terminating"
                );
                self.self_terminate().await;
                false
            }
            Err(e) => {
                // Store unreachable: retry next tick
                tracing::warn!(session_id = %self.session_id, error = %e, "lease renewal unavailable");
                true
            }
        }
    }

    // ---- runtime entry ---------------------------------------------------

    /// Hub-level runtime bring-up: owner lease first, then the runtime.
    pub async fn ensure_ready(self: &Arc<Self>, opts: EnsureOpts) -> Result<Ready, RuntimeError> {
        self.ensure_owner().await?;
        let ready = self.runtime.ensure_runtime_ready(self.as_port(), opts).await?;
        self.telemetry.mark_running();
        if let Err(e) = self.leases.set_runtime_lease(&self.session_id).await {
            tracing::warn!(session_id = %self.session_id, error = %e, "runtime lease set failed");
        }
        Ok(ready)
    }

    async fn ensure_owner(self: &Arc<Self>) -> Result<(), RuntimeError> {
        if self.owner_held.load(Ordering::SeqCst) {
            return Ok(());
        }
        match self
            .leases
            .acquire_owner_lease(&self.session_id, &self.deps.instance_id)
            .await
        {
            Ok(true) => {
                self.owner_held.store(true, Ordering::SeqCst);
                *self.last_renew.lock() = self.deps.clock.now();
                self.start_lease_ticker();
                Ok(())
            }
            Ok(false) => {
                tracing::error!(
                    session_id = %self.session_id,
                    "owner lease held by another instance, self-terminating"
                );
                self.self_terminate().await;
                Err(RuntimeError::Lease("owner lease held elsewhere".to_string()))
            }
            Err(e) => Err(RuntimeError::Lease(e.to_string())),
        }
    }

    // ---- tool-call tracking (HTTP hook) ----------------------------------

    /// An externally executed tool call started; gates idle snapshotting.
    pub fn track_tool_call_start(&self) {
        self.external_tools.fetch_add(1, Ordering::SeqCst);
        self.touch_activity();
    }

    pub fn track_tool_call_end(&self) {
        let _ = self
            .external_tools
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(1)));
    }

    // ---- dispatch --------------------------------------------------------

    /// Handle one inbound client frame.
    pub async fn handle_client_message(
        self: &Arc<Self>,
        connection_id: &ConnectionId,
        command: ClientCommand,
    ) {
        let user_id = self
            .clients
            .lock()
            .get(connection_id)
            .and_then(|c| c.user_id.clone());

        // Mutations require a logged-in user
        if command.is_mutation() && user_id.is_none() {
            self.send_to(
                connection_id,
                &ServerMessage::Error { message: "authentication required".to_string() },
            );
            return;
        }
        // Git writes additionally require the session creator
        if command.is_git_write() {
            if let Some(creator) = &self.meta.created_by {
                if user_id.as_deref() != Some(creator.as_str()) {
                    self.send_to(
                        connection_id,
                        &ServerMessage::Error {
                            message: "only the session creator can run git commands".to_string(),
                        },
                    );
                    return;
                }
            }
        }

        match command {
            ClientCommand::Ping => self.send_to(connection_id, &ServerMessage::Pong),
            ClientCommand::Prompt { content, images, user_id: _ } => {
                // A client-supplied user id is ignored; the authenticated one wins
                self.handle_prompt(connection_id, user_id, content, images.unwrap_or_default())
                    .await;
            }
            ClientCommand::Cancel => self.handle_cancel(connection_id).await,
            ClientCommand::GetStatus => {
                let status = match self.deps.sessions.get(&self.session_id).await {
                    Ok(Some(row)) => row.status,
                    _ => SessionStatus::Error,
                };
                self.send_to(connection_id, &ServerMessage::status(status));
            }
            ClientCommand::GetMessages => self.handle_get_messages(connection_id).await,
            ClientCommand::SaveSnapshot { message } => {
                self.handle_save_snapshot(connection_id, message).await;
            }
            ClientCommand::RunAutoStart { run_id, commands } => {
                self.handle_run_auto_start(connection_id, run_id, commands).await;
            }
            ClientCommand::GetGitStatus { workspace_path } => {
                self.handle_git(connection_id, git::GitCommand::Status { workspace_path }).await;
            }
            ClientCommand::GitCreateBranch { branch_name, workspace_path } => {
                self.handle_git(
                    connection_id,
                    git::GitCommand::CreateBranch { branch_name, workspace_path },
                )
                .await;
            }
            ClientCommand::GitCommit { message, include_untracked, files, workspace_path } => {
                self.handle_git(
                    connection_id,
                    git::GitCommand::Commit { message, include_untracked, files, workspace_path },
                )
                .await;
            }
            ClientCommand::GitPush { workspace_path } => {
                self.handle_git(connection_id, git::GitCommand::Push { workspace_path }).await;
            }
            ClientCommand::GitCreatePr { title, body, base_branch, workspace_path } => {
                self.handle_git(
                    connection_id,
                    git::GitCommand::CreatePr { title, body, base_branch, workspace_path },
                )
                .await;
            }
        }
    }

    async fn handle_prompt(
        self: &Arc<Self>,
        connection_id: &ConnectionId,
        user_id: Option<String>,
        content: String,
        image_uris: Vec<String>,
    ) {
        if self.migration.state() != MigrationState::Normal {
            tracing::info!(session_id = %self.session_id, "dropping prompt during migration");
            return;
        }

        let ready = match self.ensure_ready(EnsureOpts::prompt()).await {
            Ok(ready) => ready,
            Err(e) => {
                self.send_to(connection_id, &ServerMessage::Error { message: e.to_string() });
                return;
            }
        };

        // Decode images up front so a bad frame fails before any broadcast
        let mut images = Vec::with_capacity(image_uris.len());
        for uri in &image_uris {
            match ImageSource::from_data_uri(uri) {
                Ok(image) => {
                    images.push(PromptImage { mime: image.mime, data_uri: uri.clone() });
                }
                Err(_) => {
                    self.send_to(
                        connection_id,
                        &ServerMessage::Error { message: "invalid image data uri".to_string() },
                    );
                    return;
                }
            }
        }

        let message = Message {
            id: format!("msg-{}", nanoid::nanoid!(19)),
            role: harbor_wire::MessageRole::User,
            content: content.clone(),
            user_id: user_id.clone(),
        };
        self.broadcast(&ServerMessage::Message { message });

        if self.meta.client_type.is_some() {
            self.deps.events.publish(SessionEvent::UserMessage {
                session_id: self.session_id.clone(),
                user_id,
            });
        }

        self.telemetry.record_message_exchanged();
        self.telemetry
            .record_latest_task(content.chars().take(120).collect::<String>());
        self.processor.lock().reset_for_new_prompt();

        if let Err(e) = self
            .deps
            .agent
            .prompt_async(
                &ready.tunnel_url,
                &ready.agent_session_id,
                PromptPayload { text: content, images },
            )
            .await
        {
            tracing::warn!(session_id = %self.session_id, error = %e, "prompt dispatch failed");
            self.send_to(connection_id, &ServerMessage::Error { message: e.to_string() });
        }
    }

    async fn handle_cancel(self: &Arc<Self>, connection_id: &ConnectionId) {
        let ready = match self.ensure_ready(EnsureOpts::command()).await {
            Ok(ready) => ready,
            Err(e) => {
                self.send_to(connection_id, &ServerMessage::Error { message: e.to_string() });
                return;
            }
        };
        if let Err(e) = self.deps.agent.abort(&ready.tunnel_url, &ready.agent_session_id).await {
            tracing::debug!(session_id = %self.session_id, error = %e, "abort failed");
        }
        let message_id = self.processor.lock().clear_current_assistant_message();
        self.broadcast(&ServerMessage::MessageCancelled { message_id });
    }

    async fn handle_get_messages(self: &Arc<Self>, connection_id: &ConnectionId) {
        let ready = match self.ensure_ready(EnsureOpts::command()).await {
            Ok(ready) => ready,
            Err(e) => {
                self.send_to(connection_id, &ServerMessage::Error { message: e.to_string() });
                return;
            }
        };
        let messages = self
            .deps
            .agent
            .list_messages(&ready.tunnel_url, &ready.agent_session_id)
            .await
            .unwrap_or_default();
        self.send_to(
            connection_id,
            &ServerMessage::Init { messages, preview_tunnel_url: self.runtime.preview_url() },
        );
    }

    async fn handle_save_snapshot(
        self: &Arc<Self>,
        connection_id: &ConnectionId,
        label: Option<String>,
    ) {
        let result = self.save_snapshot(label).await;
        let frame = match result {
            Ok(snapshot_id) => ServerMessage::SnapshotResult {
                ok: true,
                snapshot_id: Some(snapshot_id),
                error: None,
            },
            Err(message) => {
                ServerMessage::SnapshotResult { ok: false, snapshot_id: None, error: Some(message) }
            }
        };
        self.send_to(connection_id, &frame);
    }

    async fn save_snapshot(self: &Arc<Self>, label: Option<String>) -> Result<String, String> {
        self.ensure_ready(EnsureOpts::command()).await.map_err(|e| e.to_string())?;
        let (provider, sandbox_id) = self.provider_and_sandbox().await?;
        let snapshot_id = provider
            .snapshot(&sandbox_id, label.as_deref())
            .await
            .map_err(|e| e.to_string())?;
        self.deps
            .sessions
            .update(
                &self.session_id,
                SessionPatch {
                    snapshot_id: Some(Some(snapshot_id.clone())),
                    ..SessionPatch::default()
                },
            )
            .await
            .map_err(|e| e.to_string())?;
        Ok(snapshot_id)
    }

    async fn handle_run_auto_start(
        self: &Arc<Self>,
        connection_id: &ConnectionId,
        run_id: String,
        commands: Option<Vec<String>>,
    ) {
        if let Err(e) = self.ensure_ready(EnsureOpts::command()).await {
            self.send_to(connection_id, &ServerMessage::Error { message: e.to_string() });
            return;
        }
        let (provider, sandbox_id) = match self.provider_and_sandbox().await {
            Ok(pair) => pair,
            Err(message) => {
                self.send_to(connection_id, &ServerMessage::Error { message });
                return;
            }
        };
        if !provider.supports_exec() {
            self.send_to(
                connection_id,
                &ServerMessage::Error {
                    message: "provider does not support command execution".to_string(),
                },
            );
            return;
        }

        let commands = match commands {
            Some(commands) => commands,
            None => match self.deps.contexts.load(&self.session_id).await {
                Ok(context) => {
                    context.service_commands.into_iter().map(|c| c.command).collect()
                }
                Err(e) => {
                    self.send_to(connection_id, &ServerMessage::Error { message: e.to_string() });
                    return;
                }
            },
        };

        for command in commands {
            let frame = match provider
                .exec_command(&sandbox_id, &command, Some(&self.deps.config.workspace_dir))
                .await
            {
                Ok(output) => ServerMessage::AutoStartOutput {
                    run_id: run_id.clone(),
                    command,
                    output: format!("{}{}", output.stdout, output.stderr),
                    exit_code: output.exit_code,
                },
                Err(e) => ServerMessage::AutoStartOutput {
                    run_id: run_id.clone(),
                    command,
                    output: e.to_string(),
                    exit_code: -1,
                },
            };
            self.send_to(connection_id, &frame);
        }
    }

    async fn handle_git(self: &Arc<Self>, connection_id: &ConnectionId, command: git::GitCommand) {
        if let Err(e) = self.ensure_ready(EnsureOpts::command()).await {
            self.send_to(connection_id, &ServerMessage::Error { message: e.to_string() });
            return;
        }
        let (provider, sandbox_id) = match self.provider_and_sandbox().await {
            Ok(pair) => pair,
            Err(message) => {
                self.send_to(connection_id, &ServerMessage::Error { message });
                return;
            }
        };
        let frame =
            git::run(provider.as_ref(), &sandbox_id, &self.deps.config.workspace_dir, command)
                .await;
        self.send_to(connection_id, &frame);
    }

    async fn provider_and_sandbox(
        &self,
    ) -> Result<(Arc<dyn harbor_adapters::SandboxProvider>, String), String> {
        let row = self
            .deps
            .sessions
            .get(&self.session_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("session not found: {}", self.session_id))?;
        let provider = self
            .deps
            .providers
            .get(&row.sandbox_provider)
            .ok_or_else(|| format!("unknown provider: {}", row.sandbox_provider))?;
        let sandbox_id = self
            .runtime
            .sandbox_id()
            .or(row.sandbox_id)
            .ok_or_else(|| "session has no sandbox".to_string())?;
        Ok((provider, sandbox_id))
    }

    // ---- expiry ----------------------------------------------------------

    /// Entry point for the expiry worker.
    pub async fn run_expiry_migration(self: &Arc<Self>) {
        self.migration.run_expiry_migration(&self.as_port()).await;
    }

    // ---- termination -----------------------------------------------------

    /// Stop everything and leave the registry. Used for split-brain and
    /// forced shutdown; clients are closed with code 1001.
    pub async fn self_terminate(&self) {
        if self.evicted.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::warn!(session_id = %self.session_id, "hub self-terminating");
        self.stop_timers();
        self.migration.stop();

        let clients: Vec<ClientConn> = self.clients.lock().drain().map(|(_, c)| c).collect();
        for conn in clients {
            let _ = conn.tx.send(Outbound::Close(GOING_AWAY));
        }

        self.runtime.disconnect_stream();
        let _ = self
            .leases
            .release_owner_lease(&self.session_id, &self.deps.instance_id)
            .await;
        let _ = self.leases.clear_runtime_lease(&self.session_id).await;
        (self.evict_cb)(&self.session_id);
    }

    /// Graceful-shutdown path: flush telemetry and hand the session to the
    /// next replica by releasing every lease.
    pub async fn release_leases(&self) {
        self.flush_telemetry().await;
        self.stop_timers();
        self.migration.stop();
        let _ = self
            .leases
            .release_owner_lease(&self.session_id, &self.deps.instance_id)
            .await;
        let _ = self.leases.clear_runtime_lease(&self.session_id).await;
    }

    pub async fn flush_telemetry(&self) {
        if !self.telemetry.is_dirty() {
            return;
        }
        let sessions = self.deps.sessions.clone();
        let session_id = self.session_id.clone();
        let result = self
            .telemetry
            .flush(move |snap| {
                let sessions = sessions.clone();
                let session_id = session_id.clone();
                async move {
                    let metrics = serde_json::json!({
                        "toolCalls": snap.tool_calls,
                        "messagesExchanged": snap.messages_exchanged,
                        "activeMs": snap.active_ms,
                    });
                    sessions
                        .update(
                            &session_id,
                            SessionPatch {
                                metrics: Some(metrics),
                                pr_urls: Some(snap.pr_urls.clone()),
                                latest_task: snap.latest_task.clone().map(Some),
                                ..SessionPatch::default()
                            },
                        )
                        .await
                        .map(|_| ())
                }
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(session_id = %self.session_id, error = %e, "telemetry flush failed");
        }
    }

    fn stop_timers(&self) {
        if let Some(task) = self.lease_task.lock().take() {
            task.cancel();
        }
        if let Some(task) = self.idle_task.lock().take() {
            task.cancel();
        }
        self.cancel_reconnect();
    }
}

impl HubPort for SessionHub {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn broadcast(&self, frame: &ServerMessage) {
        let encoded = match encode_server(frame) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(error = %e, "frame encode failed");
                return;
            }
        };
        for conn in self.clients.lock().values() {
            let _ = conn.tx.send(Outbound::Frame(encoded.clone()));
        }
    }

    fn emit_status(&self, status: SessionStatus, message: Option<String>) {
        self.broadcast(&ServerMessage::Status { status, message });
    }

    fn client_count(&self) -> usize {
        SessionHub::client_count(self)
    }

    fn effective_client_count(&self) -> usize {
        let count = self.client_count();
        if count == 0 && self.is_headless() {
            1
        } else {
            count
        }
    }

    fn bind_agent_session(&self, agent_session_id: &str) {
        self.processor.lock().bind_agent_session(agent_session_id);
    }

    fn clear_current_assistant_message(&self) -> Option<String> {
        self.processor.lock().clear_current_assistant_message()
    }

    fn assistant_in_flight(&self) -> bool {
        self.processor.lock().assistant_in_flight()
    }

    fn has_running_tools(&self) -> bool {
        self.processor.lock().has_running_tools()
    }

    fn external_tool_count(&self) -> u32 {
        self.external_tools.load(Ordering::SeqCst)
    }

    fn signal_evict(&self) {
        if self.evicted.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_timers();
        (self.evict_cb)(&self.session_id);
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
