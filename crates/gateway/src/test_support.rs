// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test world: every dependency faked, every clock controllable.

use crate::config::GatewayConfig;
use crate::deps::{Deps, ProviderRegistry, SessionEventBus};
use crate::hub::HubPort;
use crate::upstream::{FakeAgentApi, FakeStreamConnector};
use harbor_adapters::{FakeBillingGate, FakeNotifier, FakeSandboxProvider, StaticContextLoader};
use harbor_core::{
    FakeClock, InstanceId, SessionBuilder, SessionId, SessionRecord, SessionStatus,
};
use harbor_store::{MemoryDelayQueue, MemoryKv, MemorySessionStore, StaticBaseSnapshots};
use harbor_wire::ServerMessage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Fully faked dependency set.
pub struct TestWorld {
    pub clock: FakeClock,
    pub kv: MemoryKv,
    pub sessions: MemorySessionStore,
    pub queue: Arc<MemoryDelayQueue>,
    pub base_snapshots: StaticBaseSnapshots,
    pub provider: FakeSandboxProvider,
    pub contexts: StaticContextLoader,
    pub billing: FakeBillingGate,
    pub notifier: FakeNotifier,
    pub agent: FakeAgentApi,
    pub streams: FakeStreamConnector,
    pub deps: Arc<Deps>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::with_provider_and_config(FakeSandboxProvider::new(), GatewayConfig::default())
    }

    pub fn with_provider(provider: FakeSandboxProvider) -> Self {
        Self::with_provider_and_config(provider, GatewayConfig::default())
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        Self::with_provider_and_config(FakeSandboxProvider::new(), config)
    }

    pub fn with_provider_and_config(
        provider: FakeSandboxProvider,
        config: GatewayConfig,
    ) -> Self {
        let clock = FakeClock::new();
        clock.set_epoch_ms(1_000_000_000);
        let clock_arc: Arc<dyn harbor_core::Clock> = Arc::new(clock.clone());
        let kv = MemoryKv::new(clock_arc.clone());
        let sessions = MemorySessionStore::new(clock_arc.clone());
        let queue = Arc::new(MemoryDelayQueue::new());
        let base_snapshots = StaticBaseSnapshots::new();
        let contexts = StaticContextLoader::new();
        let billing = FakeBillingGate::new();
        let notifier = FakeNotifier::new();
        let agent = FakeAgentApi::new();
        let streams = FakeStreamConnector::new();

        let mut providers = ProviderRegistry::new();
        providers.register(Arc::new(provider.clone()));

        let deps = Arc::new(Deps {
            clock: clock_arc,
            config,
            instance_id: InstanceId::from_string("ins-test"),
            kv: Arc::new(kv.clone()),
            sessions: Arc::new(sessions.clone()),
            queue: queue.clone(),
            base_snapshots: Arc::new(base_snapshots.clone()),
            providers,
            contexts: Arc::new(contexts.clone()),
            billing: Arc::new(billing.clone()),
            notifier: Arc::new(notifier.clone()),
            agent: Arc::new(agent.clone()),
            streams: Arc::new(streams.clone()),
            events: SessionEventBus::new(),
        });

        Self {
            clock,
            kv,
            sessions,
            queue,
            base_snapshots,
            provider,
            contexts,
            billing,
            notifier,
            agent,
            streams,
            deps,
        }
    }

    /// Seed a creating-state session row and return its id.
    pub async fn seed_session(&self) -> SessionId {
        let record = SessionBuilder::new("ses-test").build();
        self.seed_record(record).await
    }

    pub async fn seed_record(&self, record: SessionRecord) -> SessionId {
        let id = record.session_id.clone();
        use harbor_store::SessionStore as _;
        self.sessions.insert(record).await.unwrap_or(());
        id
    }

    pub async fn session(&self, id: &SessionId) -> SessionRecord {
        use harbor_store::SessionStore as _;
        match self.sessions.get(id).await {
            Ok(Some(record)) => record,
            _ => unreachable!("session row missing"),
        }
    }

    /// A running session with a live sandbox, as after a successful ensure.
    pub fn running_record(&self, id: &str, sandbox: &str) -> SessionRecord {
        SessionBuilder::new(id)
            .status(SessionStatus::Running)
            .sandbox_id(sandbox)
            .tunnel_url(format!("http://{}.sandbox.local:8080", sandbox))
            .agent_session_id("agt-1")
            .build()
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Recording [`HubPort`] double for runtime/migration tests.
pub struct RecordingHub {
    session_id: SessionId,
    pub frames: Mutex<Vec<ServerMessage>>,
    pub clients: AtomicUsize,
    pub headless: AtomicBool,
    pub external_tools: AtomicU32,
    pub assistant_in_flight: AtomicBool,
    pub running_tools: AtomicBool,
    pub bound_agent_session: Mutex<Option<String>>,
    pub evicted: AtomicBool,
    pub cleared_message: Mutex<Option<String>>,
}

impl RecordingHub {
    pub fn new(session_id: SessionId) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            frames: Mutex::new(Vec::new()),
            clients: AtomicUsize::new(0),
            headless: AtomicBool::new(false),
            external_tools: AtomicU32::new(0),
            assistant_in_flight: AtomicBool::new(false),
            running_tools: AtomicBool::new(false),
            bound_agent_session: Mutex::new(None),
            evicted: AtomicBool::new(false),
            cleared_message: Mutex::new(None),
        })
    }

    pub fn statuses(&self) -> Vec<SessionStatus> {
        self.frames
            .lock()
            .iter()
            .filter_map(|f| match f {
                ServerMessage::Status { status, .. } => Some(*status),
                _ => None,
            })
            .collect()
    }
}

impl HubPort for RecordingHub {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn broadcast(&self, frame: &ServerMessage) {
        self.frames.lock().push(frame.clone());
    }

    fn emit_status(&self, status: SessionStatus, message: Option<String>) {
        self.frames.lock().push(ServerMessage::Status { status, message });
    }

    fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }

    fn effective_client_count(&self) -> usize {
        let count = self.client_count();
        if count == 0 && self.headless.load(Ordering::SeqCst) {
            1
        } else {
            count
        }
    }

    fn bind_agent_session(&self, agent_session_id: &str) {
        *self.bound_agent_session.lock() = Some(agent_session_id.to_string());
    }

    fn clear_current_assistant_message(&self) -> Option<String> {
        self.assistant_in_flight.store(false, Ordering::SeqCst);
        self.cleared_message.lock().take()
    }

    fn assistant_in_flight(&self) -> bool {
        self.assistant_in_flight.load(Ordering::SeqCst)
    }

    fn has_running_tools(&self) -> bool {
        self.running_tools.load(Ordering::SeqCst)
    }

    fn external_tool_count(&self) -> u32 {
        self.external_tools.load(Ordering::SeqCst)
    }

    fn signal_evict(&self) {
        self.evicted.store(true, Ordering::SeqCst);
    }
}
