// Scripted capture and transport collaborators for session manager tests.
//
// Each stream and transport handed to the manager shares a probe with the
// test, which uses it to drive events (transport open/close, chunks) and to
// observe which resources were released.

#![allow(dead_code)]

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tabcast::capture::{CaptureBackend, CaptureStream, ChunkProducer, StreamSettings};
use tabcast::session::{ChunkSink, ManagerConfig, ManagerHandle, SessionManager, TransportEvents};
use tabcast::{ConnectionState, TabId, TabInfo, Transport, TransportConnector};
use tokio::sync::Notify;

// ============================================================================
// Capture
// ============================================================================

#[derive(Debug, Clone)]
pub enum CaptureBehavior {
    Grant,
    Decline,
    Fail(String),
}

#[derive(Default)]
pub struct StreamProbe {
    pub tracks_stopped: AtomicBool,
    pub producer_active: AtomicBool,
    pub producer_stopped: AtomicBool,
    pub sink: Mutex<Option<ChunkSink>>,
}

impl StreamProbe {
    /// Emit a chunk as the producer would
    pub fn emit(&self, bytes: Vec<u8>) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.emit(bytes),
            None => false,
        }
    }

    pub fn tracks_stopped(&self) -> bool {
        self.tracks_stopped.load(Ordering::SeqCst)
    }

    pub fn producer_stopped(&self) -> bool {
        self.producer_stopped.load(Ordering::SeqCst)
    }
}

pub struct ScriptedBackend {
    behavior: Mutex<CaptureBehavior>,
    gate: Mutex<Option<Arc<Notify>>>,
    probes: Mutex<HashMap<TabId, Vec<Arc<StreamProbe>>>>,
    pub captures: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            behavior: Mutex::new(CaptureBehavior::Grant),
            gate: Mutex::new(None),
            probes: Mutex::new(HashMap::new()),
            captures: AtomicUsize::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: CaptureBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Hold every following capture until the returned gate is notified
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Latest stream handed out for a tab
    pub fn probe(&self, tab_id: TabId) -> Option<Arc<StreamProbe>> {
        self.probes
            .lock()
            .unwrap()
            .get(&tab_id)
            .and_then(|probes| probes.last().cloned())
    }

    pub fn probes(&self, tab_id: TabId) -> Vec<Arc<StreamProbe>> {
        self.probes
            .lock()
            .unwrap()
            .get(&tab_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl CaptureBackend for ScriptedBackend {
    async fn capture(&self, tab: &TabInfo) -> Result<Option<Box<dyn CaptureStream>>> {
        self.captures.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            CaptureBehavior::Grant => {
                let probe = Arc::new(StreamProbe::default());
                self.probes
                    .lock()
                    .unwrap()
                    .entry(tab.id)
                    .or_default()
                    .push(Arc::clone(&probe));
                Ok(Some(Box::new(ScriptedStream { probe })))
            }
            CaptureBehavior::Decline => Ok(None),
            CaptureBehavior::Fail(reason) => bail!(reason),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedStream {
    probe: Arc<StreamProbe>,
}

impl CaptureStream for ScriptedStream {
    fn settings(&self) -> StreamSettings {
        StreamSettings {
            sample_rate: Some(44100),
            channel_count: None,
        }
    }

    fn create_producer(&self) -> Result<Box<dyn ChunkProducer>> {
        Ok(Box::new(ScriptedProducer {
            probe: Arc::clone(&self.probe),
        }))
    }

    fn stop_tracks(&mut self) -> Result<()> {
        self.probe.tracks_stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedProducer {
    probe: Arc<StreamProbe>,
}

impl ChunkProducer for ScriptedProducer {
    fn mime_type(&self) -> String {
        "audio/test".to_string()
    }

    fn is_active(&self) -> bool {
        self.probe.producer_active.load(Ordering::SeqCst)
    }

    fn start(&mut self, _timeslice: Duration, sink: ChunkSink) -> Result<()> {
        *self.probe.sink.lock().unwrap() = Some(sink);
        self.probe.producer_active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.probe.producer_active.store(false, Ordering::SeqCst);
        self.probe.producer_stopped.store(true, Ordering::SeqCst);
        *self.probe.sink.lock().unwrap() = None;
        Ok(())
    }
}

// ============================================================================
// Transport
// ============================================================================

pub struct TransportProbe {
    pub state: Mutex<ConnectionState>,
    pub events: TransportEvents,
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub closed: AtomicBool,
    pub fail_sends: AtomicBool,
}

impl TransportProbe {
    /// Handshake completes
    pub fn open(&self) {
        *self.state.lock().unwrap() = ConnectionState::Open;
        self.events.opened();
    }

    /// Peer closes the connection
    pub fn peer_close(&self) {
        *self.state.lock().unwrap() = ConnectionState::Closed;
        self.events.closed("peer went away");
    }

    pub fn error(&self) {
        *self.state.lock().unwrap() = ConnectionState::Error;
        self.events.errored("connection refused");
    }

    /// Change the state without reporting it
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn sent_sizes(&self) -> Vec<usize> {
        self.sent.lock().unwrap().iter().map(Vec::len).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct ScriptedConnector {
    pub refuse: AtomicBool,
    transports: Mutex<HashMap<TabId, Vec<Arc<TransportProbe>>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(&self, tab_id: TabId) -> Option<Arc<TransportProbe>> {
        self.transports
            .lock()
            .unwrap()
            .get(&tab_id)
            .and_then(|probes| probes.last().cloned())
    }

    pub fn opened(&self, tab_id: TabId) -> usize {
        self.transports
            .lock()
            .unwrap()
            .get(&tab_id)
            .map_or(0, Vec::len)
    }
}

impl TransportConnector for ScriptedConnector {
    fn open(&self, _endpoint: &str, events: TransportEvents) -> Result<Box<dyn Transport>> {
        if self.refuse.load(Ordering::SeqCst) {
            bail!("endpoint unreachable");
        }

        let tab_id = events.tab_id();
        let probe = Arc::new(TransportProbe {
            state: Mutex::new(ConnectionState::Connecting),
            events,
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        });
        self.transports
            .lock()
            .unwrap()
            .entry(tab_id)
            .or_default()
            .push(Arc::clone(&probe));

        Ok(Box::new(ScriptedTransport { probe }))
    }
}

struct ScriptedTransport {
    probe: Arc<TransportProbe>,
}

impl Transport for ScriptedTransport {
    fn state(&self) -> ConnectionState {
        *self.probe.state.lock().unwrap()
    }

    fn send(&mut self, chunk: Vec<u8>) -> Result<()> {
        if self.probe.fail_sends.load(Ordering::SeqCst) {
            bail!("socket buffer full");
        }
        self.probe.sent.lock().unwrap().push(chunk);
        Ok(())
    }

    fn close(&mut self) {
        self.probe.closed.store(true, Ordering::SeqCst);
        let mut state = self.probe.state.lock().unwrap();
        if matches!(*state, ConnectionState::Connecting | ConnectionState::Open) {
            *state = ConnectionState::Closed;
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub manager: ManagerHandle,
    pub backend: Arc<ScriptedBackend>,
    pub connector: Arc<ScriptedConnector>,
}

impl Harness {
    pub fn start() -> Self {
        Self::with_config(ManagerConfig {
            endpoint: "ws://sink.test".to_string(),
            ..ManagerConfig::default()
        })
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        let backend = Arc::new(ScriptedBackend::new());
        let connector = Arc::new(ScriptedConnector::new());
        let (manager, _task) = SessionManager::spawn(
            config,
            Arc::clone(&backend) as Arc<dyn CaptureBackend>,
            Arc::clone(&connector) as Arc<dyn TransportConnector>,
        );

        Self {
            manager,
            backend,
            connector,
        }
    }

    /// Wait until the manager has asked the connector for a transport
    pub async fn transport(&self, tab_id: TabId) -> Arc<TransportProbe> {
        let connector = Arc::clone(&self.connector);
        eventually(move || connector.probe(tab_id).is_some()).await;
        self.connector
            .probe(tab_id)
            .expect("transport should have been opened")
    }

    /// Start a tab and drive it to the active state
    pub async fn record(&self, tab_id: TabId, url: &str) -> (Arc<StreamProbe>, Arc<TransportProbe>) {
        let before = self.connector.opened(tab_id);
        self.manager
            .start_capture(TabInfo::new(tab_id, url).with_title(format!("Tab {}", tab_id)))
            .await
            .expect("start should be accepted");

        let connector = Arc::clone(&self.connector);
        eventually(move || connector.opened(tab_id) > before).await;

        let transport = self.connector.probe(tab_id).expect("transport");
        transport.open();
        self.sync().await;

        let stream = self.backend.probe(tab_id).expect("stream");
        (stream, transport)
    }

    /// Round-trip through the inbox so everything posted before has been applied
    pub async fn sync(&self) {
        self.manager
            .get_all_sessions()
            .await
            .expect("manager should be running");
    }
}

/// Poll `check` until it holds, failing the test after a while
pub async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
