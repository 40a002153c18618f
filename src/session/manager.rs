//! The session manager: a single task that owns the [`Registry`] and applies
//! every request and asynchronous completion in inbox order.

use super::broadcast::{StatusBroadcaster, Urgency};
use super::config::ManagerConfig;
use super::events::{AttemptId, Event, Inbox, TransportEvents};
use super::registry::Registry;
use super::session::RecordingSession;
use super::snapshot::{RegistrySnapshot, StartOutcome, StatusUpdate, TabState, TabStatus};
use super::stats::SessionStats;
use crate::capture::{CaptureBackend, CaptureStream};
use crate::error::CaptureError;
use crate::format::{format_bytes, format_duration};
use crate::normalize::{normalize, ResourceIdentity};
use crate::tab::{TabId, TabInfo};
use crate::transport::{ConnectionState, TransportConnector};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Why a live session is ending
#[derive(Debug)]
enum EndReason {
    Stopped,
    TabClosed,
    Replaced,
    Suspended,
    Failed(CaptureError),
}

pub struct SessionManager {
    config: ManagerConfig,
    backend: Arc<dyn CaptureBackend>,
    connector: Arc<dyn TransportConnector>,
    inbox: Inbox,
    receiver: mpsc::UnboundedReceiver<Event>,
    registry: Registry,
    /// Sessions still connecting, not yet committed to the registry
    setups: HashMap<TabId, RecordingSession>,
    broadcaster: StatusBroadcaster,
    next_attempt: AttemptId,
    /// Tab most recently reported as activated by the host
    focused_tab: Option<TabId>,
}

impl SessionManager {
    pub fn new(
        config: ManagerConfig,
        backend: Arc<dyn CaptureBackend>,
        connector: Arc<dyn TransportConnector>,
    ) -> (Self, ManagerHandle) {
        let (inbox, receiver) = mpsc::unbounded_channel();
        let broadcaster =
            StatusBroadcaster::new(config.broadcast_window, config.broadcast_capacity);

        let handle = ManagerHandle {
            inbox: inbox.clone(),
            updates: broadcaster.sender(),
        };

        let manager = Self {
            config,
            backend,
            connector,
            inbox,
            receiver,
            registry: Registry::new(),
            setups: HashMap::new(),
            broadcaster,
            next_attempt: 1,
            focused_tab: None,
        };

        (manager, handle)
    }

    /// Create a manager and run it on the current runtime.
    pub fn spawn(
        config: ManagerConfig,
        backend: Arc<dyn CaptureBackend>,
        connector: Arc<dyn TransportConnector>,
    ) -> (ManagerHandle, JoinHandle<()>) {
        let (manager, handle) = Self::new(config, backend, connector);
        let task = tokio::spawn(manager.run());
        (handle, task)
    }

    /// Process events until a shutdown request arrives.
    pub async fn run(mut self) {
        info!(
            "Session manager starting (backend: {}, endpoint: {})",
            self.backend.name(),
            self.config.endpoint
        );

        while let Some(event) = self.receiver.recv().await {
            if let Event::Shutdown { respond_to } = event {
                self.suspend_all();
                if let Some(tx) = respond_to {
                    let _ = tx.send(());
                }
                break;
            }
            self.handle_event(event);
        }

        info!("Session manager stopped");
    }

    fn handle_event(&mut self, event: Event) {
        debug!("Handling {}", event.name());

        match event {
            Event::StartRequested { tab, respond_to } => {
                let result = self.start(tab);
                let _ = respond_to.send(result);
            }
            Event::StopRequested { tab_id, respond_to } => {
                let stopped = self.stop(tab_id, EndReason::Stopped);
                if let Some(tx) = respond_to {
                    let _ = tx.send(stopped);
                }
            }
            Event::StopAllRequested { respond_to } => {
                let count = self.stop_all();
                if let Some(tx) = respond_to {
                    let _ = tx.send(count);
                }
            }
            Event::StatusQuery { tab_id, respond_to } => {
                self.refresh_durations();
                let tab_id = tab_id.or(self.focused_tab);
                let _ = respond_to.send(status_of(&self.registry, &self.setups, tab_id));
            }
            Event::SessionsQuery { respond_to } => {
                self.refresh_durations();
                let _ = respond_to.send(self.registry.snapshot());
            }
            Event::TabRemoved(tab_id) => {
                if self.focused_tab == Some(tab_id) {
                    self.focused_tab = None;
                }
                self.stop(tab_id, EndReason::TabClosed);
                self.broadcaster.forget(tab_id);
            }
            Event::TabActivated(tab_id) => {
                self.focused_tab = Some(tab_id);
                self.refresh_durations();
                self.publish(Some(tab_id), Urgency::Transition, None);
            }
            Event::SuspendRequested { respond_to } => {
                self.suspend_all();
                if let Some(tx) = respond_to {
                    let _ = tx.send(());
                }
            }
            Event::Shutdown { .. } => {}
            Event::CaptureGranted {
                tab_id,
                attempt,
                stream,
            } => self.on_capture_granted(tab_id, attempt, stream),
            Event::CaptureFailed {
                tab_id,
                attempt,
                reason,
            } => {
                if self.setup_matches(tab_id, attempt) {
                    self.fail_setup(tab_id, CaptureError::CaptureUnavailable(reason));
                }
            }
            Event::TransportOpened { tab_id, attempt } => self.on_transport_opened(tab_id, attempt),
            Event::TransportClosed {
                tab_id,
                attempt,
                reason,
            } => self.on_transport_lost(
                tab_id,
                attempt,
                CaptureError::TransportFailure(format!("connection closed: {}", reason)),
            ),
            Event::TransportErrored {
                tab_id,
                attempt,
                reason,
            } => self.on_transport_lost(
                tab_id,
                attempt,
                CaptureError::TransportFailure(format!("connection error: {}", reason)),
            ),
            Event::ChunkReady {
                tab_id,
                attempt,
                bytes,
            } => self.on_chunk(tab_id, attempt, bytes),
            Event::DurationTick { tab_id, attempt } => {
                let Some(session) = self.live_session(tab_id, attempt) else {
                    return;
                };
                session.refresh_duration();
                self.publish(Some(tab_id), Urgency::Progress, None);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Requests
    // ─────────────────────────────────────────────────────────────────────

    fn start(&mut self, tab: TabInfo) -> Result<StartOutcome, CaptureError> {
        let identity = self.identity_for(&tab);

        if let Some(setup) = self.setups.get(&tab.id) {
            let err = CaptureError::AlreadyPending(setup.resource_identity().to_string());
            info!("Rejected start for tab {}: {}", tab.id, err);
            return Err(err);
        }

        if let Err(err) = self.registry.try_reserve(tab.id, &identity) {
            info!("Rejected start for tab {}: {}", tab.id, err);
            return Err(err);
        }

        // The tab navigated to other content while recording.
        if self.registry.get(tab.id).is_some() {
            self.end_session(tab.id, EndReason::Replaced);
        }

        let attempt = self.next_attempt;
        self.next_attempt += 1;

        info!(
            "Starting capture for tab {} ({}), attempt {}",
            tab.id, identity, attempt
        );

        self.setups.insert(
            tab.id,
            RecordingSession::new(&tab, identity.clone(), attempt),
        );
        self.spawn_capture(tab.clone(), attempt);
        self.publish(Some(tab.id), Urgency::Transition, None);

        Ok(StartOutcome {
            tab_id: tab.id,
            resource_identity: identity,
        })
    }

    fn stop(&mut self, tab_id: TabId, reason: EndReason) -> bool {
        if let Some(mut setup) = self.setups.remove(&tab_id) {
            info!("Cancelling pending capture for tab {} ({:?})", tab_id, reason);
            setup.teardown(ConnectionState::Closed);
            self.registry.abort_pending(setup.resource_identity());
            self.publish(Some(tab_id), Urgency::Transition, None);
            return true;
        }

        self.end_session(tab_id, reason)
    }

    fn stop_all(&mut self) -> usize {
        let mut tabs: Vec<TabId> = self.setups.keys().copied().collect();
        tabs.extend(self.registry.tab_ids());

        tabs.into_iter()
            .filter(|&tab_id| self.stop(tab_id, EndReason::Stopped))
            .count()
    }

    /// Tear down every session and forget every reservation.
    fn suspend_all(&mut self) {
        let setups: Vec<RecordingSession> = self.setups.drain().map(|(_, s)| s).collect();
        let sessions = self.registry.drain();

        if setups.is_empty() && sessions.is_empty() {
            return;
        }

        info!(
            "Suspending: tearing down {} sessions and {} pending captures",
            sessions.len(),
            setups.len()
        );

        for mut session in setups.into_iter().chain(sessions) {
            session.teardown(ConnectionState::Closed);
            log_ended(&session, &EndReason::Suspended);
            self.broadcaster.forget(session.tab_id());
        }

        self.publish(None, Urgency::Transition, None);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Completions
    // ─────────────────────────────────────────────────────────────────────

    fn on_capture_granted(
        &mut self,
        tab_id: TabId,
        attempt: AttemptId,
        stream: Option<Box<dyn CaptureStream>>,
    ) {
        if !self.setup_matches(tab_id, attempt) {
            debug!("Discarding stale capture for tab {} (attempt {})", tab_id, attempt);
            if let Some(mut stream) = stream {
                if let Err(e) = stream.stop_tracks() {
                    warn!("Failed to stop stale capture for tab {}: {}", tab_id, e);
                }
            }
            return;
        }

        let Some(stream) = stream else {
            self.fail_setup(
                tab_id,
                CaptureError::CaptureUnavailable("no audio stream was returned".into()),
            );
            return;
        };

        let events = TransportEvents::new(self.inbox.clone(), tab_id, attempt);
        let opened = self.connector.open(&self.config.endpoint, events);

        let Some(setup) = self.setups.get_mut(&tab_id) else {
            return;
        };
        setup.attach_stream(stream);

        match opened {
            Ok(transport) => {
                debug!("Tab {} connecting to {}", tab_id, self.config.endpoint);
                setup.attach_transport(transport);
            }
            Err(e) => self.fail_setup(tab_id, CaptureError::TransportFailure(e.to_string())),
        }
    }

    fn on_transport_opened(&mut self, tab_id: TabId, attempt: AttemptId) {
        if !self.setup_matches(tab_id, attempt) {
            debug!("Ignoring open for stale attempt {} on tab {}", attempt, tab_id);
            return;
        }
        let Some(mut session) = self.setups.remove(&tab_id) else {
            return;
        };

        if let Err(err) = session.activate(
            &self.inbox,
            self.config.producer_timeslice,
            self.config.duration_tick,
        ) {
            warn!("Setup failed for tab {}: {}", tab_id, err);
            session.teardown(ConnectionState::Error);
            self.registry.abort_pending(session.resource_identity());
            self.registry.set_error(err.to_string());
            self.publish(Some(tab_id), Urgency::Transition, None);
            return;
        }

        info!(
            "Recording tab {} ({}): {} {}Hz {}ch",
            tab_id,
            session.resource_identity(),
            session.stats().format,
            session.stats().sample_rate,
            session.stats().channel_count
        );

        self.registry.clear_error();
        if let Some(mut displaced) = self.registry.commit(tab_id, session) {
            displaced.teardown(ConnectionState::Closed);
        }
        self.publish(Some(tab_id), Urgency::Transition, None);
    }

    fn on_transport_lost(&mut self, tab_id: TabId, attempt: AttemptId, err: CaptureError) {
        if self.setup_matches(tab_id, attempt) {
            self.fail_setup(tab_id, err);
        } else if self.live_session(tab_id, attempt).is_some() {
            self.end_session(tab_id, EndReason::Failed(err));
        } else {
            debug!("Ignoring transport loss for removed session on tab {}", tab_id);
        }
    }

    fn on_chunk(&mut self, tab_id: TabId, attempt: AttemptId, bytes: Vec<u8>) {
        let Some(session) = self.live_session(tab_id, attempt) else {
            debug!("Dropping chunk for removed session on tab {}", tab_id);
            return;
        };

        match session.send_chunk(bytes) {
            Ok(true) => self.publish(Some(tab_id), Urgency::Progress, None),
            Ok(false) => {}
            Err(err) => {
                self.end_session(tab_id, EndReason::Failed(err));
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────

    fn identity_for(&self, tab: &TabInfo) -> ResourceIdentity {
        let identity = normalize(&tab.url);
        if self.config.cross_tab_exclusivity {
            identity
        } else {
            identity.scoped_to_tab(tab.id)
        }
    }

    fn setup_matches(&self, tab_id: TabId, attempt: AttemptId) -> bool {
        self.setups
            .get(&tab_id)
            .is_some_and(|s| s.attempt() == attempt)
    }

    fn live_session(&mut self, tab_id: TabId, attempt: AttemptId) -> Option<&mut RecordingSession> {
        self.registry
            .get_mut(tab_id)
            .filter(|s| s.attempt() == attempt)
    }

    fn refresh_durations(&mut self) {
        for session in self.registry.values_mut() {
            session.refresh_duration();
        }
    }

    fn spawn_capture(&self, tab: TabInfo, attempt: AttemptId) {
        let backend = Arc::clone(&self.backend);
        let inbox = self.inbox.clone();

        tokio::spawn(async move {
            let event = match backend.capture(&tab).await {
                Ok(stream) => Event::CaptureGranted {
                    tab_id: tab.id,
                    attempt,
                    stream,
                },
                Err(e) => Event::CaptureFailed {
                    tab_id: tab.id,
                    attempt,
                    reason: format!("{:#}", e),
                },
            };
            let _ = inbox.send(event);
        });
    }

    /// A pending setup failed before commit: no session is ever created.
    fn fail_setup(&mut self, tab_id: TabId, err: CaptureError) {
        let Some(mut setup) = self.setups.remove(&tab_id) else {
            return;
        };

        warn!("Capture setup for tab {} failed: {}", tab_id, err);
        setup.teardown(ConnectionState::Error);
        self.registry.abort_pending(setup.resource_identity());
        self.registry.set_error(err.to_string());
        self.publish(Some(tab_id), Urgency::Transition, None);
    }

    /// Remove a live session and release all of its resources.
    fn end_session(&mut self, tab_id: TabId, reason: EndReason) -> bool {
        let Some(mut session) = self.registry.remove(tab_id) else {
            return false;
        };

        let final_state = match reason {
            EndReason::Failed(_) => ConnectionState::Error,
            _ => ConnectionState::Closed,
        };
        session.teardown(final_state);
        log_ended(&session, &reason);

        if let EndReason::Failed(err) = &reason {
            self.registry.set_error(err.to_string());
        }

        self.publish(
            Some(tab_id),
            Urgency::Transition,
            Some(session.stats().clone()),
        );
        self.broadcaster.forget(tab_id);
        true
    }

    fn publish(&mut self, tab_id: Option<TabId>, urgency: Urgency, final_stats: Option<SessionStats>) {
        let registry = &self.registry;
        let setups = &self.setups;

        self.broadcaster.push(tab_id, urgency, || {
            let status = status_of(registry, setups, tab_id);
            StatusUpdate {
                tab_id,
                state: status.state,
                stats: final_stats.or(status.stats),
                sessions: registry.snapshot(),
            }
        });
    }
}

fn log_ended(session: &RecordingSession, reason: &EndReason) {
    let stats = session.stats();
    match reason {
        EndReason::Failed(err) => warn!(
            "Recording of tab {} failed after {} ({}): {}",
            session.tab_id(),
            format_duration(stats.duration_seconds),
            format_bytes(stats.data_size_bytes),
            err
        ),
        other => info!(
            "Recording of tab {} ended ({:?}) after {} ({})",
            session.tab_id(),
            other,
            format_duration(stats.duration_seconds),
            format_bytes(stats.data_size_bytes)
        ),
    }
}

fn status_of(
    registry: &Registry,
    setups: &HashMap<TabId, RecordingSession>,
    tab_id: Option<TabId>,
) -> TabStatus {
    let error = registry.last_error().map(str::to_string);

    let Some(tab_id) = tab_id else {
        return TabStatus {
            tab_id: None,
            state: TabState {
                is_recording: !registry.is_empty(),
                is_pending: !setups.is_empty(),
                connection_state: None,
                error,
            },
            stats: None,
        };
    };

    if let Some(session) = registry.get(tab_id) {
        return TabStatus {
            tab_id: Some(tab_id),
            state: TabState {
                is_recording: true,
                is_pending: false,
                connection_state: Some(session.connection_state()),
                error,
            },
            stats: Some(session.stats().clone()),
        };
    }

    TabStatus {
        tab_id: Some(tab_id),
        state: TabState {
            is_recording: false,
            is_pending: setups.contains_key(&tab_id),
            connection_state: setups.get(&tab_id).map(|s| s.connection_state()),
            error,
        },
        stats: None,
    }
}

/// Cloneable front door to a running [`SessionManager`].
#[derive(Clone)]
pub struct ManagerHandle {
    inbox: Inbox,
    updates: broadcast::Sender<StatusUpdate>,
}

impl ManagerHandle {
    pub async fn start_capture(&self, tab: TabInfo) -> Result<StartOutcome, CaptureError> {
        let (tx, rx) = oneshot::channel();
        self.post(Event::StartRequested { tab, respond_to: tx })?;
        rx.await.map_err(|_| CaptureError::ManagerStopped)?
    }

    /// Returns whether the tab had a session or pending capture.
    pub async fn stop_capture(&self, tab_id: TabId) -> Result<bool, CaptureError> {
        let (tx, rx) = oneshot::channel();
        self.post(Event::StopRequested {
            tab_id,
            respond_to: Some(tx),
        })?;
        rx.await.map_err(|_| CaptureError::ManagerStopped)
    }

    pub async fn stop_all(&self) -> Result<usize, CaptureError> {
        let (tx, rx) = oneshot::channel();
        self.post(Event::StopAllRequested {
            respond_to: Some(tx),
        })?;
        rx.await.map_err(|_| CaptureError::ManagerStopped)
    }

    /// Status of one tab; without a tab, the most recently activated one.
    pub async fn get_status(&self, tab_id: Option<TabId>) -> Result<TabStatus, CaptureError> {
        let (tx, rx) = oneshot::channel();
        self.post(Event::StatusQuery {
            tab_id,
            respond_to: tx,
        })?;
        rx.await.map_err(|_| CaptureError::ManagerStopped)
    }

    pub async fn get_all_sessions(&self) -> Result<RegistrySnapshot, CaptureError> {
        let (tx, rx) = oneshot::channel();
        self.post(Event::SessionsQuery { respond_to: tx })?;
        rx.await.map_err(|_| CaptureError::ManagerStopped)
    }

    pub fn tab_removed(&self, tab_id: TabId) -> Result<(), CaptureError> {
        self.post(Event::TabRemoved(tab_id))
    }

    pub fn tab_activated(&self, tab_id: TabId) -> Result<(), CaptureError> {
        self.post(Event::TabActivated(tab_id))
    }

    pub async fn suspend(&self) -> Result<(), CaptureError> {
        let (tx, rx) = oneshot::channel();
        self.post(Event::SuspendRequested {
            respond_to: Some(tx),
        })?;
        rx.await.map_err(|_| CaptureError::ManagerStopped)
    }

    /// Suspend, then stop the manager task.
    pub async fn shutdown(&self) -> Result<(), CaptureError> {
        let (tx, rx) = oneshot::channel();
        self.post(Event::Shutdown {
            respond_to: Some(tx),
        })?;
        rx.await.map_err(|_| CaptureError::ManagerStopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.updates.subscribe()
    }

    fn post(&self, event: Event) -> Result<(), CaptureError> {
        self.inbox
            .send(event)
            .map_err(|_| CaptureError::ManagerStopped)
    }
}
