use super::events::{AttemptId, ChunkSink, Event, Inbox};
use super::snapshot::SessionSnapshot;
use super::stats::{PageInfo, SessionStats};
use crate::capture::{CaptureStream, ChunkProducer};
use crate::error::CaptureError;
use crate::normalize::ResourceIdentity;
use crate::tab::{TabId, TabInfo};
use crate::transport::{ConnectionState, Transport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pending,
    Active,
    Closing,
    Removed,
}

/// One recording in progress for one tab.
///
/// Exclusively owns the capture stream, chunk producer, transport and duration
/// timer. Handles are attached one by one as setup succeeds, so any of them
/// may be absent when the session is torn down.
pub struct RecordingSession {
    tab_id: TabId,
    attempt: AttemptId,
    resource_identity: ResourceIdentity,
    phase: Phase,
    connection_state: ConnectionState,

    /// Wall-clock time the transport opened
    start_time: Option<DateTime<Utc>>,

    /// Monotonic twin of `start_time`, drives `duration_seconds`
    started_at: Option<Instant>,

    stats: SessionStats,

    stream: Option<Box<dyn CaptureStream>>,
    producer: Option<Box<dyn ChunkProducer>>,
    transport: Option<Box<dyn Transport>>,
    timer: Option<JoinHandle<()>>,
}

impl RecordingSession {
    pub fn new(tab: &TabInfo, resource_identity: ResourceIdentity, attempt: AttemptId) -> Self {
        Self {
            tab_id: tab.id,
            attempt,
            resource_identity,
            phase: Phase::Pending,
            connection_state: ConnectionState::Connecting,
            start_time: None,
            started_at: None,
            stats: SessionStats {
                page_info: PageInfo {
                    title: tab.title.clone().unwrap_or_default(),
                    url: tab.url.clone(),
                    favicon_url: tab.favicon_url.clone(),
                },
                ..SessionStats::default()
            },
            stream: None,
            producer: None,
            transport: None,
            timer: None,
        }
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn resource_identity(&self) -> &ResourceIdentity {
        &self.resource_identity
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Live transport state, or the last one recorded once the handle is gone
    pub fn connection_state(&self) -> ConnectionState {
        self.transport
            .as_ref()
            .map(|t| t.state())
            .unwrap_or(self.connection_state)
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    pub fn attach_stream(&mut self, stream: Box<dyn CaptureStream>) {
        self.stream = Some(stream);
    }

    pub fn attach_transport(&mut self, transport: Box<dyn Transport>) {
        self.connection_state = transport.state();
        self.transport = Some(transport);
    }

    /// Pending → Active, run when the transport reports open.
    ///
    /// Records the start time, starts the chunk producer against the capture
    /// stream, fills in the negotiated format and starts the duration timer.
    pub fn activate(
        &mut self,
        inbox: &Inbox,
        timeslice: Duration,
        tick: Duration,
    ) -> Result<(), CaptureError> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| CaptureError::SetupFailure("no capture stream attached".into()))?;

        self.start_time = Some(Utc::now());
        self.started_at = Some(Instant::now());

        let mut producer = stream
            .create_producer()
            .map_err(|e| CaptureError::SetupFailure(e.to_string()))?;
        let settings = stream.settings();

        self.stats.format = producer.mime_type();
        self.stats.sample_rate = settings.sample_rate_or_default();
        self.stats.channel_count = settings.channel_count_or_default();

        let sink = ChunkSink::new(inbox.clone(), self.tab_id, self.attempt);
        let started = producer.start(timeslice, sink);
        self.producer = Some(producer);
        started.map_err(|e| CaptureError::SetupFailure(e.to_string()))?;

        self.timer = Some(spawn_duration_timer(
            inbox.clone(),
            self.tab_id,
            self.attempt,
            tick,
        ));
        self.connection_state = ConnectionState::Open;
        self.phase = Phase::Active;

        Ok(())
    }

    /// Recompute `duration_seconds`. Never moves backwards.
    pub fn refresh_duration(&mut self) {
        if let Some(started_at) = self.started_at {
            let elapsed = started_at.elapsed().as_secs();
            self.stats.duration_seconds = self.stats.duration_seconds.max(elapsed);
        }
    }

    /// Deliver one chunk. Empty chunks are skipped; anything but an open
    /// transport is a send failure.
    pub fn send_chunk(&mut self, bytes: Vec<u8>) -> Result<bool, CaptureError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| CaptureError::SendFailure("no transport".into()))?;

        let state = transport.state();
        if state != ConnectionState::Open {
            return Err(CaptureError::SendFailure(format!(
                "transport is {:?}",
                state
            )));
        }

        if bytes.is_empty() {
            return Ok(false);
        }

        let len = bytes.len() as u64;
        self.stats.data_size_bytes += len;
        transport
            .send(bytes)
            .map_err(|e| CaptureError::SendFailure(e.to_string()))?;

        debug!("Tab {} sent {} bytes", self.tab_id, len);
        Ok(true)
    }

    /// Release every resource. Safe to call more than once.
    ///
    /// Order: producer, transport, capture tracks, timer, start time.
    pub fn teardown(&mut self, final_state: ConnectionState) {
        if self.phase == Phase::Removed {
            return;
        }
        self.phase = Phase::Closing;

        if let Some(mut producer) = self.producer.take() {
            if producer.is_active() {
                if let Err(e) = producer.stop() {
                    warn!("Tab {}: failed to stop chunk producer: {}", self.tab_id, e);
                }
            }
        }

        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }

        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.stop_tracks() {
                warn!("Tab {}: failed to stop capture tracks: {}", self.tab_id, e);
            }
        }

        if let Some(timer) = self.timer.take() {
            timer.abort();
        }

        self.refresh_duration();
        self.start_time = None;
        self.started_at = None;

        self.connection_state = final_state;
        self.phase = Phase::Removed;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            tab_id: self.tab_id,
            resource_identity: self.resource_identity.clone(),
            phase: self.phase,
            connection_state: self.connection_state(),
            start_time: self.start_time,
            stats: self.stats.clone(),
        }
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if self.phase != Phase::Removed {
            warn!("Tab {} session dropped without teardown", self.tab_id);
            self.teardown(ConnectionState::Closed);
        }
    }
}

fn spawn_duration_timer(
    inbox: Inbox,
    tab_id: TabId,
    attempt: AttemptId,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            interval.tick().await;
            if inbox.send(Event::DurationTick { tab_id, attempt }).is_err() {
                break;
            }
        }
    })
}
