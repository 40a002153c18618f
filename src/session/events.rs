//! The manager's inbox.
//!
//! Every request and every asynchronous completion (capture granted, transport
//! opened/closed, chunk produced, timer tick) is posted here as a typed event
//! and consumed in order by the single manager task.

use super::snapshot::{RegistrySnapshot, StartOutcome, TabStatus};
use crate::capture::CaptureStream;
use crate::error::CaptureError;
use crate::tab::{TabId, TabInfo};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Identifies one setup attempt. Completions carrying an attempt that no
/// longer matches the tab's session are stale and ignored.
pub type AttemptId = u64;

pub type Inbox = mpsc::UnboundedSender<Event>;

pub enum Event {
    StartRequested {
        tab: TabInfo,
        respond_to: oneshot::Sender<Result<StartOutcome, CaptureError>>,
    },
    StopRequested {
        tab_id: TabId,
        respond_to: Option<oneshot::Sender<bool>>,
    },
    StopAllRequested {
        respond_to: Option<oneshot::Sender<usize>>,
    },
    StatusQuery {
        tab_id: Option<TabId>,
        respond_to: oneshot::Sender<TabStatus>,
    },
    SessionsQuery {
        respond_to: oneshot::Sender<RegistrySnapshot>,
    },
    TabRemoved(TabId),
    TabActivated(TabId),
    SuspendRequested {
        respond_to: Option<oneshot::Sender<()>>,
    },
    Shutdown {
        respond_to: Option<oneshot::Sender<()>>,
    },
    CaptureGranted {
        tab_id: TabId,
        attempt: AttemptId,
        stream: Option<Box<dyn CaptureStream>>,
    },
    CaptureFailed {
        tab_id: TabId,
        attempt: AttemptId,
        reason: String,
    },
    TransportOpened {
        tab_id: TabId,
        attempt: AttemptId,
    },
    TransportClosed {
        tab_id: TabId,
        attempt: AttemptId,
        reason: String,
    },
    TransportErrored {
        tab_id: TabId,
        attempt: AttemptId,
        reason: String,
    },
    ChunkReady {
        tab_id: TabId,
        attempt: AttemptId,
        bytes: Vec<u8>,
    },
    DurationTick {
        tab_id: TabId,
        attempt: AttemptId,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::StartRequested { .. } => "start_requested",
            Event::StopRequested { .. } => "stop_requested",
            Event::StopAllRequested { .. } => "stop_all_requested",
            Event::StatusQuery { .. } => "status_query",
            Event::SessionsQuery { .. } => "sessions_query",
            Event::TabRemoved(_) => "tab_removed",
            Event::TabActivated(_) => "tab_activated",
            Event::SuspendRequested { .. } => "suspend_requested",
            Event::Shutdown { .. } => "shutdown",
            Event::CaptureGranted { .. } => "capture_granted",
            Event::CaptureFailed { .. } => "capture_failed",
            Event::TransportOpened { .. } => "transport_opened",
            Event::TransportClosed { .. } => "transport_closed",
            Event::TransportErrored { .. } => "transport_errored",
            Event::ChunkReady { .. } => "chunk_ready",
            Event::DurationTick { .. } => "duration_tick",
        }
    }
}

/// Where a chunk producer delivers encoded chunks.
#[derive(Clone)]
pub struct ChunkSink {
    inbox: Inbox,
    tab_id: TabId,
    attempt: AttemptId,
}

impl ChunkSink {
    pub fn new(inbox: Inbox, tab_id: TabId, attempt: AttemptId) -> Self {
        Self {
            inbox,
            tab_id,
            attempt,
        }
    }

    /// Post a chunk. Returns false once the manager is gone.
    pub fn emit(&self, bytes: Vec<u8>) -> bool {
        self.inbox
            .send(Event::ChunkReady {
                tab_id: self.tab_id,
                attempt: self.attempt,
                bytes,
            })
            .is_ok()
    }
}

/// Where a transport reports its connection lifecycle.
#[derive(Clone)]
pub struct TransportEvents {
    inbox: Inbox,
    tab_id: TabId,
    attempt: AttemptId,
}

impl TransportEvents {
    pub fn new(inbox: Inbox, tab_id: TabId, attempt: AttemptId) -> Self {
        Self {
            inbox,
            tab_id,
            attempt,
        }
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    pub fn opened(&self) {
        self.post(Event::TransportOpened {
            tab_id: self.tab_id,
            attempt: self.attempt,
        });
    }

    pub fn closed(&self, reason: impl Into<String>) {
        self.post(Event::TransportClosed {
            tab_id: self.tab_id,
            attempt: self.attempt,
            reason: reason.into(),
        });
    }

    pub fn errored(&self, reason: impl Into<String>) {
        self.post(Event::TransportErrored {
            tab_id: self.tab_id,
            attempt: self.attempt,
            reason: reason.into(),
        });
    }

    fn post(&self, event: Event) {
        let name = event.name();
        if self.inbox.send(event).is_err() {
            debug!("Dropping {} for tab {}: manager stopped", name, self.tab_id);
        }
    }
}
