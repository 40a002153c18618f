use super::snapshot::StatusUpdate;
use crate::tab::TabId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::trace;

/// How a push interacts with the per-tab throttle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    /// Start, stop, error: always delivered
    Transition,
    /// Chunk progress and timer ticks: at most one per window per tab
    Progress,
}

/// Rate-limited push of status updates to observers.
pub struct StatusBroadcaster {
    tx: broadcast::Sender<StatusUpdate>,
    window: Duration,
    last_push: HashMap<Option<TabId>, Instant>,
}

impl StatusBroadcaster {
    pub fn new(window: Duration, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            window,
            last_push: HashMap::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<StatusUpdate> {
        self.tx.clone()
    }

    /// Whether a push of `urgency` for `tab_id` would go out now
    pub fn should_send(&self, tab_id: Option<TabId>, urgency: Urgency) -> bool {
        match urgency {
            Urgency::Transition => true,
            Urgency::Progress => self
                .last_push
                .get(&tab_id)
                .map_or(true, |last| last.elapsed() >= self.window),
        }
    }

    /// Push an update. Returns true if it was sent.
    ///
    /// `build` only runs when the update is sent.
    pub fn push(
        &mut self,
        tab_id: Option<TabId>,
        urgency: Urgency,
        build: impl FnOnce() -> StatusUpdate,
    ) -> bool {
        if !self.should_send(tab_id, urgency) {
            trace!("Throttled status update for tab {:?}", tab_id);
            return false;
        }

        self.last_push.insert(tab_id, Instant::now());
        // No receivers is fine: nobody is watching.
        let _ = self.tx.send(build());
        true
    }

    /// Drop throttle state for a tab that no longer has a session
    pub fn forget(&mut self, tab_id: TabId) {
        self.last_push.remove(&Some(tab_id));
    }
}
