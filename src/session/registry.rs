//! Process-wide table of live sessions.
//!
//! Sessions are keyed by tab. Two index sets back the exclusivity rules:
//! identities held by a live session, and identities reserved by an attempt
//! that has not connected yet. The table is only mutated through
//! [`Registry::try_reserve`], [`Registry::commit`], [`Registry::abort_pending`]
//! and [`Registry::remove`], each of which completes without suspending.

use super::session::RecordingSession;
use super::snapshot::RegistrySnapshot;
use crate::error::CaptureError;
use crate::normalize::ResourceIdentity;
use crate::tab::TabId;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

#[derive(Default)]
pub struct Registry {
    sessions_by_tab: BTreeMap<TabId, RecordingSession>,
    /// identity → owning tab, one entry per live session
    active: HashMap<ResourceIdentity, TabId>,
    pending: HashSet<ResourceIdentity>,
    last_error: Option<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-mark an identity for a new connection attempt.
    pub fn try_reserve(
        &mut self,
        tab_id: TabId,
        identity: &ResourceIdentity,
    ) -> Result<(), CaptureError> {
        if self.active.contains_key(identity) {
            return Err(CaptureError::AlreadyRecording(identity.to_string()));
        }
        if self.pending.contains(identity) {
            return Err(CaptureError::AlreadyPending(identity.to_string()));
        }

        self.pending.insert(identity.clone());
        debug!("Tab {} reserved {}", tab_id, identity);
        Ok(())
    }

    /// Move the session's identity from pending to active and store it.
    ///
    /// Returns a session previously stored for the same tab, which the caller
    /// must tear down.
    pub fn commit(
        &mut self,
        tab_id: TabId,
        session: RecordingSession,
    ) -> Option<RecordingSession> {
        let displaced = self.remove(tab_id);

        let identity = session.resource_identity().clone();
        self.pending.remove(&identity);
        self.active.insert(identity, tab_id);
        self.sessions_by_tab.insert(tab_id, session);

        displaced
    }

    /// Release a reservation that never became a session.
    pub fn abort_pending(&mut self, identity: &ResourceIdentity) -> bool {
        self.pending.remove(identity)
    }

    /// Take a tab's session out of the table. Removing an absent tab is a no-op.
    pub fn remove(&mut self, tab_id: TabId) -> Option<RecordingSession> {
        let session = self.sessions_by_tab.remove(&tab_id)?;
        let identity = session.resource_identity();
        if self.active.get(identity) == Some(&tab_id) {
            self.active.remove(identity);
        }
        Some(session)
    }

    /// Remove every session and clear all reservations.
    pub fn drain(&mut self) -> Vec<RecordingSession> {
        self.active.clear();
        self.pending.clear();
        std::mem::take(&mut self.sessions_by_tab)
            .into_values()
            .collect()
    }

    pub fn get(&self, tab_id: TabId) -> Option<&RecordingSession> {
        self.sessions_by_tab.get(&tab_id)
    }

    pub fn get_mut(&mut self, tab_id: TabId) -> Option<&mut RecordingSession> {
        self.sessions_by_tab.get_mut(&tab_id)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut RecordingSession> {
        self.sessions_by_tab.values_mut()
    }

    pub fn tab_ids(&self) -> Vec<TabId> {
        self.sessions_by_tab.keys().copied().collect()
    }

    pub fn is_active(&self, identity: &ResourceIdentity) -> bool {
        self.active.contains_key(identity)
    }

    pub fn is_pending(&self, identity: &ResourceIdentity) -> bool {
        self.pending.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.sessions_by_tab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions_by_tab.is_empty()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut pending: Vec<ResourceIdentity> = self.pending.iter().cloned().collect();
        pending.sort();

        RegistrySnapshot {
            sessions: self
                .sessions_by_tab
                .values()
                .map(RecordingSession::snapshot)
                .collect(),
            pending,
            last_error: self.last_error.clone(),
        }
    }
}
