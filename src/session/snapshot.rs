//! Observer-facing, point-in-time views of the session table.

use super::session::Phase;
use super::stats::SessionStats;
use crate::normalize::ResourceIdentity;
use crate::tab::TabId;
use crate::transport::ConnectionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub tab_id: TabId,
    pub resource_identity: ResourceIdentity,
    pub phase: Phase,
    pub connection_state: ConnectionState,
    pub start_time: Option<DateTime<Utc>>,
    pub stats: SessionStats,
}

/// All live sessions, the identities mid-connect, and the advisory error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub sessions: Vec<SessionSnapshot>,
    pub pending: Vec<ResourceIdentity>,
    pub last_error: Option<String>,
}

impl RegistrySnapshot {
    pub fn session(&self, tab_id: TabId) -> Option<&SessionSnapshot> {
        self.sessions.iter().find(|s| s.tab_id == tab_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabState {
    pub is_recording: bool,
    pub is_pending: bool,
    pub connection_state: Option<ConnectionState>,
    pub error: Option<String>,
}

/// Answer to a status query for one tab
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabStatus {
    pub tab_id: Option<TabId>,
    pub state: TabState,
    pub stats: Option<SessionStats>,
}

/// The `statusUpdate` push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub tab_id: Option<TabId>,
    pub state: TabState,
    pub stats: Option<SessionStats>,
    pub sessions: RegistrySnapshot,
}

/// A start request that passed the exclusivity checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartOutcome {
    pub tab_id: TabId,
    pub resource_identity: ResourceIdentity,
}
