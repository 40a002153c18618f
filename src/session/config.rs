use crate::config::{Config, SessionConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Everything the session manager needs to run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Transport endpoint each session streams to
    pub endpoint: String,

    /// Minimum gap between throttled status pushes for one tab
    pub broadcast_window: Duration,

    /// Period of the per-session duration timer
    pub duration_tick: Duration,

    /// Slicing interval handed to each chunk producer
    pub producer_timeslice: Duration,

    /// Whether the same content in two different tabs counts as a collision
    pub cross_tab_exclusivity: bool,

    /// Capacity of the status broadcast channel
    pub broadcast_capacity: usize,
}

impl ManagerConfig {
    pub fn from_session(endpoint: impl Into<String>, session: &SessionConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            broadcast_window: session.broadcast_window(),
            duration_tick: session.duration_tick(),
            producer_timeslice: session.producer_timeslice(),
            cross_tab_exclusivity: session.cross_tab_exclusivity,
            broadcast_capacity: 256,
        }
    }
}

impl From<&Config> for ManagerConfig {
    fn from(cfg: &Config) -> Self {
        Self::from_session(cfg.sink.endpoint.clone(), &cfg.session)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}
