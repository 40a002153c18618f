//! Recording session management
//!
//! This module provides the session manager and everything it owns:
//! - `RecordingSession`: capture stream, chunk producer, transport and timer for one tab
//! - `Registry`: live sessions by tab plus the active/pending identity indexes
//! - `SessionManager`: the single task that applies requests and async completions in order
//! - `StatusBroadcaster`: throttled status pushes to observers

mod broadcast;
mod config;
mod events;
mod manager;
mod registry;
mod session;
mod snapshot;
mod stats;

pub use broadcast::{StatusBroadcaster, Urgency};
pub use config::ManagerConfig;
pub use events::{AttemptId, ChunkSink, Event, Inbox, TransportEvents};
pub use manager::{ManagerHandle, SessionManager};
pub use registry::Registry;
pub use session::{Phase, RecordingSession};
pub use snapshot::{
    RegistrySnapshot, SessionSnapshot, StartOutcome, StatusUpdate, TabState, TabStatus,
};
pub use stats::{PageInfo, SessionStats};
