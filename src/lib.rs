pub mod capture;
pub mod config;
pub mod error;
pub mod format;
pub mod http;
pub mod normalize;
pub mod session;
pub mod sink;
pub mod tab;
pub mod transport;

pub use capture::{CaptureBackend, CaptureStream, ChunkProducer, StreamSettings, WavFileBackend};
pub use config::Config;
pub use error::CaptureError;
pub use http::{create_router, AppState};
pub use normalize::{normalize, ResourceIdentity};
pub use session::{
    ManagerConfig, ManagerHandle, RecordingSession, Registry, RegistrySnapshot, SessionManager,
    SessionStats, StatusUpdate, TabStatus,
};
pub use sink::SinkServer;
pub use tab::{TabId, TabInfo};
pub use transport::{ConnectionState, Transport, TransportConnector, WebSocketConnector};
