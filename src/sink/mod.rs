//! WebSocket receiver that stores streamed tab audio as WAV files.

mod server;
mod writer;

pub use server::{record_connection, SinkServer};
pub use writer::{RecordingSummary, RecordingWriter};
