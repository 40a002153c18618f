use crate::session::ChunkSink;
use crate::tab::TabInfo;
use anyhow::Result;
use serde::Serialize;
use std::time::Duration;

/// Sample rate assumed when the stream does not report one
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Channel count assumed when the stream does not report one
pub const DEFAULT_CHANNEL_COUNT: u16 = 2;

/// Negotiated settings of a live capture stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamSettings {
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u16>,
}

impl StreamSettings {
    pub fn sample_rate_or_default(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn channel_count_or_default(&self) -> u16 {
        self.channel_count.unwrap_or(DEFAULT_CHANNEL_COUNT)
    }
}

/// Live audio stream of one tab.
pub trait CaptureStream: Send {
    fn settings(&self) -> StreamSettings;

    /// Instantiate a chunk producer reading from this stream
    fn create_producer(&self) -> Result<Box<dyn ChunkProducer>>;

    /// Stop and disable every track. Calling it twice is harmless.
    fn stop_tracks(&mut self) -> Result<()>;
}

/// Periodically slices a stream into self-contained encoded chunks.
pub trait ChunkProducer: Send {
    /// Container/codec tag of the emitted chunks
    fn mime_type(&self) -> String;

    fn is_active(&self) -> bool;

    /// Begin emitting a chunk every `timeslice` into `sink`
    fn start(&mut self, timeslice: Duration, sink: ChunkSink) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
}

/// Audio capture capability
///
/// Implementations:
/// - `WavFileBackend`: replays a WAV file as if it were tab audio
/// - tests provide scripted backends
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Ask for the audio of `tab`. `Ok(None)` means the capability declined.
    async fn capture(&self, tab: &TabInfo) -> Result<Option<Box<dyn CaptureStream>>>;

    /// Backend name for logging
    fn name(&self) -> &str;
}
