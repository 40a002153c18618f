pub mod backend;
pub mod file;

pub use backend::{
    CaptureBackend, CaptureStream, ChunkProducer, StreamSettings, DEFAULT_CHANNEL_COUNT,
    DEFAULT_SAMPLE_RATE,
};
pub use file::{AudioFile, WavFileBackend};
