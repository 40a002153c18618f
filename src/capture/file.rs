use anyhow::{Context, Result};
use hound::WavReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{CaptureBackend, CaptureStream, ChunkProducer, StreamSettings};
use crate::session::ChunkSink;
use crate::tab::TabInfo;

/// Decoded 16-bit PCM audio loaded from a WAV file
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Interleaved samples as little-endian bytes
    pub fn pcm_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Capture backend that plays a WAV file in place of live tab audio.
pub struct WavFileBackend {
    source_path: PathBuf,
}

impl WavFileBackend {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
        }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for WavFileBackend {
    async fn capture(&self, tab: &TabInfo) -> Result<Option<Box<dyn CaptureStream>>> {
        let path = self.source_path.clone();
        let audio = tokio::task::spawn_blocking(move || AudioFile::open(path))
            .await
            .context("Audio file loader panicked")??;

        if audio.samples.is_empty() {
            return Ok(None);
        }

        info!("Capturing tab {} from {}", tab.id, audio.path);

        Ok(Some(Box::new(WavFileStream {
            pcm: Arc::new(audio.pcm_bytes()),
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            live: Arc::new(AtomicBool::new(true)),
        })))
    }

    fn name(&self) -> &str {
        "wav-file"
    }
}

struct WavFileStream {
    pcm: Arc<Vec<u8>>,
    sample_rate: u32,
    channels: u16,
    live: Arc<AtomicBool>,
}

impl CaptureStream for WavFileStream {
    fn settings(&self) -> StreamSettings {
        StreamSettings {
            sample_rate: Some(self.sample_rate),
            channel_count: Some(self.channels),
        }
    }

    fn create_producer(&self) -> Result<Box<dyn ChunkProducer>> {
        if !self.live.load(Ordering::SeqCst) {
            anyhow::bail!("capture stream has ended");
        }

        Ok(Box::new(PcmChunkProducer {
            pcm: Arc::clone(&self.pcm),
            live: Arc::clone(&self.live),
            bytes_per_second: self.sample_rate as usize * self.channels as usize * 2,
            frame_bytes: self.channels as usize * 2,
            task: None,
        }))
    }

    fn stop_tracks(&mut self) -> Result<()> {
        self.live.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Emits raw PCM slices of the source, looping until stopped.
struct PcmChunkProducer {
    pcm: Arc<Vec<u8>>,
    live: Arc<AtomicBool>,
    bytes_per_second: usize,
    frame_bytes: usize,
    task: Option<JoinHandle<()>>,
}

impl PcmChunkProducer {
    fn slice_len(&self, timeslice: Duration) -> usize {
        let raw = (self.bytes_per_second as u128 * timeslice.as_millis() / 1000) as usize;
        let aligned = raw - raw % self.frame_bytes.max(1);
        aligned.max(self.frame_bytes.max(1))
    }
}

impl ChunkProducer for PcmChunkProducer {
    fn mime_type(&self) -> String {
        "audio/pcm".to_string()
    }

    fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn start(&mut self, timeslice: Duration, sink: ChunkSink) -> Result<()> {
        if self.is_active() {
            anyhow::bail!("producer already started");
        }

        let pcm = Arc::clone(&self.pcm);
        let live = Arc::clone(&self.live);
        let slice_len = self.slice_len(timeslice);

        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(timeslice);
            interval.tick().await;
            let mut cursor = 0usize;

            while live.load(Ordering::SeqCst) {
                interval.tick().await;

                let end = (cursor + slice_len).min(pcm.len());
                let chunk = pcm[cursor..end].to_vec();
                cursor = if end >= pcm.len() { 0 } else { end };

                if !sink.emit(chunk) {
                    break;
                }
            }

            debug!("PCM producer stopped");
        }));

        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }
}
