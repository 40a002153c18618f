use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::warn;

/// What one finished recording produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    pub file_path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
    /// Bytes received over the connection, including any dropped partial frame
    pub bytes_received: u64,
    /// Interleaved samples written to the file
    pub sample_count: u64,
}

/// Appends raw little-endian 16-bit PCM chunks to a WAV file.
///
/// Chunks may split a frame; the remainder is carried into the next chunk so
/// only whole frames reach the file.
pub struct RecordingWriter {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    carry: Vec<u8>,
    frame_bytes: usize,
    summary: RecordingSummary,
}

impl RecordingWriter {
    pub fn create(file_path: impl AsRef<Path>, sample_rate: u32, channels: u16) -> Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(&file_path, spec)
            .with_context(|| format!("Failed to create WAV file: {:?}", file_path))?;

        Ok(Self {
            writer: Some(writer),
            carry: Vec::new(),
            frame_bytes: channels.max(1) as usize * 2,
            summary: RecordingSummary {
                file_path,
                sample_rate,
                channels,
                bytes_received: 0,
                sample_count: 0,
            },
        })
    }

    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.summary.bytes_received += chunk.len() as u64;
        self.carry.extend_from_slice(chunk);

        let whole = self.carry.len() - self.carry.len() % self.frame_bytes;
        if whole == 0 {
            return Ok(());
        }

        if let Some(writer) = &mut self.writer {
            for pair in self.carry[..whole].chunks_exact(2) {
                writer
                    .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                    .context("Failed to write sample to WAV")?;
            }
            self.summary.sample_count += (whole / 2) as u64;
        }

        self.carry.drain(..whole);
        Ok(())
    }

    pub fn summary(&self) -> &RecordingSummary {
        &self.summary
    }

    pub fn finish(mut self) -> Result<RecordingSummary> {
        if !self.carry.is_empty() {
            warn!(
                "Dropping {} trailing bytes of an incomplete frame",
                self.carry.len()
            );
            self.carry.clear();
        }

        if let Some(writer) = self.writer.take() {
            writer.finalize().context("Failed to finalize WAV file")?;
        }

        Ok(self.summary.clone())
    }
}

impl Drop for RecordingWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize WAV writer on drop: {}", e);
            }
        }
    }
}
