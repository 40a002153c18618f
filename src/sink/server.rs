use anyhow::{Context, Result};
use chrono::Local;
use futures::StreamExt;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::writer::{RecordingSummary, RecordingWriter};
use crate::config::SinkConfig;
use crate::format::format_bytes;

/// Receives streamed tab audio and stores one WAV file per connection.
pub struct SinkServer {
    config: SinkConfig,
}

impl SinkServer {
    pub fn new(config: SinkConfig) -> Self {
        Self { config }
    }

    /// Prepare the recordings directory and bind the listening socket.
    pub async fn bind(&self) -> Result<TcpListener> {
        std::fs::create_dir_all(&self.config.recordings_path).with_context(|| {
            format!(
                "Failed to create recordings directory {:?}",
                self.config.recordings_path
            )
        })?;

        let addr = format!("{}:{}", self.config.bind, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind sink on {}", addr))?;

        info!("Sink listening on ws://{}", listener.local_addr()?);
        Ok(listener)
    }

    pub async fn run(self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections until the listener fails.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .context("Failed to accept sink connection")?;

            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = record_connection(stream, peer, &config).await {
                    error!("Sink connection from {} failed: {:#}", peer, e);
                }
            });
        }
    }
}

/// Handle one connection: every binary message is appended to a fresh WAV file.
pub async fn record_connection(
    stream: TcpStream,
    peer: SocketAddr,
    config: &SinkConfig,
) -> Result<RecordingSummary> {
    let mut ws = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;

    let connection_id = Uuid::new_v4().simple().to_string();
    let short_id = &connection_id[..8];
    info!("New sink connection {} from {}", short_id, peer);

    let filename = format!(
        "audio_{}_{}.wav",
        Local::now().format("%Y%m%d_%H%M%S"),
        short_id
    );
    let path = config.recordings_path.join(filename);
    info!("Recording to {}", path.display());

    let mut writer = RecordingWriter::create(&path, config.sample_rate, config.channels)?;

    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Binary(bytes)) => {
                writer.write_chunk(&bytes)?;
                debug!("Connection {}: received {} bytes", short_id, bytes.len());
            }
            Ok(Message::Close(frame)) => {
                match frame {
                    Some(frame) => info!(
                        "Connection {} closed: code {}, reason {:?}",
                        short_id,
                        u16::from(frame.code),
                        frame.reason
                    ),
                    None => info!("Connection {} closed", short_id),
                }
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Connection {} errored: {}", short_id, e);
                break;
            }
        }
    }

    let summary = writer.finish()?;
    info!(
        "Audio file saved: {} ({})",
        summary.file_path.display(),
        format_bytes(summary.bytes_received)
    );

    Ok(summary)
}
