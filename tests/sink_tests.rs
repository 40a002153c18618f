// Integration tests for streaming sessions over WebSocket into the sink
//
// These tests run the real WebSocket transport against the bundled sink on a
// loopback port and verify what ends up in the WAV files.

mod common;

use anyhow::Result;
use common::ScriptedBackend;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tabcast::config::SinkConfig;
use tabcast::session::{ManagerConfig, ManagerHandle, RegistrySnapshot, SessionManager};
use tabcast::sink::{record_connection, RecordingSummary};
use tabcast::{CaptureBackend, TabInfo, WavFileBackend, WebSocketConnector};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

fn sink_config(dir: &TempDir) -> SinkConfig {
    SinkConfig {
        recordings_path: dir.path().to_path_buf(),
        ..SinkConfig::default()
    }
}

/// Accept exactly one connection and record it
async fn one_shot_sink(config: SinkConfig) -> Result<(String, JoinHandle<Result<RecordingSummary>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = format!("ws://{}", listener.local_addr()?);

    let task = tokio::spawn(async move {
        let (stream, peer) = listener.accept().await?;
        record_connection(stream, peer, &config).await
    });

    Ok((endpoint, task))
}

fn spawn_manager(endpoint: &str, backend: Arc<dyn CaptureBackend>) -> ManagerHandle {
    let config = ManagerConfig {
        endpoint: endpoint.to_string(),
        producer_timeslice: Duration::from_millis(20),
        ..ManagerConfig::default()
    };
    let (manager, _task) = SessionManager::spawn(config, backend, Arc::new(WebSocketConnector));
    manager
}

/// Poll the registry until `check` holds
async fn wait_for(
    manager: &ManagerHandle,
    check: impl Fn(&RegistrySnapshot) -> bool,
) -> Result<RegistrySnapshot> {
    for _ in 0..400 {
        let snapshot = manager.get_all_sessions().await?;
        if check(&snapshot) {
            return Ok(snapshot);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("registry never reached the expected state")
}

#[tokio::test]
async fn test_streamed_chunks_land_in_wav_file() -> Result<()> {
    let dir = TempDir::new()?;
    let (endpoint, sink) = one_shot_sink(sink_config(&dir)).await?;

    let backend = Arc::new(ScriptedBackend::new());
    let manager = spawn_manager(&endpoint, Arc::clone(&backend) as Arc<dyn CaptureBackend>);

    manager
        .start_capture(TabInfo::new(1, "https://example.com/a"))
        .await?;
    wait_for(&manager, |s| s.session(1).is_some()).await?;

    let stream = backend.probe(1).expect("stream");
    for _ in 0..3 {
        // 100 stereo frames of 16-bit samples
        assert!(stream.emit(vec![1u8; 400]));
    }

    let snapshot = manager.get_all_sessions().await?;
    assert_eq!(snapshot.session(1).unwrap().stats.data_size_bytes, 1200);

    assert!(manager.stop_capture(1).await?);

    let summary = tokio::time::timeout(Duration::from_secs(5), sink).await???;
    assert_eq!(summary.bytes_received, 1200);
    assert_eq!(summary.sample_count, 600);
    assert!(summary.file_path.starts_with(dir.path()));

    let reader = hound::WavReader::open(&summary.file_path)?;
    let spec = reader.spec();
    assert_eq!(spec.sample_rate, 48000);
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.bits_per_sample, 16);
    let samples: Vec<i16> = reader.into_samples::<i16>().collect::<Result<_, _>>()?;
    assert_eq!(samples.len(), 600);
    assert!(samples.iter().all(|&s| s == 0x0101));

    Ok(())
}

#[tokio::test]
async fn test_wav_file_capture_streams_to_sink() -> Result<()> {
    let dir = TempDir::new()?;
    let source = dir.path().join("source.wav");
    {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&source, spec)?;
        for i in 0..1600 {
            writer.write_sample((i % 128) as i16)?;
        }
        writer.finalize()?;
    }

    let recordings = TempDir::new()?;
    let (endpoint, sink) = one_shot_sink(sink_config(&recordings)).await?;
    let manager = spawn_manager(&endpoint, Arc::new(WavFileBackend::new(&source)));
    let mut updates = manager.subscribe();

    manager
        .start_capture(TabInfo::new(9, "https://example.com/radio").with_title("Radio"))
        .await?;

    let snapshot = wait_for(&manager, |s| {
        s.session(9)
            .is_some_and(|session| session.stats.data_size_bytes >= 1280)
    })
    .await?;
    let session = snapshot.session(9).unwrap();
    assert_eq!(session.stats.format, "audio/pcm");
    assert_eq!(session.stats.sample_rate, 8000);
    assert_eq!(session.stats.channel_count, 2);
    assert_eq!(session.stats.page_info.title, "Radio");

    manager.stop_capture(9).await?;

    let mut final_size = None;
    while let Ok(update) = updates.try_recv() {
        if update.tab_id == Some(9) && !update.state.is_recording {
            if let Some(stats) = update.stats {
                final_size = Some(stats.data_size_bytes);
            }
        }
    }
    let final_size = final_size.expect("final stats pushed on stop");

    let summary = tokio::time::timeout(Duration::from_secs(5), sink).await???;
    assert_eq!(summary.bytes_received, final_size);
    assert_eq!(summary.bytes_received % 4, 0);

    Ok(())
}

#[tokio::test]
async fn test_sink_closing_ends_session() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = format!("ws://{}", listener.local_addr()?);
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let sink = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let mut ws = tokio_tungstenite::accept_async(stream).await?;
        let _ = release_rx.await;
        ws.close(None).await?;
        // Drain until the client acknowledges
        while let Some(Ok(_)) = ws.next().await {}
        anyhow::Ok(())
    });

    let backend = Arc::new(ScriptedBackend::new());
    let manager = spawn_manager(&endpoint, Arc::clone(&backend) as Arc<dyn CaptureBackend>);

    manager
        .start_capture(TabInfo::new(2, "https://example.com/b"))
        .await?;
    wait_for(&manager, |s| s.session(2).is_some()).await?;

    let _ = release_tx.send(());
    let snapshot = wait_for(&manager, |s| s.sessions.is_empty()).await?;
    assert!(snapshot.pending.is_empty());
    let error = snapshot.last_error.expect("peer close is reported");
    assert!(error.contains("connection closed"), "unexpected error: {}", error);
    assert!(backend.probe(2).unwrap().tracks_stopped());

    tokio::time::timeout(Duration::from_secs(5), sink).await???;

    Ok(())
}

#[tokio::test]
async fn test_unreachable_sink_releases_reservation() -> Result<()> {
    // Grab a free port, then stop listening on it
    let endpoint = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        format!("ws://{}", listener.local_addr()?)
    };

    let backend = Arc::new(ScriptedBackend::new());
    let manager = spawn_manager(&endpoint, Arc::clone(&backend) as Arc<dyn CaptureBackend>);

    manager
        .start_capture(TabInfo::new(3, "https://example.com/c"))
        .await?;
    let snapshot = wait_for(&manager, |s| s.last_error.is_some()).await?;

    assert!(snapshot.sessions.is_empty());
    assert!(snapshot.pending.is_empty());
    assert!(snapshot.last_error.unwrap().contains("connection error"));
    assert!(backend.probe(3).unwrap().tracks_stopped());

    // The identity can be retried
    manager
        .start_capture(TabInfo::new(3, "https://example.com/c"))
        .await?;

    Ok(())
}

#[tokio::test]
async fn test_non_websocket_endpoint_is_a_transport_failure() -> Result<()> {
    let backend = Arc::new(ScriptedBackend::new());
    let manager = spawn_manager(
        "http://localhost:8765",
        Arc::clone(&backend) as Arc<dyn CaptureBackend>,
    );

    manager
        .start_capture(TabInfo::new(4, "https://example.com/d"))
        .await?;
    let snapshot = wait_for(&manager, |s| s.last_error.is_some()).await?;

    assert!(snapshot
        .last_error
        .unwrap()
        .starts_with("transport failure: unsupported transport endpoint"));
    assert!(snapshot.pending.is_empty());

    Ok(())
}
