use anyhow::{bail, Result};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{ConnectionState, Transport, TransportConnector};
use crate::session::TransportEvents;

enum Outbound {
    Chunk(Vec<u8>),
    Close,
}

#[derive(Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ConnectionState::Connecting.to_u8())))
    }

    fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state.to_u8(), Ordering::SeqCst);
    }
}

/// Opens one WebSocket per session; each chunk goes out as one binary message.
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

impl TransportConnector for WebSocketConnector {
    fn open(&self, endpoint: &str, events: TransportEvents) -> Result<Box<dyn Transport>> {
        if !endpoint.starts_with("ws://") && !endpoint.starts_with("wss://") {
            bail!("unsupported transport endpoint: {}", endpoint);
        }

        let state = SharedState::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_connection(
            endpoint.to_string(),
            state.clone(),
            outbound_rx,
            events,
        ));

        Ok(Box::new(WebSocketTransport { state, outbound_tx }))
    }
}

pub struct WebSocketTransport {
    state: SharedState,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
}

impl Transport for WebSocketTransport {
    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn send(&mut self, chunk: Vec<u8>) -> Result<()> {
        let state = self.state.get();
        if state != ConnectionState::Open {
            bail!("connection is {:?}", state);
        }
        if self.outbound_tx.send(Outbound::Chunk(chunk)).is_err() {
            self.state.set(ConnectionState::Error);
            bail!("connection task has exited");
        }
        Ok(())
    }

    fn close(&mut self) {
        if matches!(
            self.state.get(),
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            self.state.set(ConnectionState::Closed);
        }
        let _ = self.outbound_tx.send(Outbound::Close);
    }
}

async fn run_connection(
    endpoint: String,
    state: SharedState,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    events: TransportEvents,
) {
    let ws = match tokio_tungstenite::connect_async(endpoint.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", endpoint, e);
            state.set(ConnectionState::Error);
            events.errored(format!("connection to {} failed: {}", endpoint, e));
            return;
        }
    };

    // Closed locally while the handshake was in flight.
    if state.get() == ConnectionState::Closed {
        let (mut sink, _) = ws.split();
        let _ = sink.close().await;
        return;
    }

    info!("WebSocket connected to {}", endpoint);
    state.set(ConnectionState::Open);
    events.opened();

    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(Outbound::Chunk(bytes)) => {
                    let len = bytes.len();
                    if let Err(e) = sink.send(Message::Binary(bytes)).await {
                        warn!("WebSocket send to {} failed: {}", endpoint, e);
                        state.set(ConnectionState::Error);
                        events.errored(format!("send failed: {}", e));
                        return;
                    }
                    debug!("Sent {} bytes to {}", len, endpoint);
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    debug!("WebSocket to {} closed locally", endpoint);
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("closed by peer ({}): {}", u16::from(f.code), f.reason))
                        .unwrap_or_else(|| "closed by peer".to_string());
                    info!("WebSocket to {} {}", endpoint, reason);
                    state.set(ConnectionState::Closed);
                    events.closed(reason);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket to {} errored: {}", endpoint, e);
                    state.set(ConnectionState::Error);
                    events.errored(e.to_string());
                    return;
                }
                None => {
                    state.set(ConnectionState::Closed);
                    events.closed("connection dropped");
                    return;
                }
            },
        }
    }
}
