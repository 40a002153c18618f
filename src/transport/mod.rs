//! Outbound streaming connection to the sink.
//!
//! A transport is opened in the `Connecting` state and reports `opened`,
//! `closed` and `errored` asynchronously through [`TransportEvents`].

pub mod websocket;

use crate::session::TransportEvents;
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use websocket::{WebSocketConnector, WebSocketTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Error,
}

impl ConnectionState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Open => 1,
            ConnectionState::Closed => 2,
            ConnectionState::Error => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closed,
            _ => ConnectionState::Error,
        }
    }
}

/// One live connection owned by exactly one session.
pub trait Transport: Send {
    fn state(&self) -> ConnectionState;

    /// Queue one chunk as one message. Fails unless the connection is open.
    fn send(&mut self, chunk: Vec<u8>) -> Result<()>;

    /// Close the connection. Closing twice is harmless.
    fn close(&mut self);
}

/// Opens transports to an endpoint.
pub trait TransportConnector: Send + Sync {
    fn open(&self, endpoint: &str, events: TransportEvents) -> Result<Box<dyn Transport>>;
}
