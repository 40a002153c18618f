use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub sink: SinkConfig,
    pub session: SessionConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8766,
        }
    }
}

/// Where sessions stream to, and how the bundled receiver stores what it gets.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Transport endpoint every session connects to
    pub endpoint: String,
    pub bind: String,
    pub port: u16,
    pub recordings_path: PathBuf,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8765".to_string(),
            bind: "127.0.0.1".to_string(),
            port: 8765,
            recordings_path: PathBuf::from("audio"),
            sample_rate: 48000,
            channels: 2,
        }
    }
}

/// Session manager tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minimum gap between throttled status pushes for one tab
    pub broadcast_window_ms: u64,

    /// Period of the per-session duration timer
    pub duration_tick_ms: u64,

    /// Slicing interval handed to the chunk producer
    pub producer_timeslice_ms: u64,

    /// When true, two tabs showing the same canonical content cannot record
    /// at the same time. When false, exclusivity is per tab.
    pub cross_tab_exclusivity: bool,
}

impl SessionConfig {
    pub fn broadcast_window(&self) -> Duration {
        Duration::from_millis(self.broadcast_window_ms)
    }

    pub fn duration_tick(&self) -> Duration {
        Duration::from_millis(self.duration_tick_ms.max(1))
    }

    pub fn producer_timeslice(&self) -> Duration {
        Duration::from_millis(self.producer_timeslice_ms.max(1))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            broadcast_window_ms: 1000,
            duration_tick_ms: 1000,
            producer_timeslice_ms: 100,
            cross_tab_exclusivity: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// WAV file replayed by the file capture backend
    pub source_path: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("fixtures/tab-audio.wav"),
        }
    }
}

impl Config {
    /// Load from an optional config file, then `TABCAST__*` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("TABCAST").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        settings
            .try_deserialize()
            .context("Failed to deserialize config")
    }
}
