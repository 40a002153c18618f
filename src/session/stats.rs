use serde::{Deserialize, Serialize};

/// Page the recording was started from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub title: String,
    pub url: String,
    pub favicon_url: Option<String>,
}

/// Statistics about a recording session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Whole seconds since the transport opened; frozen once the session ends
    pub duration_seconds: u64,

    /// Bytes handed to the transport so far
    pub data_size_bytes: u64,

    /// Container/codec tag reported by the chunk producer
    pub format: String,

    pub sample_rate: u32,

    pub channel_count: u16,

    pub page_info: PageInfo,
}
