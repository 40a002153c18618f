//! Error taxonomy for capture sessions.
//!
//! The `Display` text of each variant doubles as the advisory `last_error`
//! shown to observers.

use serde::Serialize;

/// Why a start request was rejected or a session ended abnormally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CaptureError {
    // ─────────────────────────────────────────────────────────────────────
    // Rejections (no state change)
    // ─────────────────────────────────────────────────────────────────────
    #[error("already recording {0}")]
    AlreadyRecording(String),

    #[error("a connection for {0} is already pending")]
    AlreadyPending(String),

    // ─────────────────────────────────────────────────────────────────────
    // Session failures (the session is torn down)
    // ─────────────────────────────────────────────────────────────────────
    #[error("unable to capture tab audio: {0}")]
    CaptureUnavailable(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("failed to send audio chunk: {0}")]
    SendFailure(String),

    #[error("session setup failed: {0}")]
    SetupFailure(String),

    #[error("session manager is not running")]
    ManagerStopped,
}

impl CaptureError {
    /// True for the two exclusivity rejections.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CaptureError::AlreadyRecording(_) | CaptureError::AlreadyPending(_)
        )
    }
}
