//! Error types for the voice client

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur while capturing, submitting or playing a turn
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Capture device unavailable: {0}")]
    DeviceAccess(String),

    #[error("Capture stream closed")]
    StreamClosed,

    #[error("Relay transport error: {0}")]
    Transport(String),

    /// The relay answered with an `{error}` body.
    #[error("Relay rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Invalid turn transition: {0}")]
    InvalidTransition(String),
}

impl From<reqwest::Error> for VoiceError {
    fn from(err: reqwest::Error) -> Self {
        VoiceError::Transport(err.to_string())
    }
}
