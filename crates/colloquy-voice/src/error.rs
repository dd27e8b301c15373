//! Error types for the colloquy voice client

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the voice conversation client
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Capture device unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("Capture failed mid-stream: {0}")]
    CaptureFailed(String),

    #[error("Playback device unavailable: {0}")]
    PlaybackUnavailable(String),

    #[error("Playback failed: {0}")]
    PlaybackFailed(String),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Wire encoding error: {0}")]
    Encode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::CaptureUnavailable(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::CaptureUnavailable(err.to_string())
    }
}

impl From<base64::DecodeError> for VoiceError {
    fn from(err: base64::DecodeError) -> Self {
        VoiceError::Encode(err.to_string())
    }
}
