//! Error types for the live voice pipeline

use thiserror::Error;

/// Result type alias for voice pipeline operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the live voice pipeline
///
/// None of these escape the session manager to the UI layer; they are
/// handled locally and surface only as state transitions and transcript
/// entries. The taxonomy exists so internal paths can tell a denied
/// microphone apart from a failed handshake or a corrupted stream.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("microphone unavailable: {0}")]
    DeviceAcquisition(String),

    #[error("audio capture error: {0}")]
    Capture(String),

    #[error("live session open failed: {0}")]
    SessionOpen(String),

    #[error("malformed inbound payload: {0}")]
    Protocol(String),

    #[error("audio playback error: {0}")]
    Playback(String),

    #[error("channel send error: {0}")]
    ChannelSend(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::DeviceAcquisition(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::DeviceAcquisition(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::Capture(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::Capture(err.to_string())
    }
}
