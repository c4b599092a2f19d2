//! Error types for the Pi voice client.

use thiserror::Error;

use crate::client::BackendError;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing credential, unusable engine, bad setting)
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or capture error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Backend request failed
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Backend failed its startup health check
    #[error("{0} is not available")]
    BackendUnavailable(String),

    /// HTTP client construction error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
