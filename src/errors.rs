//! Error types for the voice session engine

use crate::connection::ConnectionError;
use crate::playback::PlaybackError;

/// Error types for engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("Device setup already in progress")]
    SetupInProgress,
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Session closed")]
    SessionClosed,
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
