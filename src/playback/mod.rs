//! Playback of synthesized reply audio with synchronized captions.
//!
//! Inbound reply segments are buffered per request and played strictly in
//! arrival order. Word-level caption reveals are scheduled against the
//! response epoch so an interruption silently invalidates every timer that
//! was already pending.

pub mod captions;
pub mod queue;

use async_trait::async_trait;
use bytes::Bytes;

pub use captions::{CaptionCallback, CaptionWord, reveal_offsets, schedule_reveals};
pub use queue::{PlaybackQueue, PlaybackSegment};

/// Error types for playback operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlaybackError {
    #[error("Audio output error: {0}")]
    Output(String),
    #[error("Output device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Audio output device supplied by the embedding surface.
///
/// At most one instance is active per engine; the engine is the only caller.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Play one segment to completion. Resolves when the audio has finished
    /// (or was stopped). A failed segment is skipped, never retried.
    async fn play(&self, audio: Bytes) -> Result<(), PlaybackError>;

    /// Halt the current segment immediately. Must cause any in-flight
    /// [`play`](Self::play) to resolve promptly.
    async fn stop(&self);
}
