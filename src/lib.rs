//! # parlance
//!
//! Real-time voice session engine: continuous microphone endpointing, duplex
//! audio streaming to a speech/response gateway, playback of synthesized
//! replies with word-synchronized captions, and instantaneous barge-in.
//!
//! Embedding surfaces (inline app, floating widget, chat bubble) supply the
//! device adapters and rendering callbacks; the engine owns everything in
//! between. See [`engine::VoiceSessionEngine`] for the entry point.

pub mod barge_in;
pub mod capture;
pub mod config;
pub mod connection;
pub mod engine;
pub mod errors;
pub mod playback;
pub mod protocol;
pub mod registry;
pub mod vad;

// Re-export commonly used items for convenience
pub use config::{BackoffConfig, EngineConfig};
pub use engine::{
    EngineHandle, ErrorCallback, StateCallback, SurfaceAdapters, VisibleState, VoiceSessionEngine,
};
pub use errors::{EngineError, EngineResult};
pub use playback::{AudioOutput, CaptionCallback, CaptionWord, PlaybackError};
pub use protocol::{ClientMessage, ServerMessage, WordTiming};
pub use registry::{RequestId, SessionRegistry, UtteranceStatus};
pub use vad::{VadConfig, VadEvent, VoiceActivityMonitor};
