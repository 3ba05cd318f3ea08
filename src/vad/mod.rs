//! Voice activity monitoring via amplitude endpointing.
//!
//! The monitor watches frame-by-frame audio energy and decides where spoken
//! utterances start and end. It is independent of network state and runs for
//! the lifetime of the engine without accumulating history: the only state it
//! holds is the current speech/silence accumulators and the timestamp of the
//! last speech end.

pub mod config;
pub mod monitor;

pub use config::VadConfig;
pub use monitor::{VadEvent, VoiceActivityMonitor, frame_energy};
