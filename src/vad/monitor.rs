//! Amplitude endpointing state machine.
//!
//! ```text
//! [Idle] ───── energy > speech threshold ─────► [Speaking]
//!
//! [Speaking] ── energy < silence threshold ──► [Hangover running]
//!     ▲                                              │
//!     └──── energy > speech threshold ───────────────┘
//!                  (SpeechResumed)
//!
//! [Hangover running] ── silence ≥ hangover ──► SpeechEnd, back to [Idle]
//! ```
//!
//! The hangover interval is accumulated arithmetically from fixed-duration
//! frames rather than armed as a wall-clock timer, so there is nothing to
//! leak and nothing to cancel: continuous operation holds constant state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use tracing::{debug, info};

use super::config::VadConfig;

/// Event emitted by the monitor on a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Energy rose above the speech threshold from idle.
    SpeechStart,

    /// Energy dropped below the silence threshold while speaking; the
    /// hangover interval has started but not yet elapsed.
    SilenceDetected,

    /// Energy rose above the speech threshold before the hangover elapsed.
    /// A mid-utterance pause, not an utterance boundary.
    SpeechResumed,

    /// The hangover interval elapsed without energy rising again.
    SpeechEnd,
}

/// Compute the normalized RMS energy of one little-endian 16-bit PCM frame.
///
/// Returns a value in `0.0..=1.0`. Odd trailing bytes are ignored.
pub fn frame_energy(frame: &[u8]) -> f32 {
    let sample_count = frame.len() / 2;
    if sample_count == 0 {
        return 0.0;
    }
    let mut sum_squares = 0.0f64;
    for chunk in frame.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]) as f64 / i16::MAX as f64;
        sum_squares += sample * sample;
    }
    (sum_squares / sample_count as f64).sqrt() as f32
}

/// Frame-driven voice activity monitor.
///
/// Call [`process`](Self::process) once per fixed-duration energy frame.
/// Thread-safe; all hot-path state is atomic.
pub struct VoiceActivityMonitor {
    config: VadConfig,

    /// Whether we are inside a speech segment (including its hangover).
    is_speaking: AtomicBool,

    /// Accumulated speech duration in the current segment (ms).
    speech_ms: AtomicU64,

    /// Accumulated silence since the last speech frame (ms).
    silence_ms: AtomicU64,

    /// Whether the elevated barge-in threshold is in effect.
    elevated: AtomicBool,

    /// When the last utterance ended.
    last_speech_end: parking_lot::RwLock<Option<Instant>>,
}

impl VoiceActivityMonitor {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            is_speaking: AtomicBool::new(false),
            speech_ms: AtomicU64::new(0),
            silence_ms: AtomicU64::new(0),
            elevated: AtomicBool::new(false),
            last_speech_end: parking_lot::RwLock::new(None),
        }
    }

    /// Switch between the normal and the elevated speech threshold.
    ///
    /// The engine raises the threshold while assistant audio is active so
    /// that loudspeaker bleed does not register as barge-in.
    pub fn set_elevated_threshold(&self, elevated: bool) {
        self.elevated.store(elevated, Ordering::Release);
    }

    fn active_speech_threshold(&self) -> f32 {
        if self.elevated.load(Ordering::Acquire) {
            self.config.barge_in_threshold
        } else {
            self.config.speech_threshold
        }
    }

    /// Process one energy frame and return any triggered event.
    pub fn process(&self, energy: f32) -> Option<VadEvent> {
        let was_speaking = self.is_speaking.load(Ordering::Acquire);
        let frame_ms = self.config.frame_duration_ms as u64;

        if energy > self.active_speech_threshold() {
            self.process_speech_frame(was_speaking, frame_ms)
        } else if energy < self.config.silence_threshold {
            self.process_silence_frame(was_speaking, frame_ms)
        } else {
            // Between thresholds: neither starts speech nor rescinds a
            // running hangover.
            self.process_ambiguous_frame(was_speaking, frame_ms)
        }
    }

    fn process_speech_frame(&self, was_speaking: bool, frame_ms: u64) -> Option<VadEvent> {
        self.speech_ms.fetch_add(frame_ms, Ordering::Relaxed);
        let silence_before = self.silence_ms.swap(0, Ordering::AcqRel);

        if !was_speaking {
            self.is_speaking.store(true, Ordering::Release);
            debug!("VAD: speech started");
            return Some(VadEvent::SpeechStart);
        }
        if silence_before > 0 {
            debug!("VAD: speech resumed after {}ms silence", silence_before);
            return Some(VadEvent::SpeechResumed);
        }
        None
    }

    fn process_silence_frame(&self, was_speaking: bool, frame_ms: u64) -> Option<VadEvent> {
        if !was_speaking {
            return None;
        }
        let silence_before = self.silence_ms.fetch_add(frame_ms, Ordering::AcqRel);
        let silence_now = silence_before + frame_ms;
        let speech_ms = self.speech_ms.load(Ordering::Acquire);

        if silence_now >= self.config.hangover_ms {
            return Some(self.finish_segment(silence_now, speech_ms));
        }
        if silence_before == 0 && speech_ms >= self.config.min_speech_ms {
            debug!("VAD: silence after {}ms of speech", speech_ms);
            return Some(VadEvent::SilenceDetected);
        }
        None
    }

    fn process_ambiguous_frame(&self, was_speaking: bool, frame_ms: u64) -> Option<VadEvent> {
        if !was_speaking {
            return None;
        }
        // A running hangover keeps running; quiet-but-not-silent energy does
        // not count as the speaker talking again.
        if self.silence_ms.load(Ordering::Acquire) > 0 {
            let silence_now = self.silence_ms.fetch_add(frame_ms, Ordering::AcqRel) + frame_ms;
            let speech_ms = self.speech_ms.load(Ordering::Acquire);
            if silence_now >= self.config.hangover_ms {
                return Some(self.finish_segment(silence_now, speech_ms));
            }
        } else {
            self.speech_ms.fetch_add(frame_ms, Ordering::Relaxed);
        }
        None
    }

    fn finish_segment(&self, silence_now: u64, speech_ms: u64) -> VadEvent {
        self.is_speaking.store(false, Ordering::Release);
        self.speech_ms.store(0, Ordering::Release);
        self.silence_ms.store(0, Ordering::Release);
        *self.last_speech_end.write() = Some(Instant::now());
        info!(
            "VAD: speech ended after {}ms silence (speech={}ms)",
            silence_now, speech_ms
        );
        VadEvent::SpeechEnd
    }

    /// Whether the monitor currently considers the user to be speaking
    /// (including a running hangover interval).
    pub fn is_speaking(&self) -> bool {
        self.is_speaking.load(Ordering::Acquire)
    }

    /// When the last utterance ended, if any has.
    pub fn last_speech_end(&self) -> Option<Instant> {
        *self.last_speech_end.read()
    }

    /// Drop any in-progress segment and return to idle.
    pub fn reset(&self) {
        self.is_speaking.store(false, Ordering::Release);
        self.speech_ms.store(0, Ordering::Release);
        self.silence_ms.store(0, Ordering::Release);
        debug!("VAD: monitor reset");
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }
}

impl Default for VoiceActivityMonitor {
    fn default() -> Self {
        Self::new(VadConfig::default())
    }
}
