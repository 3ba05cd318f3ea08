//! Configuration for amplitude endpointing

/// Parameters controlling when the [`VoiceActivityMonitor`](super::VoiceActivityMonitor)
/// emits events.
///
/// Energies are RMS amplitudes normalized to `0.0..=1.0`. The speech
/// threshold is stricter than the silence threshold so that background noise
/// sitting between the two neither starts an utterance nor resets a running
/// hangover interval.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Energy above this value counts as intentional foreground speech.
    pub speech_threshold: f32,

    /// Energy below this value counts as silence while speaking.
    pub silence_threshold: f32,

    /// Elevated speech threshold applied while assistant audio is playing,
    /// distinguishing genuine barge-in from loudspeaker bleed into the mic.
    pub barge_in_threshold: f32,

    /// Continuous silence required after speech before `SpeechEnd` fires (ms).
    ///
    /// Debounces breaths and mid-sentence pauses without merging genuinely
    /// separate utterances.
    pub hangover_ms: u64,

    /// Minimum accumulated speech before a `SilenceDetected` notification is
    /// emitted (ms). Filters out clicks and brief filler sounds; `SpeechEnd`
    /// itself always fires once the hangover elapses so that every started
    /// segment terminates.
    pub min_speech_ms: u64,

    /// Duration of one energy frame (ms), derived from the capture cadence.
    pub frame_duration_ms: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: 0.02,
            silence_threshold: 0.01,
            barge_in_threshold: 0.05,
            hangover_ms: 1_200,
            min_speech_ms: 250,
            frame_duration_ms: 32.0, // 512 samples at 16kHz
        }
    }
}

impl VadConfig {
    /// Derive the frame duration from the capture device's buffer size.
    pub fn from_frame_size(sample_rate: u32, samples_per_frame: u32) -> Self {
        Self {
            frame_duration_ms: (samples_per_frame as f32 / sample_rate as f32) * 1000.0,
            ..Self::default()
        }
    }

    pub fn with_speech_threshold(mut self, threshold: f32) -> Self {
        self.speech_threshold = threshold;
        self
    }

    pub fn with_silence_threshold(mut self, threshold: f32) -> Self {
        self.silence_threshold = threshold;
        self
    }

    pub fn with_barge_in_threshold(mut self, threshold: f32) -> Self {
        self.barge_in_threshold = threshold;
        self
    }

    pub fn with_hangover_ms(mut self, hangover_ms: u64) -> Self {
        self.hangover_ms = hangover_ms;
        self
    }

    pub fn with_min_speech_ms(mut self, min_speech_ms: u64) -> Self {
        self.min_speech_ms = min_speech_ms;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.silence_threshold >= self.speech_threshold {
            return Err(format!(
                "silence_threshold ({}) must be below speech_threshold ({})",
                self.silence_threshold, self.speech_threshold
            ));
        }
        if self.barge_in_threshold < self.speech_threshold {
            return Err(format!(
                "barge_in_threshold ({}) must be at least speech_threshold ({})",
                self.barge_in_threshold, self.speech_threshold
            ));
        }
        if self.frame_duration_ms <= 0.0 {
            return Err("frame_duration_ms must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VadConfig::default();
        assert_eq!(config.hangover_ms, 1_200);
        assert_eq!(config.min_speech_ms, 250);
        assert_eq!(config.frame_duration_ms, 32.0);
        assert!(config.silence_threshold < config.speech_threshold);
        assert!(config.barge_in_threshold > config.speech_threshold);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_frame_size() {
        let config = VadConfig::from_frame_size(16_000, 512);
        assert_eq!(config.frame_duration_ms, 32.0);

        let config = VadConfig::from_frame_size(8_000, 256);
        assert_eq!(config.frame_duration_ms, 32.0);
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let config = VadConfig::default()
            .with_speech_threshold(0.01)
            .with_silence_threshold(0.02);
        assert!(config.validate().is_err());
    }
}
