//! Engine configuration

use std::env;

use crate::errors::{EngineError, EngineResult};
use crate::vad::VadConfig;

/// Reconnect backoff parameters.
///
/// The delay starts at `base_ms`, doubles after every failed attempt, and is
/// capped at `max_ms`. A successful re-authentication resets it to `base_ms`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_ms: 30_000,
        }
    }
}

/// Top-level configuration for a [`VoiceSessionEngine`](crate::engine::VoiceSessionEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// WebSocket endpoint of the speech/response gateway
    pub endpoint: String,
    /// API key sent in the auth handshake
    pub api_key: String,
    /// Reply voice requested on each `start_stream`
    pub voice: String,
    /// Routing mode forwarded to the backend ("general", "agent", ...)
    pub mode: String,
    /// Document routing context; opaque to the engine
    pub selected_document: String,
    /// Sample rate of captured and played PCM in Hz
    pub sample_rate: u32,
    /// Amplitude endpointing parameters
    pub vad: VadConfig,
    /// Reconnect backoff parameters
    pub backoff: BackoffConfig,
    /// Echo cooldown after playback end before barge-in may re-trigger (ms)
    pub barge_in_cooldown_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080".to_string(),
            api_key: String::new(),
            voice: "en-US-Neural2-J".to_string(),
            mode: "general".to_string(),
            selected_document: "all".to_string(),
            sample_rate: 16_000,
            vad: VadConfig::default(),
            backoff: BackoffConfig::default(),
            barge_in_cooldown_ms: 500,
        }
    }
}

impl EngineConfig {
    /// Create a config for the given endpoint and API key, all other fields
    /// at their defaults.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Apply `PARLANCE_ENDPOINT`, `PARLANCE_API_KEY`, `PARLANCE_VOICE` and
    /// `PARLANCE_MODE` environment overrides on top of the current values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = env::var("PARLANCE_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Ok(api_key) = env::var("PARLANCE_API_KEY") {
            self.api_key = api_key;
        }
        if let Ok(voice) = env::var("PARLANCE_VOICE") {
            self.voice = voice;
        }
        if let Ok(mode) = env::var("PARLANCE_MODE") {
            self.mode = mode;
        }
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_selected_document(mut self, document: impl Into<String>) -> Self {
        self.selected_document = document.into();
        self
    }

    pub fn with_vad(mut self, vad: VadConfig) -> Self {
        self.vad = vad;
        self
    }

    /// Validate fields that would otherwise fail deep inside the engine.
    pub fn validate(&self) -> EngineResult<()> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| EngineError::Configuration(format!("invalid endpoint: {}", e)))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(EngineError::Configuration(format!(
                    "endpoint scheme must be ws or wss, got '{}'",
                    other
                )));
            }
        }
        if self.api_key.is_empty() {
            return Err(EngineError::Configuration("api_key must be set".into()));
        }
        if self.sample_rate == 0 {
            return Err(EngineError::Configuration(
                "sample_rate must be non-zero".into(),
            ));
        }
        self.vad.validate().map_err(EngineError::Configuration)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.voice, "en-US-Neural2-J");
        assert_eq!(config.mode, "general");
        assert_eq!(config.selected_document, "all");
        assert_eq!(config.sample_rate, 16_000);
        assert_eq!(config.backoff.base_ms, 1_000);
        assert_eq!(config.backoff.max_ms, 30_000);
        assert_eq!(config.barge_in_cooldown_ms, 500);
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let config = EngineConfig::new("http://example.com", "key");
        assert!(config.validate().is_err());

        let config = EngineConfig::new("not a url", "key");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_api_key() {
        let config = EngineConfig::new("wss://example.com/ws", "");
        assert!(config.validate().is_err());

        let config = EngineConfig::new("wss://example.com/ws", "key");
        assert!(config.validate().is_ok());
    }
}
