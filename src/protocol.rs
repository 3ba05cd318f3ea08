//! Duplex channel message shapes.
//!
//! Every message on the wire is a JSON object of the form
//! `{"type": "...", "data": {...}}`. Audio payloads travel as base64-encoded
//! PCM inside the JSON envelope.
//!
//! **Outgoing messages:**
//! - `{"type": "auth", "data": {"api_key": "..."}}` - authenticate the channel
//! - `{"type": "start_stream", "data": {"voice": "...", "mode": "...", "session_id": "...", "selected_document": "..."}}` - announce a new utterance
//! - `{"type": "stt_audio", "data": {"audio": "base64 PCM"}}` - one capture frame
//! - `{"type": "end_speech", "data": {"session_id": "...", "request_id": "..."}}` - utterance complete
//! - `{"type": "barge_in", "data": {"session_id": "..."}}` - cancel the in-flight generation
//!
//! **Incoming messages:**
//! - `{"type": "connected", "data": {"session_id": "...", "status": "ready"}}` - auth acknowledged
//! - `{"type": "stream_started", "data": {"session_id": "..."}}` - capture stream opened server-side
//! - `{"type": "audio_chunk", "data": {"request_id": "...", "audio": "...", "text": "...", "words": [{"word": "...", "time_seconds": 0.0}]}}` - one playback segment
//! - `{"type": "stream_complete", "data": {}}` - no more segments for the current request
//! - `{"type": "error", "data": {"message": "..."}}` - non-fatal server error
//!
//! Messages with an unrecognized `type` are tolerated and ignored; the
//! backend may emit informational types (e.g. `conversation_pair`) whose
//! content the engine never inspects.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Messages sent from the engine to the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth {
        api_key: String,
    },
    StartStream {
        voice: String,
        mode: String,
        session_id: String,
        selected_document: String,
    },
    SttAudio {
        #[serde(with = "base64_serde")]
        audio: Vec<u8>,
    },
    EndSpeech {
        session_id: String,
        request_id: String,
    },
    BargeIn {
        session_id: String,
    },
}

/// Messages received from the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    StreamStarted {
        session_id: String,
    },
    AudioChunk {
        request_id: String,
        #[serde(with = "base64_serde")]
        audio: Vec<u8>,
        #[serde(default)]
        text: String,
        #[serde(default)]
        words: Vec<WordTiming>,
    },
    StreamComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    Error {
        message: String,
    },
}

/// One word of a playback segment with its reveal offset from segment start
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WordTiming {
    pub word: String,
    pub time_seconds: f64,
}

impl ServerMessage {
    /// Parse one inbound text frame.
    ///
    /// Returns `None` for malformed JSON and for well-formed messages whose
    /// `type` the engine does not handle. Neither may crash the loop.
    pub fn parse(raw: &str) -> Option<ServerMessage> {
        let value: serde_json::Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("Malformed inbound message, ignoring: {}", e);
                return None;
            }
        };
        match serde_json::from_value::<ServerMessage>(value.clone()) {
            Ok(msg) => Some(msg),
            Err(_) => {
                let msg_type = value
                    .get("type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("<missing>");
                debug!("Ignoring unhandled inbound message type '{}'", msg_type);
                None
            }
        }
    }
}

impl ClientMessage {
    /// Serialize to the wire representation.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Base64 serialization helper
mod base64_serde {
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        BASE64.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded)
            .map_err(|e| serde::de::Error::custom(format!("Invalid base64: {}", e)))
    }
}
