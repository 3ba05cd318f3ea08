//! Capture control: one utterance from speech-start to end-of-speech.
//!
//! `idle → capturing → flushing → idle`. The controller is a pure state
//! machine over the session registry: it decides which protocol messages an
//! utterance produces and the engine forwards them over the channel. Frames
//! arriving outside the capturing state are discarded, which covers both the
//! pre-utterance quiet and the tail of device buffers delivered after
//! end-of-speech.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::protocol::ClientMessage;
use crate::registry::{RequestId, SessionRegistry, UtteranceStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    /// End-of-speech sent; residual device frames are dropped until the
    /// next utterance begins.
    Flushing,
}

/// Per-session capture state machine.
pub struct CaptureController {
    state: CaptureState,
}

impl CaptureController {
    pub fn new() -> Self {
        Self {
            state: CaptureState::Idle,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_capturing(&self) -> bool {
        self.state == CaptureState::Capturing
    }

    /// Begin a new utterance: issue a fresh request id and produce the
    /// `start_stream` announcement.
    ///
    /// Starting while already capturing is an illegal transition and is
    /// refused rather than double-issuing request ids.
    pub fn begin(
        &mut self,
        registry: &SessionRegistry,
        voice: &str,
        mode: &str,
        selected_document: &str,
    ) -> Option<(RequestId, ClientMessage)> {
        if self.state == CaptureState::Capturing {
            warn!("Ignoring capture start while already capturing");
            return None;
        }
        let request_id = registry.new_request();
        self.state = CaptureState::Capturing;
        debug!("Capture started, request {}", request_id);
        let msg = ClientMessage::StartStream {
            voice: voice.to_string(),
            mode: mode.to_string(),
            session_id: registry.session_id().unwrap_or_default(),
            selected_document: selected_document.to_string(),
        };
        Some((request_id, msg))
    }

    /// Wrap one capture frame for forwarding. `None` outside the capturing
    /// state; frames are transient and never buffered.
    pub fn frame_message(&self, frame: &Bytes) -> Option<ClientMessage> {
        if self.state != CaptureState::Capturing {
            return None;
        }
        Some(ClientMessage::SttAudio {
            audio: frame.to_vec(),
        })
    }

    /// Finish the utterance: produce the `end_speech` signal tagged with the
    /// current request id and move to flushing.
    pub fn finish(&mut self, registry: &SessionRegistry) -> Option<ClientMessage> {
        if self.state != CaptureState::Capturing {
            return None;
        }
        self.state = CaptureState::Flushing;
        let request_id = registry.current_request_id()?;
        registry.set_status(UtteranceStatus::AwaitingResponse);
        debug!("Capture finished, request {}", request_id);
        Some(ClientMessage::EndSpeech {
            session_id: registry.session_id().unwrap_or_default(),
            request_id: request_id.as_str().to_string(),
        })
    }

    /// Return to idle, dropping any in-flight capture without emitting
    /// end-of-speech. Used on channel loss and teardown.
    pub fn abort(&mut self) {
        if self.state != CaptureState::Idle {
            debug!("Capture aborted from {:?}", self.state);
        }
        self.state = CaptureState::Idle;
    }

    /// Settle `flushing` back to `idle` once residual frames no longer matter.
    pub fn settle(&mut self) {
        if self.state == CaptureState::Flushing {
            self.state = CaptureState::Idle;
        }
    }
}

impl Default for CaptureController {
    fn default() -> Self {
        Self::new()
    }
}
