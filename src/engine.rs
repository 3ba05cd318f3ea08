//! # Voice Session Engine
//!
//! Central coordinator owning the full microphone-to-speaker pipeline: the
//! voice activity monitor, capture controller, connection manager, playback
//! queue, and barge-in coordinator, plus the session registry that keys all
//! of it.
//!
//! Everything runs on one event loop task: capture frames, inbound channel
//! traffic, playback completions, and teardown are interleaved as events and
//! no two handlers ever run concurrently. Handlers never block: playback and
//! caption timers run as separate tasks that report back through the same
//! event queue, invalidated by epoch/request-id comparison rather than by
//! cancelling them in flight.
//!
//! Embedding surfaces supply device adapters and rendering callbacks through
//! [`SurfaceAdapters`] and drive the engine with an [`EngineHandle`]:
//!
//! ```ignore
//! let adapters = SurfaceAdapters::new(output_device)
//!     .with_captions(caption_cb)
//!     .with_state(state_cb);
//! let handle = VoiceSessionEngine::start(config, adapters)?;
//! // per capture-device buffer:
//! handle.push_frame(pcm_frame);
//! // on explicit user exit:
//! handle.end_session();
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::barge_in::BargeInCoordinator;
use crate::capture::CaptureController;
use crate::config::EngineConfig;
use crate::connection::{ChannelConnector, ChannelEvent, ConnectionManager, WsConnector};
use crate::errors::{EngineError, EngineResult};
use crate::playback::{
    AudioOutput, CaptionCallback, PlaybackQueue, PlaybackSegment, reveal_offsets, schedule_reveals,
};
use crate::protocol::ServerMessage;
use crate::registry::{SessionRegistry, UtteranceStatus};
use crate::vad::{VadEvent, VoiceActivityMonitor, frame_energy};

/// What the surface should render right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibleState {
    Idle,
    /// Capturing the user's utterance
    Listening,
    /// Utterance sent; waiting for the reply to start
    Thinking,
    /// Assistant audio playing or pending
    Speaking,
}

/// Callback type for visible-state transitions
pub type StateCallback =
    Arc<dyn Fn(VisibleState) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for surfaced errors
pub type ErrorCallback =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Device handles and rendering callbacks supplied by the embedding surface.
pub struct SurfaceAdapters {
    pub output: Arc<dyn AudioOutput>,
    pub captions: Option<CaptionCallback>,
    pub on_state: Option<StateCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl SurfaceAdapters {
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self {
            output,
            captions: None,
            on_state: None,
            on_error: None,
        }
    }

    pub fn with_captions(mut self, callback: CaptionCallback) -> Self {
        self.captions = Some(callback);
        self
    }

    pub fn with_state(mut self, callback: StateCallback) -> Self {
        self.on_state = Some(callback);
        self
    }

    pub fn with_error(mut self, callback: ErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }
}

/// Events interleaved on the engine loop
#[derive(Debug)]
pub(crate) enum EngineEvent {
    /// One fixed-size capture buffer from the microphone adapter
    Frame(Bytes),
    /// Channel lifecycle and inbound traffic
    Channel(ChannelEvent),
    /// A playback task finished its segment
    PlaybackFinished {
        request_id: String,
        epoch: u64,
        failed: bool,
    },
    /// The surface failed to acquire its capture device
    DeviceError(String),
    /// Caller-driven session end
    Teardown,
}

/// Entry point for starting an engine instance.
pub struct VoiceSessionEngine;

impl VoiceSessionEngine {
    /// Start the engine against the configured WebSocket endpoint.
    pub fn start(config: EngineConfig, adapters: SurfaceAdapters) -> EngineResult<EngineHandle> {
        let connector = Arc::new(WsConnector::new(config.endpoint.clone()));
        Self::start_with_connector(config, connector, adapters)
    }

    /// Start the engine over a caller-supplied transport.
    pub fn start_with_connector(
        config: EngineConfig,
        connector: Arc<dyn ChannelConnector>,
        adapters: SurfaceAdapters,
    ) -> EngineResult<EngineHandle> {
        config.validate()?;

        let registry = Arc::new(SessionRegistry::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (channel_tx, mut channel_rx) = mpsc::unbounded_channel();

        let conn = ConnectionManager::start(
            connector,
            config.api_key.clone(),
            config.backoff,
            channel_tx,
        );

        // Bridge channel events onto the single engine queue.
        {
            let events_tx = events_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = channel_rx.recv().await {
                    if events_tx.send(EngineEvent::Channel(event)).is_err() {
                        break;
                    }
                }
            });
        }

        let core = EngineCore {
            monitor: VoiceActivityMonitor::new(config.vad),
            capture: CaptureController::new(),
            queue: PlaybackQueue::new(),
            barge_in: BargeInCoordinator::new(config.barge_in_cooldown_ms),
            registry: Arc::clone(&registry),
            events_tx: events_tx.clone(),
            visible: VisibleState::Idle,
            conn,
            adapters,
            config,
        };
        let task = tokio::spawn(core.run(events_rx));

        Ok(EngineHandle {
            events_tx,
            registry,
            setup_in_flight: Arc::new(AtomicBool::new(false)),
            task: Some(task),
        })
    }
}

/// Caller-facing handle to a running engine.
pub struct EngineHandle {
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    registry: Arc<SessionRegistry>,
    setup_in_flight: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Deliver one capture buffer. Called at the device cadence; never blocks.
    pub fn push_frame(&self, frame: Bytes) {
        let _ = self.events_tx.send(EngineEvent::Frame(frame));
    }

    /// Guard device acquisition so two surfaces (or a re-entrant setup) never
    /// open the microphone concurrently. The slot frees when the returned
    /// guard drops.
    pub fn begin_device_setup(&self) -> EngineResult<DeviceSetupGuard> {
        if self
            .setup_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::SetupInProgress);
        }
        Ok(DeviceSetupGuard {
            flag: Arc::clone(&self.setup_in_flight),
        })
    }

    /// Surface a device-acquisition failure (e.g. permission denied). The
    /// engine reports it and waits for the caller to retry setup explicitly.
    /// No automatic retry, since permission prompts must not re-trigger
    /// silently.
    pub fn report_device_error(&self, message: impl Into<String>) {
        let _ = self
            .events_tx
            .send(EngineEvent::DeviceError(message.into()));
    }

    /// Session and request bookkeeping, for surfaces that render request
    /// state directly.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Explicit caller-driven teardown. Idempotent.
    pub fn end_session(&self) {
        let _ = self.events_tx.send(EngineEvent::Teardown);
    }

    /// Wait for the engine loop to finish after [`end_session`](Self::end_session).
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        let _ = self.events_tx.send(EngineEvent::Teardown);
    }
}

/// RAII slot for exclusive device acquisition
pub struct DeviceSetupGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for DeviceSetupGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct EngineCore {
    config: EngineConfig,
    registry: Arc<SessionRegistry>,
    monitor: VoiceActivityMonitor,
    capture: CaptureController,
    queue: PlaybackQueue,
    barge_in: BargeInCoordinator,
    conn: ConnectionManager,
    adapters: SurfaceAdapters,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    visible: VisibleState,
}

impl EngineCore {
    async fn run(mut self, mut events_rx: mpsc::UnboundedReceiver<EngineEvent>) {
        info!("Voice session engine started");
        while let Some(event) = events_rx.recv().await {
            match event {
                EngineEvent::Frame(frame) => self.handle_frame(frame).await,
                EngineEvent::Channel(event) => self.handle_channel(event).await,
                EngineEvent::PlaybackFinished {
                    request_id,
                    epoch,
                    failed,
                } => self.handle_playback_finished(request_id, epoch, failed).await,
                EngineEvent::DeviceError(message) => self.handle_device_error(message).await,
                EngineEvent::Teardown => break,
            }
        }
        self.conn.teardown();
        self.adapters.output.stop().await;
        info!("Voice session engine stopped");
    }

    async fn handle_frame(&mut self, frame: Bytes) {
        let energy = frame_energy(&frame);
        // Raise the speech threshold while assistant audio is active so
        // loudspeaker bleed does not read as barge-in.
        self.monitor.set_elevated_threshold(self.queue.is_active());

        match self.monitor.process(energy) {
            Some(VadEvent::SpeechStart) => self.on_speech_start().await,
            Some(VadEvent::SpeechEnd) => self.on_speech_end().await,
            _ => {}
        }

        if let Some(msg) = self.capture.frame_message(&frame) {
            self.conn.send(msg);
        }
    }

    async fn on_speech_start(&mut self) {
        let reply_active = self.queue.is_active() || self.visible == VisibleState::Speaking;
        if reply_active {
            // Barge-in. Halt, discard, invalidate and cancel all happen
            // before any other event can run.
            self.adapters.output.stop().await;
            if let Some(notice) = self.barge_in.interrupt(&self.registry, &mut self.queue) {
                self.conn.send(notice);
            }
        } else if self.barge_in.within_cooldown() {
            debug!("Ignoring speech start inside echo cooldown");
            self.monitor.reset();
            return;
        }

        self.capture.settle();
        if let Some((request_id, msg)) = self.capture.begin(
            &self.registry,
            &self.config.voice,
            &self.config.mode,
            &self.config.selected_document,
        ) {
            debug!("Utterance {} capturing", request_id);
            self.conn.send(msg);
            self.set_visible(VisibleState::Listening).await;
        }
    }

    async fn on_speech_end(&mut self) {
        if let Some(msg) = self.capture.finish(&self.registry) {
            self.conn.send(msg);
            self.set_visible(VisibleState::Thinking).await;
        }
    }

    async fn handle_channel(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Ready { session_id } => {
                info!("Channel ready, session {}", session_id);
                self.registry.set_session_id(session_id);
            }
            ChannelEvent::Closed => {
                // Request ids are not meaningful across a dropped channel:
                // the in-progress utterance is discarded, not resumed.
                warn!("Channel dropped, discarding in-progress utterance");
                self.adapters.output.stop().await;
                self.queue.clear();
                self.registry.advance_epoch();
                self.registry.abandon_current();
                self.capture.abort();
                self.monitor.reset();
                self.set_visible(VisibleState::Idle).await;
            }
            ChannelEvent::Inbound(msg) => self.handle_inbound(msg).await,
        }
    }

    async fn handle_inbound(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Connected { session_id, .. } => {
                // Duplicate acknowledgement on an already-ready channel; the
                // manager forwards it here. Adopt whatever id the backend
                // last confirmed.
                debug!("Duplicate connected ack, session {}", session_id);
                self.registry.set_session_id(session_id);
            }
            ServerMessage::StreamStarted { session_id } => {
                debug!("Capture stream open server-side (session {})", session_id);
            }
            ServerMessage::AudioChunk {
                request_id,
                audio,
                text,
                words,
            } => {
                let segment = PlaybackSegment {
                    request_id,
                    audio: Bytes::from(audio),
                    text,
                    words,
                };
                if self.queue.enqueue(&self.registry, segment) {
                    self.registry.set_status(UtteranceStatus::Playing);
                    self.play_next().await;
                }
            }
            ServerMessage::StreamComplete { .. } => {
                debug!("Stream complete for current request");
                self.queue.mark_stream_complete();
                if self.queue.is_drained() {
                    self.finish_response().await;
                }
            }
            ServerMessage::Error { message } => {
                warn!("Server error: {}", message);
                self.adapters.output.stop().await;
                self.queue.clear();
                self.registry.advance_epoch();
                self.registry.abandon_current();
                self.capture.abort();
                if let Some(on_error) = &self.adapters.on_error {
                    on_error(message).await;
                }
                self.set_visible(VisibleState::Idle).await;
            }
        }
    }

    /// Begin playback of the head segment if nothing is playing. No-op
    /// otherwise.
    async fn play_next(&mut self) {
        let Some(segment) = self.queue.pop_for_playback() else {
            return;
        };
        self.set_visible(VisibleState::Speaking).await;

        let epoch = self.registry.epoch();
        if let Some(captions) = &self.adapters.captions {
            let duration = segment.duration_secs(self.config.sample_rate);
            let offsets = reveal_offsets(&segment, duration);
            schedule_reveals(
                &segment.request_id,
                offsets,
                epoch,
                Arc::clone(&self.registry),
                Arc::clone(captions),
            );
        }

        let output = Arc::clone(&self.adapters.output);
        let events_tx = self.events_tx.clone();
        let request_id = segment.request_id.clone();
        tokio::spawn(async move {
            let failed = output.play(segment.audio).await.is_err();
            let _ = events_tx.send(EngineEvent::PlaybackFinished {
                request_id,
                epoch,
                failed,
            });
        });
    }

    async fn handle_playback_finished(&mut self, request_id: String, epoch: u64, failed: bool) {
        if epoch != self.registry.epoch() {
            // Halted by an interruption; the interrupt handler already
            // rebuilt state.
            return;
        }
        if failed {
            warn!(
                "Playback failed for a segment of request {}, skipping to next",
                request_id
            );
        }
        self.queue.finish_playing();
        self.barge_in.note_playback_end();
        if self.queue.is_drained() {
            self.finish_response().await;
        } else {
            self.play_next().await;
        }
    }

    async fn finish_response(&mut self) {
        self.registry.set_status(UtteranceStatus::Completed);
        self.queue.clear();
        self.capture.settle();
        self.set_visible(VisibleState::Idle).await;
    }

    async fn handle_device_error(&mut self, message: String) {
        // Terminal until the caller retries setup; no automatic retry.
        warn!("Capture device unavailable: {}", message);
        self.capture.abort();
        self.monitor.reset();
        if let Some(on_error) = &self.adapters.on_error {
            on_error(message).await;
        }
        self.set_visible(VisibleState::Idle).await;
    }

    async fn set_visible(&mut self, state: VisibleState) {
        if self.visible == state {
            return;
        }
        self.visible = state;
        if let Some(on_state) = &self.adapters.on_state {
            on_state(state).await;
        }
    }
}
