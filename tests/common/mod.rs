//! Shared test doubles: in-memory channel transport, recording audio output,
//! and recording surface callbacks.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

use parlance::connection::{Channel, ChannelConnector, ConnectionError};
use parlance::engine::{StateCallback, VisibleState};
use parlance::playback::{AudioOutput, CaptionCallback, PlaybackError};
use parlance::protocol::{ClientMessage, ServerMessage};
use parlance::vad::VadConfig;
use parlance::EngineConfig;

/// Test-side handles to one established mock channel.
pub struct MockLink {
    /// Everything the engine sent over this channel
    pub sent_rx: mpsc::UnboundedReceiver<ClientMessage>,
    /// Inject inbound traffic; dropping this closes the channel
    pub inbound_tx: mpsc::UnboundedSender<ServerMessage>,
}

struct MockChannel {
    sent_tx: mpsc::UnboundedSender<ClientMessage>,
    inbound_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

#[async_trait]
impl Channel for MockChannel {
    async fn send(&mut self, msg: &ClientMessage) -> Result<(), ConnectionError> {
        self.sent_tx
            .send(msg.clone())
            .map_err(|_| ConnectionError::Closed)
    }

    async fn recv(&mut self) -> Option<ServerMessage> {
        self.inbound_rx.recv().await
    }
}

/// Connector handing out in-memory channels; each successful connect delivers
/// a [`MockLink`] to the test.
pub struct MockConnector {
    links_tx: mpsc::UnboundedSender<MockLink>,
    fail_remaining: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockLink>) {
        let (links_tx, links_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                links_tx,
                fail_remaining: AtomicUsize::new(0),
            }),
            links_rx,
        )
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::Release);
    }
}

#[async_trait]
impl ChannelConnector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Channel>, ConnectionError> {
        let remaining = self.fail_remaining.load(Ordering::Acquire);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::Release);
            return Err(ConnectionError::ConnectFailed("mock failure".into()));
        }
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let _ = self.links_tx.send(MockLink { sent_rx, inbound_tx });
        Ok(Box::new(MockChannel { sent_tx, inbound_rx }))
    }
}

/// Audio output that records played segments and finishes each after its
/// real PCM duration (16-bit mono at 16kHz), or immediately when stopped.
pub struct MockOutput {
    pub played: Mutex<Vec<Bytes>>,
    pub play_starts: Mutex<Vec<tokio::time::Instant>>,
    pub stop_count: AtomicUsize,
    fail_remaining: AtomicUsize,
    stopped: Notify,
}

impl MockOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            played: Mutex::new(Vec::new()),
            play_starts: Mutex::new(Vec::new()),
            stop_count: AtomicUsize::new(0),
            fail_remaining: AtomicUsize::new(0),
            stopped: Notify::new(),
        })
    }

    /// Make the next `n` play calls fail without producing audio.
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::Release);
    }

    pub fn played_markers(&self) -> Vec<u8> {
        self.played.lock().iter().map(|a| a[0]).collect()
    }
}

#[async_trait]
impl AudioOutput for MockOutput {
    async fn play(&self, audio: Bytes) -> Result<(), PlaybackError> {
        let remaining = self.fail_remaining.load(Ordering::Acquire);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::Release);
            return Err(PlaybackError::Output("mock output failure".into()));
        }
        self.played.lock().push(audio.clone());
        self.play_starts.lock().push(tokio::time::Instant::now());
        let duration = Duration::from_secs_f64(audio.len() as f64 / 2.0 / 16_000.0);
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.stopped.notified() => {}
        }
        Ok(())
    }

    async fn stop(&self) {
        self.stop_count.fetch_add(1, Ordering::AcqRel);
        self.stopped.notify_waiters();
    }
}

/// Recording surface callbacks
#[derive(Clone, Default)]
pub struct Recorder {
    pub words: Arc<Mutex<Vec<String>>>,
    pub states: Arc<Mutex<Vec<VisibleState>>>,
    pub errors: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn caption_callback(&self) -> CaptionCallback {
        let words = Arc::clone(&self.words);
        Arc::new(move |caption| {
            let words = Arc::clone(&words);
            Box::pin(async move {
                words.lock().push(caption.word);
            })
        })
    }

    pub fn state_callback(&self) -> StateCallback {
        let states = Arc::clone(&self.states);
        Arc::new(move |state| {
            let states = Arc::clone(&states);
            Box::pin(async move {
                states.lock().push(state);
            })
        })
    }

    pub fn error_callback(&self) -> parlance::engine::ErrorCallback {
        let errors = Arc::clone(&self.errors);
        Arc::new(move |message| {
            let errors = Arc::clone(&errors);
            Box::pin(async move {
                errors.lock().push(message);
            })
        })
    }
}

/// A started engine with an authenticated mock channel.
pub struct TestSession {
    pub handle: parlance::EngineHandle,
    pub link: MockLink,
    pub links_rx: mpsc::UnboundedReceiver<MockLink>,
    pub connector: Arc<MockConnector>,
    pub recorder: Recorder,
    pub output: Arc<MockOutput>,
}

/// Start an engine over the mock transport and complete the auth handshake.
pub async fn start_session() -> TestSession {
    let (connector, mut links_rx) = MockConnector::new();
    let recorder = Recorder::default();
    let output = MockOutput::new();
    let adapters = parlance::SurfaceAdapters::new(output.clone() as Arc<dyn AudioOutput>)
        .with_captions(recorder.caption_callback())
        .with_state(recorder.state_callback())
        .with_error(recorder.error_callback());
    let handle = parlance::VoiceSessionEngine::start_with_connector(
        test_config(),
        connector.clone() as Arc<dyn ChannelConnector>,
        adapters,
    )
    .expect("engine start");

    let mut link = links_rx.recv().await.expect("first connect");
    match next_sent(&mut link).await {
        Some(ClientMessage::Auth { api_key }) => assert_eq!(api_key, "test-key"),
        other => panic!("expected auth handshake, got {:?}", other),
    }
    link.inbound_tx
        .send(ServerMessage::Connected {
            session_id: "session-1".to_string(),
            status: Some("ready".to_string()),
        })
        .unwrap();
    settle().await;

    TestSession {
        handle,
        link,
        links_rx,
        connector,
        recorder,
        output,
    }
}

/// Drive one full utterance: speech frames, then enough silence for the
/// hangover to elapse. Returns the request id the engine issued.
pub async fn speak_utterance(session: &mut TestSession) -> String {
    for _ in 0..5 {
        session.handle.push_frame(pcm_frame(0.1));
    }
    settle().await;
    let request_id = session
        .handle
        .registry()
        .current_request_id()
        .expect("capture started")
        .as_str()
        .to_string();
    for _ in 0..12 {
        session.handle.push_frame(pcm_frame(0.001));
    }
    settle().await;
    request_id
}

/// Engine config with test-friendly endpointing: 10ms frames, 100ms hangover.
pub fn test_config() -> EngineConfig {
    EngineConfig::new("ws://gateway.test/ws", "test-key").with_vad(VadConfig {
        speech_threshold: 0.02,
        silence_threshold: 0.01,
        barge_in_threshold: 0.05,
        hangover_ms: 100,
        min_speech_ms: 20,
        frame_duration_ms: 10.0,
    })
}

/// One 10ms constant-amplitude PCM frame (160 samples at 16kHz). The RMS of
/// a constant signal equals its amplitude.
pub fn pcm_frame(amplitude: f32) -> Bytes {
    let value = (amplitude * i16::MAX as f32) as i16;
    let mut bytes = Vec::with_capacity(320);
    for _ in 0..160 {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    Bytes::from(bytes)
}

/// PCM payload of `seconds` at 16kHz filled with `marker` bytes, so tests can
/// identify which segment played.
pub fn pcm_audio(seconds: f64, marker: u8) -> Vec<u8> {
    vec![marker; (seconds * 16_000.0 * 2.0) as usize]
}

/// Let the engine loop and its spawned tasks drain without advancing time.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Pull the next recorded outbound message, letting tasks settle first.
pub async fn next_sent(link: &mut MockLink) -> Option<ClientMessage> {
    settle().await;
    link.sent_rx.try_recv().ok()
}

/// Drain every outbound message currently recorded.
pub async fn drain_sent(link: &mut MockLink) -> Vec<ClientMessage> {
    settle().await;
    let mut msgs = Vec::new();
    while let Ok(msg) = link.sent_rx.try_recv() {
        msgs.push(msg);
    }
    msgs
}
