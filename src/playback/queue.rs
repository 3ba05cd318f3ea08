//! FIFO buffering of reply segments for the active request.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::debug;

use crate::protocol::WordTiming;
use crate::registry::SessionRegistry;

/// One reply chunk: audio plus its caption text and word timings.
#[derive(Debug, Clone)]
pub struct PlaybackSegment {
    pub request_id: String,
    pub audio: Bytes,
    pub text: String,
    pub words: Vec<WordTiming>,
}

impl PlaybackSegment {
    /// Duration of the PCM payload in seconds (16-bit mono).
    ///
    /// Used as the caption fallback window when no explicit word offsets are
    /// supplied.
    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        let samples = self.audio.len() / 2;
        samples as f64 / sample_rate as f64
    }
}

/// Segment FIFO for the active request.
///
/// Segments for any request other than the current one are dropped at the
/// door. Playback state is a single `playing` latch: `pop_for_playback`
/// yields nothing while a segment is already playing or the queue is empty,
/// so calling it redundantly never double-starts playback.
pub struct PlaybackQueue {
    queue: VecDeque<PlaybackSegment>,
    playing: bool,
    stream_complete: bool,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            playing: false,
            stream_complete: false,
        }
    }

    /// Append a segment if it belongs to the current request. Returns whether
    /// it was accepted.
    pub fn enqueue(&mut self, registry: &SessionRegistry, segment: PlaybackSegment) -> bool {
        if !registry.is_current(&segment.request_id) {
            debug!(
                "Dropping segment for stale request {} ({} bytes)",
                segment.request_id,
                segment.audio.len()
            );
            return false;
        }
        self.queue.push_back(segment);
        true
    }

    /// Take the head segment for playback. `None` while already playing or
    /// empty; the caller must report completion via
    /// [`finish_playing`](Self::finish_playing).
    pub fn pop_for_playback(&mut self) -> Option<PlaybackSegment> {
        if self.playing {
            return None;
        }
        let segment = self.queue.pop_front()?;
        self.playing = true;
        Some(segment)
    }

    /// Mark the in-flight segment as finished (played or skipped).
    pub fn finish_playing(&mut self) {
        self.playing = false;
    }

    /// Record that the backend has no more segments for this request.
    pub fn mark_stream_complete(&mut self) {
        self.stream_complete = true;
    }

    /// Whether assistant audio is playing or still queued.
    pub fn is_active(&self) -> bool {
        self.playing || !self.queue.is_empty()
    }

    /// Whether the reply has fully drained: completion signal seen, queue
    /// empty, nothing playing.
    pub fn is_drained(&self) -> bool {
        self.stream_complete && !self.is_active()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Discard everything: queued segments, the playing latch, and the
    /// completion flag. Used on barge-in, channel loss, and response end.
    pub fn clear(&mut self) {
        if !self.queue.is_empty() {
            debug!("Discarding {} queued segment(s)", self.queue.len());
        }
        self.queue.clear();
        self.playing = false;
        self.stream_complete = false;
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}
