//! Epoch-guarded word-level caption scheduling.
//!
//! One timer is armed per word at its reveal offset. Each timer captures the
//! response epoch at schedule time and checks it again on expiry: a barge-in
//! advances the epoch, turning every pending reveal from the abandoned reply
//! into a silent no-op. Timers are never cancelled explicitly; environment
//! cancellation is not guaranteed to be synchronous, the epoch comparison is.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use super::queue::PlaybackSegment;
use crate::registry::SessionRegistry;

/// One revealed caption word, delivered to the surface in playback order.
#[derive(Debug, Clone)]
pub struct CaptionWord {
    pub request_id: String,
    pub word: String,
    /// Zero-based position within the segment
    pub index: usize,
}

/// Callback type for caption reveals
pub type CaptionCallback =
    Arc<dyn Fn(CaptionWord) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Compute `(word, offset_seconds)` reveal pairs for a segment.
///
/// Exact per-word offsets are used when the backend supplied them. Otherwise
/// the segment duration is divided evenly across the caption's words: word
/// `i` of `n` (1-based) reveals at `duration·i/n`.
pub fn reveal_offsets(segment: &PlaybackSegment, duration_secs: f64) -> Vec<(String, f64)> {
    if !segment.words.is_empty() {
        return segment
            .words
            .iter()
            .map(|w| (w.word.clone(), w.time_seconds))
            .collect();
    }
    let words: Vec<&str> = segment.text.split_whitespace().collect();
    let count = words.len();
    if count == 0 {
        return Vec::new();
    }
    words
        .iter()
        .enumerate()
        .map(|(i, w)| (w.to_string(), duration_secs * (i + 1) as f64 / count as f64))
        .collect()
}

/// Arm one timer per word. Stale timers (epoch advanced) reveal nothing.
pub fn schedule_reveals(
    request_id: &str,
    offsets: Vec<(String, f64)>,
    epoch_at_schedule: u64,
    registry: Arc<SessionRegistry>,
    callback: CaptionCallback,
) {
    for (index, (word, offset_secs)) in offsets.into_iter().enumerate() {
        let registry = Arc::clone(&registry);
        let callback = Arc::clone(&callback);
        let request_id = request_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs_f64(offset_secs.max(0.0))).await;
            if registry.epoch() != epoch_at_schedule {
                trace!("Caption timer for '{}' invalidated by epoch advance", word);
                return;
            }
            callback(CaptionWord {
                request_id,
                word,
                index,
            })
            .await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WordTiming;
    use bytes::Bytes;

    fn segment(text: &str, words: Vec<WordTiming>) -> PlaybackSegment {
        PlaybackSegment {
            request_id: "r".to_string(),
            audio: Bytes::new(),
            text: text.to_string(),
            words,
        }
    }

    #[test]
    fn test_explicit_offsets_used_verbatim() {
        let seg = segment(
            "hello there",
            vec![
                WordTiming {
                    word: "hello".to_string(),
                    time_seconds: 0.12,
                },
                WordTiming {
                    word: "there".to_string(),
                    time_seconds: 0.47,
                },
            ],
        );
        let offsets = reveal_offsets(&seg, 10.0);
        assert_eq!(
            offsets,
            vec![("hello".to_string(), 0.12), ("there".to_string(), 0.47)]
        );
    }

    #[test]
    fn test_fallback_divides_duration_evenly() {
        let seg = segment("one two three four", Vec::new());
        let offsets = reveal_offsets(&seg, 4.0);
        assert_eq!(
            offsets,
            vec![
                ("one".to_string(), 1.0),
                ("two".to_string(), 2.0),
                ("three".to_string(), 3.0),
                ("four".to_string(), 4.0),
            ]
        );
    }

    #[test]
    fn test_fallback_with_empty_text() {
        let seg = segment("", Vec::new());
        assert!(reveal_offsets(&seg, 4.0).is_empty());
    }
}
