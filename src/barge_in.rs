//! Barge-in coordination.
//!
//! When the user starts speaking over assistant audio, the reply in flight is
//! abandoned: playback halts, the queue empties, the response epoch advances
//! (silencing every pending caption timer), and the backend is told to stop
//! generating. The whole sequence runs inside one engine event handler, so no
//! other event can observe a half-applied interruption.
//!
//! A short cooldown after playback fully ends guards against the tail of the
//! assistant's own audio echoing from the speaker into the microphone and
//! re-triggering as phantom speech.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::playback::PlaybackQueue;
use crate::protocol::ClientMessage;
use crate::registry::SessionRegistry;

pub struct BargeInCoordinator {
    cooldown: Duration,
    last_playback_end: Option<Instant>,
}

impl BargeInCoordinator {
    pub fn new(cooldown_ms: u64) -> Self {
        Self {
            cooldown: Duration::from_millis(cooldown_ms),
            last_playback_end: None,
        }
    }

    /// Record that assistant playback fully ended just now.
    pub fn note_playback_end(&mut self) {
        self.last_playback_end = Some(Instant::now());
    }

    /// Whether a speech-start right now should be discarded as acoustic echo
    /// from playback that just finished.
    pub fn within_cooldown(&self) -> bool {
        match self.last_playback_end {
            Some(ended) => ended.elapsed() < self.cooldown,
            None => false,
        }
    }

    /// Abandon the in-flight reply. Returns the cancellation notice to send;
    /// `None` when no utterance was active (nothing to cancel server-side).
    ///
    /// Local state is cleared unconditionally; a failed cancellation send is
    /// non-fatal because late segments for the old request are filtered by
    /// the registry's request-id check anyway.
    pub fn interrupt(
        &mut self,
        registry: &SessionRegistry,
        queue: &mut PlaybackQueue,
    ) -> Option<ClientMessage> {
        queue.clear();
        let epoch = registry.advance_epoch();
        let abandoned = registry.abandon_current();
        match &abandoned {
            Some(request_id) => {
                info!(
                    "Barge-in: abandoned request {} (epoch now {})",
                    request_id, epoch
                );
            }
            None => debug!("Barge-in with no active request (epoch now {})", epoch),
        }
        abandoned.map(|_| ClientMessage::BargeIn {
            session_id: registry.session_id().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::PlaybackSegment;
    use bytes::Bytes;

    fn active_reply(registry: &SessionRegistry, queue: &mut PlaybackQueue) -> String {
        let id = registry.new_request();
        queue.enqueue(
            registry,
            PlaybackSegment {
                request_id: id.as_str().to_string(),
                audio: Bytes::from_static(&[0; 8]),
                text: String::new(),
                words: Vec::new(),
            },
        );
        id.as_str().to_string()
    }

    #[test]
    fn test_interrupt_clears_queue_and_advances_epoch_once() {
        let registry = SessionRegistry::new();
        registry.set_session_id("s-1");
        let mut queue = PlaybackQueue::new();
        let old = active_reply(&registry, &mut queue);
        let mut coordinator = BargeInCoordinator::new(500);

        let epoch_before = registry.epoch();
        let notice = coordinator.interrupt(&registry, &mut queue);

        assert!(queue.is_empty());
        assert!(!queue.is_active());
        assert_eq!(registry.epoch(), epoch_before + 1);
        assert!(!registry.is_current(&old));
        assert!(matches!(
            notice,
            Some(ClientMessage::BargeIn { session_id }) if session_id == "s-1"
        ));
    }

    #[test]
    fn test_interrupt_without_active_request_sends_nothing() {
        let registry = SessionRegistry::new();
        let mut queue = PlaybackQueue::new();
        let mut coordinator = BargeInCoordinator::new(500);

        assert!(coordinator.interrupt(&registry, &mut queue).is_none());
        // Epoch still advances so any stray timers die regardless
        assert_eq!(registry.epoch(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_window() {
        let mut coordinator = BargeInCoordinator::new(500);
        assert!(!coordinator.within_cooldown());

        coordinator.note_playback_end();
        assert!(coordinator.within_cooldown());

        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(coordinator.within_cooldown());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(!coordinator.within_cooldown());
    }
}
