//! Session and request bookkeeping.
//!
//! The registry issues one stable session identifier for the lifetime of the
//! engine (the same id survives reconnects) and one fresh request identifier
//! per utterance. Every inbound message carrying a `request_id` is compared
//! against the current one and dropped on mismatch, which is what makes
//! network races harmless: a reply generated for an abandoned utterance that
//! arrives after a new one has started is simply ignored.
//!
//! The registry also owns the response epoch, a monotonic counter advanced
//! exactly once per barge-in. Scheduled caption work captures the epoch at
//! schedule time and becomes a no-op once it has moved on.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Globally unique identifier for one capture cycle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of one utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceStatus {
    Capturing,
    AwaitingResponse,
    Playing,
    Cancelled,
    Completed,
}

impl UtteranceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UtteranceStatus::Cancelled | UtteranceStatus::Completed)
    }
}

/// One user speech turn, from detected start to a terminal status
#[derive(Debug, Clone)]
pub struct Utterance {
    pub request_id: RequestId,
    pub status: UtteranceStatus,
}

/// Owned bookkeeping for session id, active utterance and response epoch.
///
/// At most one utterance is non-terminal at any instant: `new_request`
/// cancels whatever was active before issuing the next id.
pub struct SessionRegistry {
    session_id: RwLock<Option<String>>,
    current: RwLock<Option<Utterance>>,
    epoch: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            session_id: RwLock::new(None),
            current: RwLock::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    /// Record the session id acknowledged by the backend.
    pub fn set_session_id(&self, id: impl Into<String>) {
        *self.session_id.write() = Some(id.into());
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Issue a fresh request id for a new utterance.
    ///
    /// Any previous non-terminal utterance is marked cancelled first, so the
    /// one-active-utterance invariant holds across every call path.
    pub fn new_request(&self) -> RequestId {
        let mut current = self.current.write();
        if let Some(utterance) = current.as_mut() {
            if !utterance.status.is_terminal() {
                debug!(
                    "Cancelling utterance {} ({:?}) superseded by new request",
                    utterance.request_id, utterance.status
                );
                utterance.status = UtteranceStatus::Cancelled;
            }
        }
        let request_id = RequestId::generate();
        *current = Some(Utterance {
            request_id: request_id.clone(),
            status: UtteranceStatus::Capturing,
        });
        request_id
    }

    pub fn current_request_id(&self) -> Option<RequestId> {
        self.current
            .read()
            .as_ref()
            .filter(|u| !u.status.is_terminal())
            .map(|u| u.request_id.clone())
    }

    /// Whether `id` belongs to the current non-terminal utterance.
    pub fn is_current(&self, id: &str) -> bool {
        self.current
            .read()
            .as_ref()
            .map(|u| !u.status.is_terminal() && u.request_id.as_str() == id)
            .unwrap_or(false)
    }

    pub fn current_status(&self) -> Option<UtteranceStatus> {
        self.current.read().as_ref().map(|u| u.status)
    }

    /// Advance the current utterance to `status`. No-op when no utterance is
    /// active or the active one is already terminal.
    pub fn set_status(&self, status: UtteranceStatus) {
        if let Some(utterance) = self.current.write().as_mut() {
            if !utterance.status.is_terminal() {
                utterance.status = status;
            }
        }
    }

    /// Cancel the active utterance, returning its request id if there was one.
    pub fn abandon_current(&self) -> Option<RequestId> {
        let mut current = self.current.write();
        match current.as_mut() {
            Some(utterance) if !utterance.status.is_terminal() => {
                utterance.status = UtteranceStatus::Cancelled;
                Some(utterance.request_id.clone())
            }
            _ => None,
        }
    }

    /// Current response epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Advance the response epoch, invalidating all pending caption timers
    /// scheduled under the previous value. Returns the new epoch.
    pub fn advance_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
