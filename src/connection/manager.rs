//! Connection lifecycle: handshake, send, reconnect with backoff, teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::channel::ChannelConnector;
use crate::config::BackoffConfig;
use crate::protocol::{ClientMessage, ServerMessage};

/// Lifecycle of the session channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Ready,
    Reconnecting,
    Closed,
}

/// Events surfaced by the manager to the engine loop
#[derive(Debug)]
pub enum ChannelEvent {
    /// Authentication acknowledged; the channel is ready.
    Ready { session_id: String },
    /// One inbound message other than the auth acknowledgement.
    Inbound(ServerMessage),
    /// The channel dropped; a reconnect is scheduled unless torn down.
    Closed,
}

/// Owns the one logical duplex channel of a session.
///
/// `send` is fire-and-forget: it silently drops unless the channel is ready,
/// and callers must not assume delivery. On unexpected closure the manager
/// reconnects with exponential backoff; a successful re-authentication resets
/// the delay to its base. `teardown` marks the session permanently closed and
/// suppresses further reconnects; the flag is checked before every reconnect
/// attempt and before any inbound message is dispatched, since messages can
/// race with teardown.
pub struct ConnectionManager {
    state: Arc<RwLock<ConnectionState>>,
    closed: Arc<AtomicBool>,
    outbound_tx: mpsc::UnboundedSender<ClientMessage>,
    task: JoinHandle<()>,
}

impl ConnectionManager {
    /// Connect and start the reconnect loop. Inbound traffic and lifecycle
    /// transitions are delivered through `events_tx`.
    pub fn start(
        connector: Arc<dyn ChannelConnector>,
        api_key: String,
        backoff_config: BackoffConfig,
        events_tx: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Self {
        let state = Arc::new(RwLock::new(ConnectionState::Connecting));
        let closed = Arc::new(AtomicBool::new(false));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_channel_loop(
            connector,
            api_key,
            Backoff::new(backoff_config),
            Arc::clone(&state),
            Arc::clone(&closed),
            outbound_rx,
            events_tx,
        ));

        Self {
            state,
            closed,
            outbound_tx,
            task,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Fire-and-forget send. Drops the message unless the channel is ready.
    pub fn send(&self, msg: ClientMessage) {
        if !self.is_ready() {
            debug!("Dropping outbound message while channel not ready");
            return;
        }
        // The loop task drains this queue; a send error only means teardown
        // already happened.
        let _ = self.outbound_tx.send(msg);
    }

    /// Permanently close the session. Idempotent.
    pub fn teardown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.state.write() = ConnectionState::Closed;
        self.task.abort();
        info!("Connection torn down");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn run_channel_loop(
    connector: Arc<dyn ChannelConnector>,
    api_key: String,
    mut backoff: Backoff,
    state: Arc<RwLock<ConnectionState>>,
    closed: Arc<AtomicBool>,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientMessage>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
) {
    loop {
        if closed.load(Ordering::Acquire) {
            break;
        }
        *state.write() = ConnectionState::Connecting;

        let mut channel = match connector.connect().await {
            Ok(channel) => channel,
            Err(e) => {
                warn!("Channel connect failed: {}", e);
                if !wait_before_retry(&state, &closed, &mut backoff).await {
                    break;
                }
                continue;
            }
        };

        *state.write() = ConnectionState::Authenticating;
        if let Err(e) = channel
            .send(&ClientMessage::Auth {
                api_key: api_key.clone(),
            })
            .await
        {
            warn!("Auth send failed: {}", e);
            if !wait_before_retry(&state, &closed, &mut backoff).await {
                break;
            }
            continue;
        }

        // Session loop: runs until the channel drops.
        loop {
            tokio::select! {
                inbound = channel.recv() => {
                    let Some(msg) = inbound else { break };
                    if closed.load(Ordering::Acquire) {
                        return;
                    }
                    match msg {
                        ServerMessage::Connected { session_id, .. }
                            if *state.read() != ConnectionState::Ready =>
                        {
                            info!("Authenticated, session {}", session_id);
                            backoff.reset();
                            *state.write() = ConnectionState::Ready;
                            let _ = events_tx.send(ChannelEvent::Ready { session_id });
                        }
                        // Duplicate acknowledgements on an already-ready
                        // channel pass through like any other inbound message.
                        other => {
                            let _ = events_tx.send(ChannelEvent::Inbound(other));
                        }
                    }
                }
                outbound = outbound_rx.recv() => {
                    let Some(msg) = outbound else { return };
                    if let Err(e) = channel.send(&msg).await {
                        warn!("Outbound send failed: {}", e);
                        break;
                    }
                }
            }
        }

        if closed.load(Ordering::Acquire) {
            break;
        }
        let _ = events_tx.send(ChannelEvent::Closed);

        // No implicit queueing across reconnects: anything accepted while the
        // channel was still believed ready is discarded with it.
        while outbound_rx.try_recv().is_ok() {}

        if !wait_before_retry(&state, &closed, &mut backoff).await {
            break;
        }
    }
    *state.write() = ConnectionState::Closed;
}

/// Sleep out the current backoff delay. Returns false when torn down.
async fn wait_before_retry(
    state: &Arc<RwLock<ConnectionState>>,
    closed: &Arc<AtomicBool>,
    backoff: &mut Backoff,
) -> bool {
    if closed.load(Ordering::Acquire) {
        return false;
    }
    *state.write() = ConnectionState::Reconnecting;
    let delay = backoff.next_delay();
    debug!("Reconnecting in {:?}", delay);
    tokio::time::sleep(delay).await;
    !closed.load(Ordering::Acquire)
}
