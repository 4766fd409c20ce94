//! Per-connection state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use pulse_core::ids::ConnectionId;
use pulse_core::Identity;

/// What the writer task pulls off a connection's outbound queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized application frame, sent as a text message.
    Frame(String),
    /// A transport-level liveness probe (WebSocket ping).
    Probe,
}

/// Why an outbound send did not go through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendError {
    /// Queue full; the frame is dropped, the connection lives on.
    Full,
    /// Queue closed; the transport is gone.
    Closed,
}

/// One authenticated client session. Owned exclusively by the registry;
/// every other component refers to it by [`ConnectionId`].
pub struct ClientConnection {
    pub id: ConnectionId,
    /// Identity bound at handshake. Never changes afterwards.
    owner: Identity,
    subscriptions: Mutex<HashSet<String>>,
    tx: mpsc::Sender<Outbound>,
    /// Instant after which the connection is presumed dead.
    deadline: Mutex<Instant>,
    dropped_frames: AtomicU64,
}

impl ClientConnection {
    pub fn new(
        id: ConnectionId,
        owner: Identity,
        tx: mpsc::Sender<Outbound>,
        liveness_timeout: Duration,
    ) -> Self {
        Self {
            id,
            owner,
            subscriptions: Mutex::new(HashSet::new()),
            tx,
            deadline: Mutex::new(Instant::now() + liveness_timeout),
            dropped_frames: AtomicU64::new(0),
        }
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn subscribe(&self, channel: &str) {
        let _ = self.subscriptions.lock().insert(channel.to_string());
    }

    pub fn unsubscribe(&self, channel: &str) {
        let _ = self.subscriptions.lock().remove(channel);
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().iter().cloned().collect()
    }

    /// Whether the subscription set intersects the given channels.
    pub fn subscribed_to_any(&self, channels: &[String]) -> bool {
        let subs = self.subscriptions.lock();
        channels.iter().any(|c| subs.contains(c))
    }

    /// Queue an outbound message without blocking.
    pub fn send(&self, out: Outbound) -> Result<(), SendError> {
        match self.tx.try_send(out) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                Err(SendError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::Closed),
        }
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Push the liveness deadline out; called on any inbound traffic.
    pub fn touch(&self, liveness_timeout: Duration) {
        *self.deadline.lock() = Instant::now() + liveness_timeout;
    }

    pub fn deadline(&self) -> Instant {
        *self.deadline.lock()
    }
}
