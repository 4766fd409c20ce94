use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// In-memory counters for the connection/broadcast path. Cheap to bump from
/// any task; surfaced as a snapshot on the health endpoint.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    connections_opened: AtomicU64,
    connections_reaped: AtomicU64,
    frames_received: AtomicU64,
    frames_sent: AtomicU64,
    broadcast_events: AtomicU64,
    send_failures: AtomicU64,
}

/// Point-in-time view of [`ServerMetrics`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connections_opened: u64,
    pub connections_reaped: u64,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub broadcast_events: u64,
    pub send_failures: u64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        let _ = self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// A connection removed by the liveness watchdog (not a normal close).
    pub fn connection_reaped(&self) {
        let _ = self.connections_reaped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        let _ = self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self) {
        let _ = self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broadcast_event(&self) {
        let _ = self.broadcast_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_failure(&self) {
        let _ = self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_reaped: self.connections_reaped.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            broadcast_events: self.broadcast_events.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}
