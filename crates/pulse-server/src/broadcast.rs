//! Event fan-out to subscribed connections.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use pulse_core::UpdateEvent;
use pulse_telemetry::ServerMetrics;

use crate::connection::SendError;
use crate::frames::Frame;
use crate::registry::ConnectionRegistry;

/// Delivers update events to every connection subscribed to a matching
/// channel. Delivery is at-most-once and best-effort per connection; there
/// is no acknowledgment, retry, or cross-connection ordering.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<ServerMetrics>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, metrics: Arc<ServerMetrics>) -> Self {
        Self { registry, metrics }
    }

    /// Fan out an event to the channels it derives for itself.
    pub fn broadcast(&self, event: &UpdateEvent) -> usize {
        self.broadcast_to(event, &event.channels())
    }

    /// Fan out an event to an explicit channel set. Returns the number of
    /// connections the frame was queued for.
    ///
    /// A broadcast racing a concurrent subscribe may or may not reach the
    /// subscribing connection; each call sees one consistent registry pass,
    /// nothing more.
    pub fn broadcast_to(&self, event: &UpdateEvent, channels: &[String]) -> usize {
        let json = Frame::updated(event).encode();
        let matched = self.registry.matching_connections(channels);
        self.metrics.broadcast_event();
        debug!(
            kind = event.kind(),
            channels = channels.len(),
            matched = matched.len(),
            "broadcasting event"
        );

        let mut delivered = 0;
        for id in matched {
            match self.registry.send(&id, json.clone()) {
                Ok(()) => {
                    delivered += 1;
                    self.metrics.frame_sent();
                }
                Err(SendError::Full) => {
                    // Backpressure is not death; this connection just misses
                    // one event.
                    self.metrics.send_failure();
                    warn!(connection_id = %id, "send queue full, dropping event");
                }
                Err(SendError::Closed) => {
                    // Transport is gone; reap it and keep delivering to the
                    // rest.
                    self.metrics.send_failure();
                    let _ = self.registry.remove(&id);
                    warn!(connection_id = %id, "transport closed mid-broadcast, removed");
                }
            }
        }
        delivered
    }
}

/// Bridge an in-process event bus onto the broadcaster, so mutation paths
/// can publish without holding a reference to the server.
pub fn spawn_bridge(
    broadcaster: Arc<Broadcaster>,
    mut rx: broadcast::Receiver<UpdateEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let _ = broadcaster.broadcast(&event);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "event bridge lagged, dropped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("event bus closed, stopping bridge");
                    break;
                }
            }
        }
    })
}
