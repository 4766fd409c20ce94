//! Liveness monitoring.
//!
//! Two independent mechanisms, deliberately not collapsed into one:
//! - a per-connection watchdog that reaps the connection once its deadline
//!   passes without a reset (any inbound traffic resets it), and
//! - a process-wide prober that pings every live connection on a fixed
//!   interval so that idle-but-healthy clients keep producing pongs.
//!
//! Folding them together would change behavior: a chatty client that never
//! answers probes must still survive, and a silent one must still be probed.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

use pulse_core::ids::ConnectionId;

use crate::registry::ConnectionRegistry;

/// Outcome of a connection's watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// The deadline passed; the connection was removed from the registry.
    TimedOut,
    /// The connection disappeared from the registry (normal close).
    Gone,
    /// The watchdog was cancelled externally.
    Cancelled,
}

/// Watch one connection's liveness deadline. Sleeps until the deadline,
/// re-checks (the deadline moves on every inbound frame or pong), and on
/// expiry removes the handle — which drops the outbound queue and thereby
/// closes the transport. Fire-and-forget: nobody else is notified.
pub async fn run_watchdog(
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
    cancel: CancellationToken,
) -> WatchdogOutcome {
    loop {
        let Some(deadline) = registry.deadline(&id) else {
            return WatchdogOutcome::Gone;
        };
        if time::Instant::now() >= deadline {
            info!(connection_id = %id, "liveness deadline elapsed, reaping connection");
            let _ = registry.remove(&id);
            return WatchdogOutcome::TimedOut;
        }
        tokio::select! {
            () = time::sleep_until(deadline) => {}
            () = cancel.cancelled() => return WatchdogOutcome::Cancelled,
        }
    }
}

/// Probe every live connection on a fixed interval until cancelled.
pub fn spawn_prober(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.tick().await; // consume the immediate first tick
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let probed = registry.probe_all();
                    trace!(probed, "sent liveness probes");
                }
                () = cancel.cancelled() => break,
            }
        }
    })
}
