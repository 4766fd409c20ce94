//! Registry of all live connections.
//!
//! Single shared component mutated by admission, removal, subscription
//! changes, the heartbeat watchdogs, and broadcast reads. DashMap keeps
//! entries internally consistent; a connection is either fully present or
//! absent, never half-added. The registry performs no I/O of its own —
//! "sending" here only queues onto a connection's outbound channel.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use pulse_core::ids::{ConnectionId, UserId};
use pulse_core::Identity;

use crate::connection::{ClientConnection, Outbound, SendError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate connection handle: {0}")]
    DuplicateHandle(ConnectionId),
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
    max_send_queue: usize,
    liveness_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize, liveness_timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue,
            liveness_timeout,
        }
    }

    /// Register a connection for a verified identity. Returns the handle and
    /// the receiving end of its outbound queue.
    pub fn admit(
        &self,
        owner: Identity,
    ) -> Result<(ConnectionId, mpsc::Receiver<Outbound>), RegistryError> {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let conn = Arc::new(ClientConnection::new(
            id.clone(),
            owner,
            tx,
            self.liveness_timeout,
        ));
        match self.connections.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(RegistryError::DuplicateHandle(id))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let _ = entry.insert(conn);
                debug!(connection_id = %id, "connection admitted");
                Ok((id, rx))
            }
        }
    }

    /// Remove a connection. Idempotent; removing an absent handle is a no-op.
    /// Dropping the entry drops the outbound sender, which ends the writer
    /// task and closes the transport.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.remove(id).is_some();
        if removed {
            debug!(connection_id = %id, "connection removed");
        }
        removed
    }

    pub fn subscribe(&self, id: &ConnectionId, channel: &str) -> Result<(), RegistryError> {
        let conn = self
            .connections
            .get(id)
            .ok_or_else(|| RegistryError::UnknownConnection(id.clone()))?;
        conn.subscribe(channel);
        Ok(())
    }

    pub fn unsubscribe(&self, id: &ConnectionId, channel: &str) -> Result<(), RegistryError> {
        let conn = self
            .connections
            .get(id)
            .ok_or_else(|| RegistryError::UnknownConnection(id.clone()))?;
        conn.unsubscribe(channel);
        Ok(())
    }

    /// Every live connection whose subscription set intersects `channels`.
    /// The order is whatever one pass over the table yields: stable within
    /// this call, not a contract across calls.
    pub fn matching_connections(&self, channels: &[String]) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| entry.value().subscribed_to_any(channels))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn owner(&self, id: &ConnectionId) -> Option<Identity> {
        self.connections.get(id).map(|c| c.owner().clone())
    }

    pub fn subscriptions(&self, id: &ConnectionId) -> Option<Vec<String>> {
        self.connections.get(id).map(|c| c.subscriptions())
    }

    /// Queue a serialized frame for one connection. An unknown handle reads
    /// as a closed transport.
    pub fn send(&self, id: &ConnectionId, json: String) -> Result<(), SendError> {
        match self.connections.get(id) {
            Some(conn) => conn.send(Outbound::Frame(json)),
            None => Err(SendError::Closed),
        }
    }

    /// Reset a connection's liveness deadline.
    pub fn touch(&self, id: &ConnectionId) {
        if let Some(conn) = self.connections.get(id) {
            conn.touch(self.liveness_timeout);
        }
    }

    pub fn deadline(&self, id: &ConnectionId) -> Option<Instant> {
        self.connections.get(id).map(|c| c.deadline())
    }

    /// Queue a transport probe to every live connection.
    pub fn probe_all(&self) -> usize {
        let mut probed = 0;
        for entry in self.connections.iter() {
            if entry.value().send(Outbound::Probe).is_ok() {
                probed += 1;
            }
        }
        probed
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Owners of all live connections (one entry per connection).
    pub fn connected_users(&self) -> Vec<UserId> {
        self.connections
            .iter()
            .map(|entry| entry.value().owner().user_id.clone())
            .collect()
    }
}
