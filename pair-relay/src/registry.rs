//! Live connection registry.
//!
//! Tracks every accepted connection by [`ConnectionId`] together with the
//! queue its writer task drains. The registry is the relay's
//! [`EventSink`]: delivering an event means queueing it for the target
//! connection, never writing to a socket directly.

use crate::coordinator::EventSink;
use dashmap::DashMap;
use pair_types::{ConnectionId, Event};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Registry entry for one live connection.
#[derive(Debug)]
struct ConnectionHandle {
    outbound: mpsc::Sender<Event>,
    remote_addr: Option<SocketAddr>,
    connected_at: Instant,
}

/// What is known about a connection once it closes.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionInfo {
    /// Peer address, when the transport exposes one.
    pub remote_addr: Option<SocketAddr>,
    /// When the connection was registered.
    pub connected_at: Instant,
}

/// All live connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    ///
    /// Each connection may have up to `queue_capacity` undelivered events;
    /// further events to it are dropped until its writer catches up.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new connection.
    ///
    /// Returns its identifier and the receiving end of its event queue.
    pub fn register(
        &self,
        remote_addr: Option<SocketAddr>,
    ) -> (ConnectionId, mpsc::Receiver<Event>) {
        let (outbound, rx) = mpsc::channel(self.queue_capacity);
        let id = ConnectionId::new();
        self.connections.insert(
            id,
            ConnectionHandle {
                outbound,
                remote_addr,
                connected_at: Instant::now(),
            },
        );

        tracing::debug!(
            "Registered connection {} from {:?} (total: {})",
            id,
            remote_addr,
            self.connections.len()
        );
        (id, rx)
    }

    /// Mark a connection closed.
    ///
    /// Returns the connection's details only for the first call per
    /// connection, so the caller can run disconnect handling exactly once
    /// no matter how many close signals arrive. Dropping the entry drops
    /// the queue's sender, which ends the writer.
    pub fn close(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let (_, handle) = self.connections.remove(&id)?;
        tracing::debug!(
            "Closed connection {} (remaining: {})",
            id,
            self.connections.len()
        );
        Some(ConnectionInfo {
            remote_addr: handle.remote_addr,
            connected_at: handle.connected_at,
        })
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connection is live.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl EventSink for ConnectionRegistry {
    fn send(&self, to: ConnectionId, event: Event) -> bool {
        // Clone the sender so the map shard is not locked while queueing.
        let Some(outbound) = self.connections.get(&to).map(|h| h.outbound.clone()) else {
            tracing::debug!("Dropping {} for closed connection {}", event.name(), to);
            return false;
        };

        match outbound.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::debug!("Queue full, dropping {} for {}", event.name(), to);
                false
            }
            Err(TrySendError::Closed(event)) => {
                tracing::debug!("Writer gone, dropping {} for {}", event.name(), to);
                false
            }
        }
    }
}
