//! Connection Registry
//!
//! Owns every live connection: its outbound queue, termination handle and
//! heartbeat liveness flag. Enforces the connection cap at admission.

use std::collections::HashMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::protocol::ServerMessage;
use crate::domain::subscription::ConnectionId;

/// Frame queued for a connection's socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text message.
    Message(ServerMessage),
    /// Transport-level ping.
    Ping,
}

/// Sending half of a connection's outbound queue.
pub type OutboundSender = mpsc::Sender<Outbound>;

/// Result of a successful admission.
#[derive(Debug, Clone)]
pub struct Admission {
    /// Assigned connection ID.
    pub id: ConnectionId,
    /// Cancelled when the connection is removed for any reason.
    pub terminate: CancellationToken,
}

/// Admission error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    /// Connection cap reached.
    #[error("server at capacity ({max} connections)")]
    AtCapacity {
        /// Configured maximum.
        max: usize,
    },
    /// Service is shutting down.
    #[error("server is shutting down")]
    ShuttingDown,
}

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendFailure {
    /// No such connection.
    #[error("unknown connection")]
    Unknown,
    /// Socket writer has gone away.
    #[error("outbound queue closed")]
    Closed,
    /// Outbound queue is full.
    #[error("outbound queue full")]
    Full,
}

/// Why a connection was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Client closed the connection or the socket failed.
    Closed,
    /// No pong between two heartbeat sweeps.
    HeartbeatTimeout,
    /// Outbound queue closed or full.
    Unwritable,
    /// Service shutdown.
    Shutdown,
}

impl RemovalReason {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Unwritable => "unwritable",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug)]
struct Connection {
    sender: OutboundSender,
    terminate: CancellationToken,
    awaiting_pong: bool,
    connected_at: Instant,
}

impl Connection {
    fn try_send(&self, outbound: Outbound) -> Result<(), SendFailure> {
        self.sender.try_send(outbound).map_err(|e| match e {
            TrySendError::Full(_) => SendFailure::Full,
            TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    fn is_writable(&self) -> bool {
        !self.sender.is_closed() && self.sender.capacity() > 0
    }
}

/// Outcome of one heartbeat pass.
#[derive(Debug, Default)]
pub struct HeartbeatPass {
    /// Connections pinged this pass.
    pub pinged: usize,
    /// Connections to remove, with the reason.
    pub expired: Vec<(ConnectionId, RemovalReason)>,
}

/// Live connections keyed by ID.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create an empty registry with the given cap.
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            max_connections,
        }
    }

    /// Register a new connection.
    ///
    /// # Errors
    ///
    /// Returns `AdmissionError::AtCapacity` when the cap is reached.
    pub fn admit(
        &mut self,
        sender: OutboundSender,
        now: Instant,
    ) -> Result<Admission, AdmissionError> {
        if self.connections.len() >= self.max_connections {
            return Err(AdmissionError::AtCapacity {
                max: self.max_connections,
            });
        }

        let id = ConnectionId::new();
        let terminate = CancellationToken::new();
        self.connections.insert(
            id,
            Connection {
                sender,
                terminate: terminate.clone(),
                awaiting_pong: false,
                connected_at: now,
            },
        );

        Ok(Admission { id, terminate })
    }

    /// Deregister a connection and signal its socket tasks to stop.
    ///
    /// Returns `false` if the connection was already gone.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        let Some(connection) = self.connections.remove(&id) else {
            return false;
        };
        connection.terminate.cancel();
        tracing::trace!(
            connection_id = %id,
            lifetime_secs = connection.connected_at.elapsed().as_secs(),
            "Connection deregistered"
        );
        true
    }

    /// Queue a frame for a connection without waiting.
    ///
    /// # Errors
    ///
    /// Returns `SendFailure` if the connection is unknown or its queue is
    /// closed or full.
    pub fn send(&self, id: ConnectionId, outbound: Outbound) -> Result<(), SendFailure> {
        self.connections
            .get(&id)
            .ok_or(SendFailure::Unknown)?
            .try_send(outbound)
    }

    /// Clear the liveness flag.
    pub fn record_pong(&mut self, id: ConnectionId) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.awaiting_pong = false;
        }
    }

    /// Run one heartbeat pass.
    ///
    /// Connections still awaiting a pong from the previous pass expire;
    /// the rest are pinged and flagged. Nothing is removed here.
    pub fn heartbeat(&mut self) -> HeartbeatPass {
        let mut pass = HeartbeatPass::default();

        for (id, connection) in &mut self.connections {
            if connection.awaiting_pong {
                pass.expired.push((*id, RemovalReason::HeartbeatTimeout));
                continue;
            }

            match connection.try_send(Outbound::Ping) {
                Ok(()) => {
                    connection.awaiting_pong = true;
                    pass.pinged += 1;
                }
                Err(_) => pass.expired.push((*id, RemovalReason::Unwritable)),
            }
        }

        pass
    }

    /// Check whether a connection exists and can accept a frame.
    #[must_use]
    pub fn is_writable(&self, id: ConnectionId) -> bool {
        self.connections.get(&id).is_some_and(Connection::is_writable)
    }

    /// Check whether a connection exists.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Check whether a connection is awaiting a pong.
    #[must_use]
    pub fn is_awaiting_pong(&self, id: ConnectionId) -> bool {
        self.connections.get(&id).is_some_and(|c| c.awaiting_pong)
    }

    /// IDs of every live connection.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check whether there are no live connections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Configured connection cap.
    #[must_use]
    pub const fn max_connections(&self) -> usize {
        self.max_connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (OutboundSender, mpsc::Receiver<Outbound>) {
        mpsc::channel(4)
    }

    #[test]
    fn admit_assigns_unique_ids() {
        let mut registry = ConnectionRegistry::new(10);
        let (tx, _rx) = channel();

        let a = registry.admit(tx.clone(), Instant::now()).unwrap();
        let b = registry.admit(tx, Instant::now()).unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn admit_rejects_at_capacity() {
        let mut registry = ConnectionRegistry::new(2);
        let (tx, _rx) = channel();

        let first = registry.admit(tx.clone(), Instant::now()).unwrap();
        registry.admit(tx.clone(), Instant::now()).unwrap();

        assert_eq!(
            registry.admit(tx.clone(), Instant::now()).unwrap_err(),
            AdmissionError::AtCapacity { max: 2 }
        );

        assert!(registry.remove(first.id));
        assert!(registry.admit(tx, Instant::now()).is_ok());
    }

    #[test]
    fn remove_is_idempotent_and_cancels() {
        let mut registry = ConnectionRegistry::new(10);
        let (tx, _rx) = channel();
        let admission = registry.admit(tx, Instant::now()).unwrap();

        assert!(registry.remove(admission.id));
        assert!(admission.terminate.is_cancelled());
        assert!(!registry.remove(admission.id));
        assert!(registry.is_empty());
    }

    #[test]
    fn send_reports_closed_and_full() {
        let mut registry = ConnectionRegistry::new(10);
        let (tx, rx) = mpsc::channel(1);
        let admission = registry.admit(tx, Instant::now()).unwrap();

        assert!(registry.send(admission.id, Outbound::Ping).is_ok());
        assert_eq!(
            registry.send(admission.id, Outbound::Ping),
            Err(SendFailure::Full)
        );
        assert!(!registry.is_writable(admission.id));

        drop(rx);
        assert_eq!(
            registry.send(admission.id, Outbound::Ping),
            Err(SendFailure::Closed)
        );
        assert_eq!(
            registry.send(ConnectionId::new(), Outbound::Ping),
            Err(SendFailure::Unknown)
        );
    }

    #[test]
    fn heartbeat_pings_then_expires_silent_connections() {
        let mut registry = ConnectionRegistry::new(10);
        let (tx, mut rx) = channel();
        let admission = registry.admit(tx, Instant::now()).unwrap();

        let pass = registry.heartbeat();
        assert_eq!(pass.pinged, 1);
        assert!(pass.expired.is_empty());
        assert_eq!(rx.try_recv().unwrap(), Outbound::Ping);
        assert!(registry.is_awaiting_pong(admission.id));

        let pass = registry.heartbeat();
        assert_eq!(
            pass.expired,
            vec![(admission.id, RemovalReason::HeartbeatTimeout)]
        );
    }

    #[test]
    fn pong_keeps_connection_alive() {
        let mut registry = ConnectionRegistry::new(10);
        let (tx, _rx) = channel();
        let admission = registry.admit(tx, Instant::now()).unwrap();

        registry.heartbeat();
        registry.record_pong(admission.id);
        let pass = registry.heartbeat();

        assert!(pass.expired.is_empty());
        assert_eq!(pass.pinged, 1);
    }

    #[test]
    fn heartbeat_expires_unwritable_connections() {
        let mut registry = ConnectionRegistry::new(10);
        let (tx, rx) = channel();
        let admission = registry.admit(tx, Instant::now()).unwrap();
        drop(rx);

        let pass = registry.heartbeat();
        assert_eq!(pass.expired, vec![(admission.id, RemovalReason::Unwritable)]);
    }
}
