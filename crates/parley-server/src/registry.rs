//! Connection registry: who is reachable right now, and over which sockets.
//!
//! A user may hold several connections at once (one per device) and every
//! device receives every event addressed to the user. The registry holds no
//! persistent state; it starts empty on boot and sheds entries as sockets
//! close. Lookups and sends go through dashmap shards, there is no global
//! lock.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use parley_shared::protocol::ServerEvent;
use parley_shared::{ConnectionId, UserId};

/// Write side of one open connection.
///
/// The sender feeds the connection's writer task; pushing an event here never
/// blocks on the peer's socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub user: UserId,
    sender: mpsc::UnboundedSender<WsMessage>,
}

impl ConnectionHandle {
    pub fn new(user: UserId, sender: mpsc::UnboundedSender<WsMessage>) -> Self {
        Self { user, sender }
    }

    /// Queue an event for this connection. Returns `false` when the writer
    /// task has already gone away.
    pub fn send(&self, event: &ServerEvent) -> bool {
        let json = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize server event");
                return false;
            }
        };
        self.sender.send(WsMessage::Text(json)).is_ok()
    }

    /// Queue a raw close frame.
    pub fn close(&self) {
        let _ = self.sender.send(WsMessage::Close(None));
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
    by_user: DashMap<UserId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an identified connection to its user.
    pub fn register(
        &self,
        connection: ConnectionId,
        user: UserId,
        sender: mpsc::UnboundedSender<WsMessage>,
    ) {
        self.connections
            .insert(connection, ConnectionHandle::new(user, sender));
        self.by_user.entry(user).or_default().insert(connection);
        tracing::debug!(user = %user, connection = %connection, "Connection registered");
    }

    /// Drop a connection, pruning the user's entry once their last socket is
    /// gone. Returns the user the connection belonged to, if any.
    pub fn unregister(&self, connection: ConnectionId) -> Option<UserId> {
        let (_, handle) = self.connections.remove(&connection)?;
        let user = handle.user;

        if let Some(mut set) = self.by_user.get_mut(&user) {
            set.remove(&connection);
            if set.is_empty() {
                drop(set);
                self.by_user.remove_if(&user, |_, set| set.is_empty());
            }
        }

        tracing::debug!(user = %user, connection = %connection, "Connection unregistered");
        Some(user)
    }

    pub fn connections_of(&self, user: UserId) -> Vec<ConnectionId> {
        self.by_user
            .get(&user)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_reachable(&self, user: UserId) -> bool {
        self.by_user.get(&user).is_some_and(|set| !set.is_empty())
    }

    /// Push an event to every connection the user holds. Returns how many
    /// connections accepted it.
    pub fn send_to_user(&self, user: UserId, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for connection in self.connections_of(user) {
            if self.send_to_connection(connection, event) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Push an event to one specific connection.
    pub fn send_to_connection(&self, connection: ConnectionId, event: &ServerEvent) -> bool {
        match self.connections.get(&connection) {
            Some(handle) => handle.send(event),
            None => false,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn online_user_count(&self) -> usize {
        self.by_user.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_shared::protocol::PongEvent;

    fn pong() -> ServerEvent {
        ServerEvent::Pong(PongEvent { server_time: Utc::now() })
    }

    #[test]
    fn every_device_gets_the_event() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c1 = ConnectionId::new();
        let c2 = ConnectionId::new();
        registry.register(c1, user, tx1);
        registry.register(c2, user, tx2);

        assert!(registry.is_reachable(user));
        assert_eq!(registry.send_to_user(user, &pong()), 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn unregister_prunes_empty_user_sets() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();

        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ConnectionId::new();
        registry.register(conn, user, tx);

        assert_eq!(registry.unregister(conn), Some(user));
        assert!(!registry.is_reachable(user));
        assert_eq!(registry.online_user_count(), 0);
        assert_eq!(registry.connection_count(), 0);

        // Unknown connections are a quiet no-op.
        assert_eq!(registry.unregister(conn), None);
    }

    #[test]
    fn sends_to_unknown_users_reach_nobody() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.send_to_user(UserId::new(), &pong()), 0);
        assert!(!registry.send_to_connection(ConnectionId::new(), &pong()));
    }

    #[test]
    fn dropped_receiver_counts_as_unreached() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();

        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        registry.register(ConnectionId::new(), user, tx);

        assert_eq!(registry.send_to_user(user, &pong()), 0);
    }
}
