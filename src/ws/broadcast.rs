//! Room fan-out: the player-connection list and fire-and-forget delivery

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::game::room::RoomId;

use super::connection::{Connection, ConnectionId, SendError};
use super::protocol::ServerMsg;
use super::registry::ConnectionRegistry;

/// A room's connections. Writes go to a snapshot taken under the lock;
/// a failed write closes that connection and drops it from both this list
/// and the registry.
pub struct BroadcastChannel {
    room_id: RoomId,
    connections: Mutex<Vec<Connection>>,
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastChannel {
    pub fn new(room_id: RoomId, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            room_id,
            connections: Mutex::new(Vec::new()),
            registry,
        }
    }

    pub fn add(&self, connection: Connection) {
        let mut connections = self.connections.lock();
        if !connections.contains(&connection) {
            connections.push(connection);
        }
    }

    pub fn remove(&self, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.lock();
        let before = connections.len();
        connections.retain(|c| c.id() != connection_id);
        connections.len() != before
    }

    #[cfg(test)]
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.connections
            .lock()
            .iter()
            .any(|c| c.id() == connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Connection> {
        self.connections.lock().clone()
    }

    pub fn clear(&self) {
        self.connections.lock().clear();
    }

    /// Send to every connection in the room; returns how many accepted it
    pub fn broadcast(&self, message: &ServerMsg) -> usize {
        let Some(payload) = self.encode(message) else {
            return 0;
        };
        let recipients = self.snapshot();
        self.deliver(&recipients, &payload)
    }

    /// Send to one connection with the same eviction rules as a broadcast
    pub fn send_to(&self, connection: &Connection, message: &ServerMsg) -> bool {
        match self.encode(message) {
            Some(payload) => self.deliver(std::slice::from_ref(connection), &payload) == 1,
            None => false,
        }
    }

    fn encode(&self, message: &ServerMsg) -> Option<String> {
        match message.encode() {
            Ok(payload) => Some(payload),
            Err(e) => {
                error!(
                    room_id = %self.room_id,
                    event = message.event_name(),
                    error = %e,
                    "Failed to encode message"
                );
                None
            }
        }
    }

    fn deliver(&self, recipients: &[Connection], payload: &str) -> usize {
        let mut delivered = 0;
        for connection in recipients {
            match connection.send_text(payload.to_string()) {
                Ok(()) => delivered += 1,
                Err(e) => self.evict(connection, e),
            }
        }
        delivered
    }

    fn evict(&self, connection: &Connection, reason: SendError) {
        warn!(
            room_id = %self.room_id,
            connection_id = %connection.id(),
            reason = %reason,
            "Write failed, evicting connection"
        );
        connection.close();
        self.registry.remove(connection.id());
        self.remove(connection.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::connection::Outbound;

    fn channel() -> (Arc<ConnectionRegistry>, BroadcastChannel) {
        let registry = Arc::new(ConnectionRegistry::new());
        let channel = BroadcastChannel::new("room_1".into(), registry.clone());
        (registry, channel)
    }

    #[test]
    fn broadcast_reaches_every_connection() {
        let (_registry, channel) = channel();
        let (a, mut a_rx) = Connection::channel(4);
        let (b, mut b_rx) = Connection::channel(4);
        channel.add(a.clone());
        channel.add(b);
        channel.add(a);
        assert_eq!(channel.len(), 2);

        assert_eq!(channel.broadcast(&ServerMsg::StartGame), 2);
        let expected = Outbound::Text(r#"{"event":"startGame"}"#.into());
        assert_eq!(a_rx.try_recv(), Ok(expected.clone()));
        assert_eq!(b_rx.try_recv(), Ok(expected));
    }

    #[test]
    fn failed_write_evicts_only_that_connection() {
        let (registry, channel) = channel();
        let (healthy, mut healthy_rx) = Connection::channel(4);
        let (broken, broken_rx) = Connection::channel(4);
        drop(broken_rx);
        registry.register(healthy.clone(), "a".into(), "room_1".into());
        registry.register(broken.clone(), "b".into(), "room_1".into());
        channel.add(healthy.clone());
        channel.add(broken.clone());

        assert_eq!(channel.broadcast(&ServerMsg::GameOver), 1);
        assert!(!channel.contains(broken.id()));
        assert!(channel.contains(healthy.id()));
        assert!(registry.lookup(broken.id()).is_none());
        assert!(registry.lookup(healthy.id()).is_some());
        assert!(healthy_rx.try_recv().is_ok());

        assert_eq!(channel.broadcast(&ServerMsg::Pong), 1);
    }

    #[test]
    fn full_queue_counts_as_failure() {
        let (_registry, channel) = channel();
        let (slow, _rx) = Connection::channel(1);
        channel.add(slow.clone());
        assert!(channel.send_to(&slow, &ServerMsg::Pong));
        assert!(!channel.send_to(&slow, &ServerMsg::Pong));
        assert!(channel.is_empty());
    }
}
