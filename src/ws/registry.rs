//! Connection registry: routes a connection to its player and room

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::info;

use crate::game::room::RoomId;
use crate::game::snake::PlayerId;

use super::connection::{Connection, ConnectionId};

/// Back-reference from a connection to its session
#[derive(Debug, Clone)]
pub struct Client {
    pub player_id: PlayerId,
    pub room_id: RoomId,
    pub connection: Connection,
}

#[derive(Default)]
struct RegistryInner {
    clients: HashMap<ConnectionId, Client>,
    by_player: HashMap<PlayerId, ConnectionId>,
}

/// All live connections, guarded by a single lock
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate a connection. A different connection already registered for
    /// the same player is closed and purged first and returned to the caller.
    pub fn register(
        &self,
        connection: Connection,
        player_id: PlayerId,
        room_id: RoomId,
    ) -> Option<Client> {
        let displaced = {
            let mut inner = self.inner.lock();
            let displaced = match inner.by_player.get(&player_id).copied() {
                Some(previous) if previous != connection.id() => inner.clients.remove(&previous),
                _ => None,
            };
            inner.by_player.insert(player_id.clone(), connection.id());
            inner.clients.insert(
                connection.id(),
                Client {
                    player_id,
                    room_id,
                    connection,
                },
            );
            displaced
        };

        if let Some(old) = &displaced {
            info!(
                player_id = %old.player_id,
                connection_id = %old.connection.id(),
                "Closing superseded connection"
            );
            old.connection.close();
        }
        displaced
    }

    /// Close and purge whatever connection currently belongs to `player_id`
    pub fn evict_player(&self, player_id: &str) -> Option<Client> {
        let evicted = {
            let mut inner = self.inner.lock();
            let connection_id = inner.by_player.remove(player_id)?;
            inner.clients.remove(&connection_id)
        };
        if let Some(client) = &evicted {
            client.connection.close();
        }
        evicted
    }

    pub fn lookup(&self, connection_id: ConnectionId) -> Option<Client> {
        self.inner.lock().clients.get(&connection_id).cloned()
    }

    #[cfg(test)]
    pub fn client_for_player(&self, player_id: &str) -> Option<Client> {
        let inner = self.inner.lock();
        inner
            .by_player
            .get(player_id)
            .and_then(|id| inner.clients.get(id))
            .cloned()
    }

    pub fn contains_player(&self, player_id: &str) -> bool {
        self.inner.lock().by_player.contains_key(player_id)
    }

    /// Drop a connection. The player index is only cleared if it still
    /// points at this connection.
    pub fn remove(&self, connection_id: ConnectionId) -> Option<Client> {
        let mut inner = self.inner.lock();
        let client = inner.clients.remove(&connection_id)?;
        if inner.by_player.get(&client.player_id) == Some(&connection_id) {
            inner.by_player.remove(&client.player_id);
        }
        Some(client)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().clients.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::connection::Outbound;

    #[test]
    fn register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = Connection::channel(4);
        assert!(registry
            .register(conn.clone(), "p1".into(), "room_1".into())
            .is_none());

        let client = registry.lookup(conn.id()).unwrap();
        assert_eq!(client.player_id, "p1");
        assert_eq!(client.room_id, "room_1");
        assert!(registry.contains_player("p1"));
    }

    #[test]
    fn second_connection_for_player_wins() {
        let registry = ConnectionRegistry::new();
        let (first, mut first_rx) = Connection::channel(4);
        let (second, _rx) = Connection::channel(4);
        registry.register(first.clone(), "p1".into(), "room_1".into());

        let displaced = registry
            .register(second.clone(), "p1".into(), "room_1".into())
            .unwrap();
        assert_eq!(displaced.connection, first);
        assert_eq!(first_rx.try_recv(), Ok(Outbound::Close));
        assert!(registry.lookup(first.id()).is_none());
        assert_eq!(registry.client_for_player("p1").unwrap().connection, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn removing_stale_connection_keeps_newer_index() {
        let registry = ConnectionRegistry::new();
        let (first, _a) = Connection::channel(4);
        let (second, _b) = Connection::channel(4);
        registry.register(first.clone(), "p1".into(), "room_1".into());
        registry.register(second.clone(), "p1".into(), "room_1".into());

        assert!(registry.remove(first.id()).is_none());
        assert!(registry.contains_player("p1"));
        assert!(registry.remove(second.id()).is_some());
        assert!(!registry.contains_player("p1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn evict_player_closes_connection() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = Connection::channel(4);
        registry.register(conn, "p1".into(), "room_1".into());

        assert!(registry.evict_player("p1").is_some());
        assert_eq!(rx.try_recv(), Ok(Outbound::Close));
        assert!(registry.evict_player("p1").is_none());
    }
}
