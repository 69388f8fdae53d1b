//! Room directory: finds a joinable room or opens a new one

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::ConfigStore;
use crate::game::room::{Room, RoomId};
use crate::ws::connection::Connection;
use crate::ws::registry::ConnectionRegistry;

/// A room and the order it was opened in
struct Listed {
    serial: u64,
    room: Arc<Room>,
}

/// Every live room, keyed by id
pub struct RoomDirectory {
    rooms: Mutex<HashMap<RoomId, Listed>>,
    next_room: AtomicU64,
    config: Arc<ConfigStore>,
    registry: Arc<ConnectionRegistry>,
}

impl RoomDirectory {
    pub fn new(config: Arc<ConfigStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            next_room: AtomicU64::new(1),
            config,
            registry,
        }
    }

    /// Seat a player in the oldest room that has a free seat and is not yet
    /// playing, creating one when none qualifies. The whole decision runs
    /// under the directory lock so two connections cannot both take the last
    /// seat.
    pub fn find_or_create_room(&self, connection: &Connection, player_id: &str) -> Arc<Room> {
        let mut rooms = self.rooms.lock();

        let joinable = rooms
            .values()
            .filter(|listed| listed.room.can_seat(player_id))
            .min_by_key(|listed| listed.serial)
            .map(|listed| listed.room.clone());

        let room = match joinable {
            Some(room) => room,
            None => {
                let serial = self.next_room.fetch_add(1, Ordering::Relaxed);
                let room = self.create_room(serial);
                rooms.insert(
                    room.id().clone(),
                    Listed {
                        serial,
                        room: room.clone(),
                    },
                );
                room
            }
        };
        room.take_seat(player_id);
        room.add_connection(connection.clone());

        info!(
            room_id = %room.id(),
            player_id = %player_id,
            occupancy = room.occupancy(),
            "Player assigned to room"
        );
        room
    }

    /// Put a returning player back into `room_id`. Fails when the room is gone
    /// or the player no longer holds a seat there and none is free.
    pub fn rejoin(&self, room_id: &str, connection: &Connection, player_id: &str) -> Option<Arc<Room>> {
        let rooms = self.rooms.lock();
        let room = rooms.get(room_id)?.room.clone();
        if !room.take_seat(player_id) {
            debug!(room_id = %room_id, player_id = %player_id, "Previous room has no seat left");
            return None;
        }
        room.add_connection(connection.clone());
        Some(room)
    }

    fn create_room(&self, serial: u64) -> Arc<Room> {
        let id = format!("room_{}", serial);
        let config = self.config.current();
        let room = Arc::new(Room::new(id, config.clone(), self.registry.clone()));
        if config.autonomous_snake {
            room.spawn_autonomous_snake();
        }
        info!(room_id = %room.id(), capacity = config.room_capacity, "Created new room");
        room
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.lock().get(room_id).map(|listed| listed.room.clone())
    }

    pub fn remove(&self, room_id: &str) -> Option<Arc<Room>> {
        let removed = self.rooms.lock().remove(room_id).map(|listed| listed.room);
        if removed.is_some() {
            info!(room_id = %room_id, "Room removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.rooms.lock().len()
    }
}
