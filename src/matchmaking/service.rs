//! Session service - connection lifecycle, message dispatch and the
//! disconnect grace period

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ConfigStore;
use crate::game::room::{Room, RoomId};
use crate::game::snake::{Colours, Direction, Player, PlayerId};
use crate::ws::connection::Connection;
use crate::ws::protocol::{ClientMsg, Inbound, ProtocolError, ServerMsg, KEEP_ALIVE};
use crate::ws::registry::ConnectionRegistry;

use super::directory::RoomDirectory;

/// One accepted WebSocket, bound to a player and the room it joined
#[derive(Debug, Clone)]
pub struct Session {
    pub connection: Connection,
    pub player_id: PlayerId,
    pub room_id: RoomId,
}

/// A scheduled removal that a reconnect can still cancel
struct PendingRemoval {
    token: Uuid,
    room_id: RoomId,
    task: JoinHandle<()>,
}

pub struct SessionService {
    config: Arc<ConfigStore>,
    directory: Arc<RoomDirectory>,
    registry: Arc<ConnectionRegistry>,
    pending: Arc<DashMap<PlayerId, PendingRemoval>>,
}

impl SessionService {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let directory = Arc::new(RoomDirectory::new(config.clone(), registry.clone()));
        Self {
            config,
            directory,
            registry,
            pending: Arc::new(DashMap::new()),
        }
    }

    pub fn directory(&self) -> &Arc<RoomDirectory> {
        &self.directory
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn pending_disconnects(&self) -> usize {
        self.pending.len()
    }

    /// Accept a connection for `player_id`. A pending removal for the same
    /// player is cancelled and an older live connection is closed. Either way
    /// the player goes back to its previous room while it still holds a seat
    /// there.
    pub fn connect(&self, connection: Connection, player_id: PlayerId) -> Session {
        let mut preferred: Option<RoomId> = None;

        if let Some((_, pending)) = self.pending.remove(&player_id) {
            pending.task.abort();
            info!(player_id = %player_id, room_id = %pending.room_id, "Player reconnected within grace period");
            preferred = Some(pending.room_id);
        }

        if let Some(old) = self.registry.evict_player(&player_id) {
            info!(
                player_id = %player_id,
                connection_id = %old.connection.id(),
                "Replacing existing connection"
            );
            if let Some(room) = self.directory.get(&old.room_id) {
                room.remove_connection(old.connection.id());
            }
            preferred = Some(old.room_id);
        }

        let room = match preferred.and_then(|id| self.directory.rejoin(&id, &connection, &player_id)) {
            Some(room) => room,
            None => self.directory.find_or_create_room(&connection, &player_id),
        };

        self.registry
            .register(connection.clone(), player_id.clone(), room.id().clone());

        info!(
            player_id = %player_id,
            room_id = %room.id(),
            connection_id = %connection.id(),
            "Session opened"
        );

        Session {
            connection,
            player_id,
            room_id: room.id().clone(),
        }
    }

    /// Decode and dispatch one inbound text frame. Malformed input is logged
    /// and dropped.
    pub fn handle_text(&self, session: &Session, text: &str) {
        match Inbound::decode(text) {
            Ok(Inbound::KeepAlive) => {
                if session.connection.send_text(KEEP_ALIVE.to_string()).is_err() {
                    session.connection.close();
                }
            }
            Ok(Inbound::Movement {
                player_id,
                direction,
            }) => {
                if let Some(room) = self.route(session) {
                    self.apply_movement(session, &room, &player_id, direction);
                }
            }
            Ok(Inbound::Message(msg)) => self.handle_message(session, msg),
            Err(ProtocolError::UnknownEvent(event)) => {
                warn!(player_id = %session.player_id, event = %event, "Unknown event received");
            }
            Err(e) => {
                warn!(player_id = %session.player_id, error = %e, "Dropping malformed message");
            }
        }
    }

    pub fn handle_message(&self, session: &Session, msg: ClientMsg) {
        let Some(room) = self.route(session) else {
            return;
        };

        match msg {
            ClientMsg::NewPlayer { player } => {
                let name = if player.name.trim().is_empty() {
                    default_name(&session.player_id)
                } else {
                    player.name
                };
                let entry = Player::human(
                    session.player_id.clone(),
                    name,
                    player.colours.unwrap_or_else(Colours::default),
                    room.config().initial_size,
                );
                if room.add_to_waiting_room(entry) {
                    room.broadcast_waiting_room_status();
                } else {
                    debug!(player_id = %session.player_id, room_id = %room.id(), "Join ignored, player already in game");
                }
            }

            ClientMsg::WaitingRoomStatus => {
                room.broadcast_waiting_room_status();
            }

            ClientMsg::StartGame => {
                if !room.start_game(self.directory.clone()) {
                    debug!(room_id = %room.id(), "Start ignored");
                }
            }

            ClientMsg::PlayerMovement { player, key } => {
                let Some(direction) = Direction::from_key(&key) else {
                    warn!(player_id = %session.player_id, key = %key, "Unknown movement key");
                    return;
                };
                let player_id = player
                    .and_then(|p| p.id)
                    .unwrap_or_else(|| session.player_id.clone());
                self.apply_movement(session, &room, &player_id, direction);
            }

            ClientMsg::PlayerDisconnected { id } => {
                let id = id.unwrap_or_else(|| session.player_id.clone());
                if id != session.player_id {
                    warn!(player_id = %session.player_id, target = %id, "Refusing to disconnect another player");
                    return;
                }
                room.remove_from_waiting_room(&id);
                room.broadcast_waiting_room_status();
                room.broadcast(&ServerMsg::PlayerDisconnected { id });
            }

            ClientMsg::GetConfig => {
                room.send_config(&session.connection);
            }

            ClientMsg::FoodEaten { id } => {
                let respawned = id.slot().and_then(|slot| room.respawn_food(slot));
                match respawned {
                    Some(item) => {
                        room.broadcast(&ServerMsg::UpdateFood { food: vec![item] });
                    }
                    None => warn!(room_id = %room.id(), slot = ?id, "Food report for unknown slot"),
                }
            }

            ClientMsg::UpdatePlayer { id, player } => {
                let target = id
                    .or_else(|| player.id.clone())
                    .unwrap_or_else(|| session.player_id.clone());
                if target != session.player_id {
                    warn!(player_id = %session.player_id, target = %target, "Refusing to update another player");
                    return;
                }
                let name = Some(player.name).filter(|n| !n.trim().is_empty());
                if room.update_waiting_player(&target, name, player.colours) {
                    room.broadcast_waiting_room_status();
                }
            }

            ClientMsg::Ping => {
                room.send_to(&session.connection, &ServerMsg::Pong);
            }
        }
    }

    /// Tear down a closed connection. The player's game state survives for
    /// the grace period unless another connection already owns the player.
    pub fn disconnect(&self, session: &Session) {
        let room_id = self
            .registry
            .remove(session.connection.id())
            .map(|client| client.room_id)
            .unwrap_or_else(|| session.room_id.clone());

        let room = self.directory.get(&room_id);
        if let Some(room) = &room {
            room.remove_connection(session.connection.id());
        }

        if self.registry.contains_player(&session.player_id) {
            debug!(player_id = %session.player_id, "Connection superseded, skipping grace period");
            return;
        }

        let grace = room
            .map(|room| room.config().grace_period_ms)
            .unwrap_or_else(|| self.config.current().grace_period_ms);
        self.schedule_removal(session.player_id.clone(), room_id, Duration::from_millis(grace));
    }

    fn schedule_removal(&self, player_id: PlayerId, room_id: RoomId, grace: Duration) {
        let token = Uuid::new_v4();
        let directory = self.directory.clone();
        let registry = self.registry.clone();
        let pending = self.pending.clone();
        let task_player = player_id.clone();
        let task_room = room_id.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            pending.remove_if(&task_player, |_, entry| entry.token == token);
            if registry.contains_player(&task_player) {
                debug!(player_id = %task_player, "Player back online, keeping state");
                return;
            }
            remove_player(&directory, &task_room, &task_player);
        });

        debug!(player_id = %player_id, room_id = %room_id, grace_ms = grace.as_millis() as u64, "Disconnect grace period started");
        if let Some(previous) = self.pending.insert(
            player_id,
            PendingRemoval {
                token,
                room_id,
                task,
            },
        ) {
            previous.task.abort();
        }
    }

    /// Room for an inbound message, via the registry
    fn route(&self, session: &Session) -> Option<Arc<Room>> {
        let room_id = self
            .registry
            .lookup(session.connection.id())
            .map(|client| client.room_id)?;
        let room = self.directory.get(&room_id);
        if room.is_none() {
            debug!(player_id = %session.player_id, room_id = %room_id, "Message for a room that no longer exists");
        }
        room
    }

    fn apply_movement(&self, session: &Session, room: &Room, player_id: &str, direction: Direction) {
        if player_id != session.player_id {
            warn!(player_id = %session.player_id, target = %player_id, "Movement for another player ignored");
            return;
        }
        if room.apply_turn(player_id, direction) {
            room.broadcast(&ServerMsg::PlayerMovement {
                id: player_id.to_string(),
                key: direction.as_key().to_string(),
            });
        }
    }
}

/// Final removal once the grace period has run out. The last seat leaving
/// an unconnected room closes it, stopping its simulation if one is running.
fn remove_player(directory: &RoomDirectory, room_id: &str, player_id: &str) {
    let Some(room) = directory.get(room_id) else {
        return;
    };
    room.release_seat(player_id);

    let was_waiting = room.remove_from_waiting_room(player_id).is_some();
    let was_active = room.remove_active_player(player_id).is_some();
    if was_waiting {
        room.broadcast_waiting_room_status();
    }
    if was_waiting || was_active {
        room.broadcast(&ServerMsg::PlayerDisconnected {
            id: player_id.to_string(),
        });
    }
    info!(player_id = %player_id, room_id = %room_id, "Player removed after grace period");

    if room.occupancy() == 0 && room.connection_count() == 0 {
        if room.is_game_started() {
            room.stop();
        }
        directory.remove(room_id);
        room.reset();
    }
}

fn default_name(player_id: &str) -> String {
    let short: String = player_id.chars().take(8).collect();
    format!("Player_{}", short)
}
