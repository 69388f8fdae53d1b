//! Room state: lobby, active snakes, food and the player-connection list
//!
//! Lock order inside a room is lobby -> snakes -> food. The connection list
//! lives in [`BroadcastChannel`] and, like the seat set, is never held while
//! another room lock is being acquired.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::GameConfig;
use crate::matchmaking::RoomDirectory;
use crate::ws::broadcast::BroadcastChannel;
use crate::ws::connection::{Connection, ConnectionId};
use crate::ws::protocol::ServerMsg;
use crate::ws::registry::ConnectionRegistry;

use super::collision::{CollisionResolver, TickReport};
use super::food::{FoodItem, FoodSpawner};
use super::simulation::SimulationLoop;
use super::snake::{random_perpendicular, Colours, Direction, Player, PlayerId, Vector};

pub type RoomId = String;

/// Backdrop numbers clients know how to render
const BACKGROUND_RANGE: std::ops::RangeInclusive<u32> = 1..=91;

#[derive(Default)]
struct Lobby {
    players: BTreeMap<PlayerId, Player>,
    next_position: usize,
}

/// An isolated game session
pub struct Room {
    id: RoomId,
    config: Arc<GameConfig>,
    channel: BroadcastChannel,
    lobby: Mutex<Lobby>,
    snakes: Mutex<BTreeMap<PlayerId, Player>>,
    food: Mutex<FoodSpawner>,
    /// Human players holding a place, including those inside their grace period
    seats: Mutex<HashSet<PlayerId>>,
    game_started: AtomicBool,
    alive_count: AtomicUsize,
    stop: Notify,
    simulation: Mutex<Option<JoinHandle<()>>>,
}

impl Room {
    pub fn new(id: RoomId, config: Arc<GameConfig>, registry: Arc<ConnectionRegistry>) -> Self {
        Self::with_seed(id, config, registry, rand::random())
    }

    pub fn with_seed(
        id: RoomId,
        config: Arc<GameConfig>,
        registry: Arc<ConnectionRegistry>,
        seed: u64,
    ) -> Self {
        Self {
            channel: BroadcastChannel::new(id.clone(), registry),
            food: Mutex::new(FoodSpawner::new(&config, seed)),
            id,
            config,
            lobby: Mutex::new(Lobby::default()),
            snakes: Mutex::new(BTreeMap::new()),
            seats: Mutex::new(HashSet::new()),
            game_started: AtomicBool::new(false),
            alive_count: AtomicUsize::new(0),
            stop: Notify::new(),
            simulation: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn config(&self) -> &Arc<GameConfig> {
        &self.config
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    pub fn add_connection(&self, connection: Connection) {
        self.channel.add(connection);
    }

    pub fn remove_connection(&self, connection_id: ConnectionId) -> bool {
        let removed = self.channel.remove(connection_id);
        if removed {
            debug!(room_id = %self.id, connection_id = %connection_id, "Removed connection from room");
        }
        removed
    }

    #[cfg(test)]
    pub fn has_connection(&self, connection_id: ConnectionId) -> bool {
        self.channel.contains(connection_id)
    }

    pub fn connection_count(&self) -> usize {
        self.channel.len()
    }

    pub fn broadcast(&self, message: &ServerMsg) -> usize {
        self.channel.broadcast(message)
    }

    pub fn send_to(&self, connection: &Connection, message: &ServerMsg) -> bool {
        self.channel.send_to(connection, message)
    }

    // ------------------------------------------------------------------
    // Seats
    // ------------------------------------------------------------------

    /// Players counted against `room_capacity`
    pub fn occupancy(&self) -> usize {
        self.seats.lock().len()
    }

    /// Whether `player_id` could take a seat right now
    pub fn can_seat(&self, player_id: &str) -> bool {
        let seats = self.seats.lock();
        seats.contains(player_id)
            || (!self.is_game_started() && seats.len() < self.config.room_capacity)
    }

    /// Claim a seat for `player_id`. A player already seated keeps its seat,
    /// even once the game is running.
    pub fn take_seat(&self, player_id: &str) -> bool {
        let mut seats = self.seats.lock();
        if seats.contains(player_id) {
            return true;
        }
        if self.is_game_started() || seats.len() >= self.config.room_capacity {
            return false;
        }
        seats.insert(player_id.to_string());
        true
    }

    pub fn release_seat(&self, player_id: &str) -> bool {
        self.seats.lock().remove(player_id)
    }

    // ------------------------------------------------------------------
    // Lobby
    // ------------------------------------------------------------------

    /// Put a player in the lobby at the next free starting cell. A player
    /// already waiting keeps its cell and only gets its name/colours refreshed.
    /// Returns false once the game has started or the player is active.
    pub fn add_to_waiting_room(&self, player: Player) -> bool {
        let mut lobby = self.lobby.lock();
        // start_game flips the flag under the lobby lock
        if self.is_game_started() || self.snakes.lock().contains_key(&player.id) {
            return false;
        }

        if let Some(existing) = lobby.players.get_mut(&player.id) {
            existing.name = player.name;
            existing.colours = player.colours;
            return true;
        }

        let position = self.assign_position(&mut lobby);
        let mut player = player;
        player.snake.place(position);
        debug!(
            room_id = %self.id,
            player_id = %player.id,
            x = position.x,
            y = position.y,
            "Player entered waiting room"
        );
        lobby.players.insert(player.id.clone(), player);
        true
    }

    /// Idempotent
    pub fn remove_from_waiting_room(&self, player_id: &str) -> Option<Player> {
        self.lobby.lock().players.remove(player_id)
    }

    pub fn update_waiting_player(&self, player_id: &str, name: Option<String>, colours: Option<Colours>) -> bool {
        let mut lobby = self.lobby.lock();
        let Some(player) = lobby.players.get_mut(player_id) else {
            return false;
        };
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            player.name = name;
        }
        if let Some(colours) = colours {
            player.colours = colours;
        }
        true
    }

    pub fn waiting_room_roster(&self) -> Vec<Player> {
        self.lobby.lock().players.values().cloned().collect()
    }

    #[cfg(test)]
    pub fn is_waiting(&self, player_id: &str) -> bool {
        self.lobby.lock().players.contains_key(player_id)
    }

    pub fn broadcast_waiting_room_status(&self) -> usize {
        let players = self.waiting_room_roster();
        self.channel.broadcast(&ServerMsg::WaitingRoomStatus { players })
    }

    /// Seed the lobby with the server-controlled snake
    pub fn spawn_autonomous_snake(&self) -> bool {
        let player = Player::autonomous(&self.config.server_snake, self.config.initial_size);
        self.add_to_waiting_room(player)
    }

    /// Fixed starting cells at the playfield's quarter points, then a
    /// row-major scan over every other cell, then the origin.
    fn assign_position(&self, lobby: &mut Lobby) -> Vector {
        let occupied: HashSet<Vector> = lobby.players.values().map(|p| p.snake.head()).collect();
        let fixed = self.starting_positions();

        while lobby.next_position < fixed.len() {
            let candidate = fixed[lobby.next_position];
            lobby.next_position += 1;
            if !occupied.contains(&candidate) {
                return candidate;
            }
        }

        let cells = self.config.cells_per_side();
        for cy in (0..cells).step_by(2) {
            for cx in (0..cells).step_by(2) {
                let candidate = self.cell(cx, cy);
                if !occupied.contains(&candidate) {
                    return candidate;
                }
            }
        }
        self.cell(0, 0)
    }

    fn starting_positions(&self) -> [Vector; 4] {
        let quarter = self.config.cells_per_side() / 4;
        let far = quarter * 3;
        [
            self.cell(quarter, quarter),
            self.cell(far, quarter),
            self.cell(quarter, far),
            self.cell(far, far),
        ]
    }

    fn cell(&self, cx: i32, cy: i32) -> Vector {
        Vector::new(
            cx * self.config.grid_size + self.config.left_section_size,
            cy * self.config.grid_size,
        )
    }

    // ------------------------------------------------------------------
    // Game lifecycle
    // ------------------------------------------------------------------

    pub fn is_game_started(&self) -> bool {
        self.game_started.load(Ordering::Acquire)
    }

    pub fn alive_count(&self) -> usize {
        self.alive_count.load(Ordering::Acquire)
    }

    /// Start the game once. Concurrent callers race on the started flag and
    /// only the winner broadcasts, promotes the lobby and spawns the loop.
    /// The flag flips while the lobby is locked, so no join can land in the
    /// lobby after it has been promoted.
    pub fn start_game(self: &Arc<Self>, directory: Arc<RoomDirectory>) -> bool {
        let started_with = {
            let mut lobby = self.lobby.lock();
            if !lobby.players.values().any(|p| !p.is_autonomous()) {
                return false;
            }
            if self
                .game_started
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return false;
            }

            self.channel.broadcast(&ServerMsg::StartGame);

            let mut snakes = self.snakes.lock();
            lobby.next_position = 0;
            snakes.extend(std::mem::take(&mut lobby.players));
            snakes
                .values()
                .filter(|p| !p.is_autonomous() && !p.snake.is_dead)
                .count()
        };
        self.alive_count.store(started_with, Ordering::Release);

        self.channel.broadcast(&ServerMsg::SpawnFood {
            food: self.food_snapshot(),
        });

        let handle = SimulationLoop::new(self.clone(), directory).spawn();
        *self.simulation.lock() = Some(handle);

        info!(room_id = %self.id, players = started_with, "Game started");
        true
    }

    /// External stop signal for the simulation loop
    pub fn stop(&self) {
        self.game_started.store(false, Ordering::Release);
        self.stop.notify_one();
    }

    pub(crate) async fn stopped(&self) {
        self.stop.notified().await;
    }

    #[cfg(test)]
    pub fn has_simulation(&self) -> bool {
        self.simulation
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Clear all mutable game state
    pub fn reset(&self) {
        self.game_started.store(false, Ordering::Release);
        self.alive_count.store(0, Ordering::Release);
        {
            let mut lobby = self.lobby.lock();
            let mut snakes = self.snakes.lock();
            lobby.players.clear();
            lobby.next_position = 0;
            snakes.clear();
            self.food.lock().clear();
        }
        self.seats.lock().clear();
        self.channel.clear();
    }

    // ------------------------------------------------------------------
    // Active snakes
    // ------------------------------------------------------------------

    /// Apply a turn to the player's snake, in the game or still in the lobby
    pub fn apply_turn(&self, player_id: &str, direction: Direction) -> bool {
        if self.is_game_started() {
            let mut snakes = self.snakes.lock();
            return match snakes.get_mut(player_id) {
                Some(player) if !player.snake.is_dead => player.snake.turn(direction),
                _ => false,
            };
        }
        let mut lobby = self.lobby.lock();
        match lobby.players.get_mut(player_id) {
            Some(player) => player.snake.turn(direction),
            None => false,
        }
    }

    pub fn remove_active_player(&self, player_id: &str) -> Option<Player> {
        self.snakes.lock().remove(player_id)
    }

    #[cfg(test)]
    pub fn is_active(&self, player_id: &str) -> bool {
        self.snakes.lock().contains_key(player_id)
    }

    pub fn snake_roster(&self) -> BTreeMap<PlayerId, Player> {
        self.snakes.lock().clone()
    }

    /// One simulation step over every snake
    pub(crate) fn advance(&self, resolver: &CollisionResolver) -> TickReport {
        let report = {
            let mut snakes = self.snakes.lock();
            let mut food = self.food.lock();
            resolver.advance_all(&mut snakes, &mut food)
        };
        self.alive_count.store(report.alive_humans, Ordering::Release);
        report
    }

    /// Random perpendicular turn for every living autonomous snake
    pub(crate) fn steer_autonomous<R: Rng + ?Sized>(&self, rng: &mut R) {
        let mut snakes = self.snakes.lock();
        for player in snakes.values_mut() {
            if player.is_autonomous() && !player.snake.is_dead {
                let direction = random_perpendicular(player.snake.speed, rng);
                player.snake.turn(direction);
            }
        }
    }

    // ------------------------------------------------------------------
    // Food and config
    // ------------------------------------------------------------------

    pub fn food_snapshot(&self) -> Vec<FoodItem> {
        self.food.lock().items().to_vec()
    }

    pub fn respawn_food(&self, slot: usize) -> Option<FoodItem> {
        self.food.lock().respawn(slot)
    }

    pub fn config_message(&self) -> ServerMsg {
        let mut config = GameConfig::clone(&self.config);
        config.background_number = rand::thread_rng().gen_range(BACKGROUND_RANGE);
        ServerMsg::Config {
            config,
            food: self.food_snapshot(),
        }
    }

    pub fn send_config(&self, connection: &Connection) -> bool {
        self.send_to(connection, &self.config_message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::ws::connection::Outbound;
    use tokio::sync::mpsc;

    fn test_config() -> GameConfig {
        GameConfig {
            side: 400,
            grid_size: 20,
            food_storage: 4,
            ..GameConfig::default()
        }
    }

    fn room_with(config: GameConfig) -> (Arc<Room>, Arc<RoomDirectory>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(ConfigStore::from_config(config.clone()));
        let directory = Arc::new(RoomDirectory::new(store, registry.clone()));
        let room = Arc::new(Room::with_seed("room_t".into(), Arc::new(config), registry, 3));
        (room, directory)
    }

    fn human(id: &str) -> Player {
        Player::human(id.into(), format!("name-{}", id), Colours::default(), 3)
    }

    fn events(rx: &mut mpsc::Receiver<Outbound>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(Outbound::Text(text)) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            out.push(value["event"].as_str().unwrap_or_default().to_string());
        }
        out
    }

    #[test]
    fn lobby_positions_are_distinct() {
        let (room, _) = room_with(test_config());
        for i in 0..9 {
            assert!(room.add_to_waiting_room(human(&format!("p{}", i))));
        }
        let heads: HashSet<Vector> = room
            .waiting_room_roster()
            .iter()
            .map(|p| p.snake.head())
            .collect();
        assert_eq!(heads.len(), 9);
        assert!(heads.contains(&Vector::new(100, 100)));
        assert!(heads.contains(&Vector::new(300, 300)));
    }

    #[test]
    fn rejoining_lobby_keeps_position() {
        let (room, _) = room_with(test_config());
        room.add_to_waiting_room(human("a"));
        let before = room.waiting_room_roster()[0].snake.head();

        let mut renamed = human("a");
        renamed.name = "Renamed".into();
        assert!(room.add_to_waiting_room(renamed));
        let roster = room.waiting_room_roster();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].name, "Renamed");
        assert_eq!(roster[0].snake.head(), before);
    }

    #[test]
    fn remove_from_waiting_room_is_idempotent() {
        let (room, _) = room_with(test_config());
        room.add_to_waiting_room(human("a"));
        assert!(room.remove_from_waiting_room("a").is_some());
        assert!(room.remove_from_waiting_room("a").is_none());
    }

    #[test]
    fn waiting_room_status_reaches_connections() {
        let (room, _) = room_with(test_config());
        let (conn, mut rx) = Connection::channel(8);
        room.add_connection(conn);
        room.add_to_waiting_room(human("a"));

        assert_eq!(room.broadcast_waiting_room_status(), 1);
        let Ok(Outbound::Text(text)) = rx.try_recv() else {
            panic!("no status");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["event"], "waitingRoomStatus");
        assert_eq!(value["players"][0]["id"], "a");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_starts_run_one_game() {
        let (room, directory) = room_with(test_config());
        let (a, mut a_rx) = Connection::channel(64);
        let (b, mut b_rx) = Connection::channel(64);
        room.add_connection(a);
        room.add_connection(b);
        room.add_to_waiting_room(human("a"));
        room.add_to_waiting_room(human("b"));

        let first = room.start_game(directory.clone());
        let second = room.start_game(directory.clone());
        assert!(first ^ second);
        assert!(room.waiting_room_roster().is_empty());
        assert_eq!(room.snake_roster().len(), 2);
        assert!(room.has_simulation());

        for rx in [&mut a_rx, &mut b_rx] {
            let starts = events(rx).iter().filter(|e| *e == "startGame").count();
            assert_eq!(starts, 1);
        }
        room.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn empty_lobby_does_not_start() {
        let (room, directory) = room_with(test_config());
        assert!(!room.start_game(directory.clone()));

        let (room, directory) = room_with(GameConfig {
            autonomous_snake: true,
            ..test_config()
        });
        room.spawn_autonomous_snake();
        assert!(!room.start_game(directory));
        assert!(!room.is_game_started());
    }

    #[tokio::test(start_paused = true)]
    async fn player_is_never_in_both_maps() {
        let (room, directory) = room_with(test_config());
        room.add_to_waiting_room(human("a"));
        assert!(room.start_game(directory));

        assert!(!room.add_to_waiting_room(human("a")));
        assert!(room.is_active("a"));
        assert!(!room.is_waiting("a"));
        room.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn join_racing_start_is_promoted_or_rejected() {
        for round in 0..200 {
            let (room, directory) = room_with(test_config());
            room.add_to_waiting_room(human("a"));
            let barrier = Arc::new(std::sync::Barrier::new(2));

            let joiner = {
                let (room, barrier) = (room.clone(), barrier.clone());
                tokio::task::spawn_blocking(move || {
                    barrier.wait();
                    room.add_to_waiting_room(human("b"))
                })
            };
            let starter = {
                let (room, barrier) = (room.clone(), barrier.clone());
                tokio::task::spawn_blocking(move || {
                    barrier.wait();
                    room.start_game(directory)
                })
            };

            let joined = joiner.await.unwrap();
            assert!(starter.await.unwrap());
            assert!(room.waiting_room_roster().is_empty(), "round {}", round);
            assert_eq!(room.is_active("b"), joined, "round {}", round);
            room.stop();
        }
    }

    #[test]
    fn seats_stop_at_capacity() {
        let (room, _) = room_with(GameConfig {
            room_capacity: 2,
            ..test_config()
        });
        assert!(room.take_seat("a"));
        assert!(room.take_seat("b"));
        assert!(!room.can_seat("c"));
        assert!(!room.take_seat("c"));

        // a holder asking again keeps its seat
        assert!(room.can_seat("a"));
        assert!(room.take_seat("a"));
        assert_eq!(room.occupancy(), 2);

        assert!(room.release_seat("b"));
        assert!(room.take_seat("c"));
        assert_eq!(room.occupancy(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn running_room_only_seats_holders() {
        let (room, directory) = room_with(test_config());
        assert!(room.take_seat("a"));
        room.add_to_waiting_room(human("a"));
        assert!(room.start_game(directory));

        assert!(room.take_seat("a"));
        assert!(!room.take_seat("late"));
        assert_eq!(room.occupancy(), 1);
        room.stop();
    }

    #[test]
    fn turns_apply_in_lobby_and_respect_axis() {
        let (room, _) = room_with(test_config());
        room.add_to_waiting_room(human("a"));
        assert!(!room.apply_turn("a", Direction::Left));
        assert!(room.apply_turn("a", Direction::Up));
        assert!(!room.apply_turn("ghost", Direction::Up));
    }

    #[test]
    fn config_message_carries_food_and_background() {
        let (room, _) = room_with(test_config());
        let ServerMsg::Config { config, food } = room.config_message() else {
            panic!("expected config");
        };
        assert_eq!(food.len(), 4);
        assert!(BACKGROUND_RANGE.contains(&config.background_number));
    }

    #[test]
    fn reset_clears_everything() {
        let (room, _) = room_with(test_config());
        let (conn, _rx) = Connection::channel(8);
        room.add_connection(conn);
        room.add_to_waiting_room(human("a"));
        room.take_seat("a");
        room.reset();
        assert_eq!(room.connection_count(), 0);
        assert_eq!(room.occupancy(), 0);
        assert!(room.waiting_room_roster().is_empty());
        assert!(room.food_snapshot().is_empty());
        assert!(!room.is_game_started());
    }
}
