//! Per-room authoritative tick loop

use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::matchmaking::RoomDirectory;
use crate::util::time::tick_period;
use crate::ws::protocol::ServerMsg;

use super::collision::CollisionResolver;
use super::room::Room;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    NotStarted,
    Running,
    GameOver,
}

/// Why [`SimulationLoop::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    GameOver,
    Stopped,
}

/// Drives one room from start until game over or an external stop
pub struct SimulationLoop {
    room: Arc<Room>,
    directory: Arc<RoomDirectory>,
    resolver: CollisionResolver,
    state: LoopState,
    started_with: usize,
    rng: ChaCha8Rng,
    tick: u64,
}

impl SimulationLoop {
    pub fn new(room: Arc<Room>, directory: Arc<RoomDirectory>) -> Self {
        let resolver = CollisionResolver::new(room.config());
        let started_with = room.alive_count();
        Self {
            room,
            directory,
            resolver,
            state: LoopState::NotStarted,
            started_with,
            rng: ChaCha8Rng::from_entropy(),
            tick: 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Tick until the game ends or the room is stopped. The main tick is
    /// polled first so it wins over the autonomous-turn timer.
    pub async fn run(mut self) -> LoopExit {
        let room = self.room.clone();
        let config = room.config().clone();
        self.state = LoopState::Running;
        info!(room_id = %room.id(), fps = config.fps, players = self.started_with, "Simulation started");

        let mut tick_interval = interval(tick_period(config.fps));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let turn_period = Duration::from_millis(config.autonomous_turn_ms.max(1));
        let mut turn_interval = interval_at(Instant::now() + turn_period, turn_period);
        turn_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let exit = loop {
            tokio::select! {
                biased;

                _ = tick_interval.tick() => {
                    if !room.is_game_started() {
                        break LoopExit::Stopped;
                    }
                    if self.step() == LoopState::GameOver {
                        break LoopExit::GameOver;
                    }
                }
                _ = turn_interval.tick() => {
                    room.steer_autonomous(&mut self.rng);
                }
                _ = room.stopped() => {
                    break LoopExit::Stopped;
                }
            }
        };

        info!(room_id = %room.id(), ticks = self.tick, exit = ?exit, "Simulation ended");
        exit
    }

    /// One tick: advance, report food, then either end the game or
    /// broadcast the roster.
    pub fn step(&mut self) -> LoopState {
        self.state = LoopState::Running;
        self.tick += 1;
        let report = self.room.advance(&self.resolver);

        for item in report.food_updates {
            self.room.broadcast(&ServerMsg::UpdateFood { food: vec![item] });
        }
        if !report.deaths.is_empty() {
            debug!(room_id = %self.room.id(), tick = self.tick, deaths = ?report.deaths, "Snakes eliminated");
        }

        let threshold = self.room.config().elimination.threshold(self.started_with);
        if report.alive_humans <= threshold {
            self.finish();
            return self.state;
        }

        self.room.broadcast(&ServerMsg::SnakeUpdate {
            snakes_map: self.room.snake_roster(),
        });
        self.state
    }

    fn finish(&mut self) {
        self.state = LoopState::GameOver;
        info!(room_id = %self.room.id(), tick = self.tick, "Game over");
        self.room.broadcast(&ServerMsg::GameOver);
        self.room.reset();
        self.directory.remove(self.room.id());
    }
}
