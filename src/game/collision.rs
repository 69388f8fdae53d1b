//! Per-snake, per-tick movement, food and collision resolution

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::GameConfig;

use super::food::{FoodItem, FoodSpawner};
use super::snake::{Player, PlayerId, PlayerKind, Snake, Vector};

/// Playfield bounds: `[left, left + side) x [0, side)` in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Playfield {
    pub left: i32,
    pub side: i32,
    pub grid: i32,
}

impl Playfield {
    pub fn from_config(config: &GameConfig) -> Self {
        Self {
            left: config.left_section_size,
            side: config.side,
            grid: config.grid_size,
        }
    }

    /// Torus wrap. Crossing the far edge lands on the near edge, crossing
    /// the near edge lands on the last cell.
    pub fn wrap(&self, point: Vector) -> Vector {
        let right = self.left + self.side;
        let x = if point.x >= right {
            self.left
        } else if point.x < self.left {
            right - self.grid
        } else {
            point.x
        };
        let y = if point.y >= self.side {
            0
        } else if point.y < 0 {
            self.side - self.grid
        } else {
            point.y
        };
        Vector::new(x, y)
    }

    #[cfg(test)]
    pub fn contains(&self, point: Vector) -> bool {
        (self.left..self.left + self.side).contains(&point.x) && (0..self.side).contains(&point.y)
    }
}

/// Result of advancing one snake
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StepOutcome {
    /// Replacement for the food slot this snake consumed
    pub respawned: Option<FoodItem>,
    /// The snake died during this step
    pub died: bool,
}

/// Result of advancing every snake in a room once
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    pub alive_humans: usize,
    pub food_updates: Vec<FoodItem>,
    pub deaths: Vec<PlayerId>,
}

pub struct CollisionResolver {
    field: Playfield,
    autonomous_collision: bool,
}

impl CollisionResolver {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            field: Playfield::from_config(config),
            autonomous_collision: config.autonomous_collision,
        }
    }

    #[cfg(test)]
    pub fn playfield(&self) -> Playfield {
        self.field
    }

    /// Exempt snakes neither trigger nor suffer cross-snake collision
    pub fn is_exempt(&self, snake: &Snake) -> bool {
        snake.kind == PlayerKind::Autonomous && !self.autonomous_collision
    }

    /// Advance every snake in key order and tally the surviving humans
    pub fn advance_all(
        &self,
        snakes: &mut BTreeMap<PlayerId, Player>,
        food: &mut FoodSpawner,
    ) -> TickReport {
        let mut report = TickReport::default();
        let ids: Vec<PlayerId> = snakes.keys().cloned().collect();

        for id in ids {
            let outcome = self.step(&id, snakes, food);
            if let Some(item) = outcome.respawned {
                report.food_updates.push(item);
            }
            if outcome.died {
                debug!(player_id = %id, "Snake died");
                report.deaths.push(id);
            }
        }

        report.alive_humans = snakes
            .values()
            .filter(|p| p.kind == PlayerKind::Human && !p.snake.is_dead)
            .count();
        report
    }

    /// Advance a single snake: food, tail shift, move, wrap, then collisions
    pub fn step(
        &self,
        id: &str,
        snakes: &mut BTreeMap<PlayerId, Player>,
        food: &mut FoodSpawner,
    ) -> StepOutcome {
        let Some(mut snake) = snakes.get(id).map(|p| p.snake.clone()) else {
            return StepOutcome::default();
        };
        if snake.is_dead {
            return StepOutcome::default();
        }

        let mut outcome = StepOutcome::default();

        if let Some(slot) = food.slot_at(snake.head()) {
            let points = food.items()[slot].points();
            snake.size += 1;
            snake.score += points;
            outcome.respawned = food.respawn(slot);
        }

        while snake.tail.len() >= snake.size && !snake.tail.is_empty() {
            snake.tail.pop_front();
        }
        if snake.size > 0 {
            snake.tail.push_back(snake.head());
        }

        let next = Vector::new(
            snake.x + snake.speed.x * self.field.grid,
            snake.y + snake.speed.y * self.field.grid,
        );
        snake.place(self.field.wrap(next));

        if snake.tail_contains(snake.head()) {
            snake.is_dead = true;
        }

        if !snake.is_dead && !self.is_exempt(&snake) {
            let head = snake.head();
            let hit = snakes
                .iter()
                .filter(|(other_id, _)| other_id.as_str() != id)
                .map(|(_, other)| &other.snake)
                .filter(|other| !other.is_dead && !self.is_exempt(other))
                .any(|other| other.head() == head || other.tail_contains(head));
            if hit {
                snake.is_dead = true;
            }
        }

        outcome.died = snake.is_dead;
        if let Some(player) = snakes.get_mut(id) {
            player.snake = snake;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::snake::{Colours, Direction};

    fn config(side: i32, grid: i32, left: i32) -> GameConfig {
        GameConfig {
            side,
            grid_size: grid,
            left_section_size: left,
            food_storage: 0,
            ..GameConfig::default()
        }
    }

    fn player(id: &str, at: Vector, speed: Vector, size: usize) -> Player {
        let mut p = Player::human(id.into(), id.into(), Colours::default(), size);
        p.snake.place(at);
        p.snake.speed = speed;
        p
    }

    fn roster(players: Vec<Player>) -> BTreeMap<PlayerId, Player> {
        players.into_iter().map(|p| (p.id.clone(), p)).collect()
    }

    #[test]
    fn crossing_right_edge_wraps_to_left() {
        let cfg = config(20, 20, 0);
        let resolver = CollisionResolver::new(&cfg);
        let mut food = FoodSpawner::new(&cfg, 0);
        let mut snakes = roster(vec![player("a", Vector::new(18, 0), Vector::new(1, 0), 0)]);

        resolver.step("a", &mut snakes, &mut food);
        assert_eq!(snakes["a"].snake.head(), Vector::new(0, 0));
    }

    #[test]
    fn wrap_honours_left_margin() {
        let cfg = config(20, 20, 60);
        let resolver = CollisionResolver::new(&cfg);
        let mut food = FoodSpawner::new(&cfg, 0);
        let mut snakes = roster(vec![player("a", Vector::new(78, 0), Vector::new(1, 0), 0)]);

        resolver.step("a", &mut snakes, &mut food);
        assert_eq!(snakes["a"].snake.head(), Vector::new(60, 0));
    }

    #[test]
    fn head_always_stays_in_bounds() {
        let cfg = config(100, 20, 40);
        let resolver = CollisionResolver::new(&cfg);
        let field = resolver.playfield();
        let mut food = FoodSpawner::new(&cfg, 0);
        for direction in Direction::ALL {
            let mut snakes = roster(vec![player("a", Vector::new(40, 0), direction.velocity(), 0)]);
            for _ in 0..12 {
                resolver.step("a", &mut snakes, &mut food);
                assert!(field.contains(snakes["a"].snake.head()), "{:?}", direction);
            }
        }
    }

    #[test]
    fn eating_grows_scores_and_respawns_same_slot() {
        let cfg = GameConfig {
            food_storage: 3,
            ..config(200, 20, 0)
        };
        let resolver = CollisionResolver::new(&cfg);
        let mut food = FoodSpawner::new(&cfg, 11);
        let target = food.items()[1].position();
        let slot = food.slot_at(target).unwrap();
        let mut snakes = roster(vec![player("a", target, Vector::new(1, 0), 2)]);

        let outcome = resolver.step("a", &mut snakes, &mut food);
        let snake = &snakes["a"].snake;
        assert_eq!(snake.size, 3);
        assert_eq!(snake.score, 50);
        assert_eq!(outcome.respawned.as_ref().map(|f| f.id), Some(slot));
        assert_eq!(food.len(), 3);
        assert!(snake.tail.len() <= snake.size);
    }

    #[test]
    fn tail_never_exceeds_size() {
        let cfg = config(200, 20, 0);
        let resolver = CollisionResolver::new(&cfg);
        let mut food = FoodSpawner::new(&cfg, 0);
        let mut snakes = roster(vec![player("a", Vector::new(0, 0), Vector::new(1, 0), 4)]);

        for tick in 0..30 {
            resolver.step("a", &mut snakes, &mut food);
            let snake = &snakes["a"].snake;
            assert!(snake.tail.len() <= snake.size, "tick {}", tick);
            assert_eq!(snake.size, 4);
        }
        assert_eq!(snakes["a"].snake.tail.len(), 4);
    }

    #[test]
    fn running_into_own_tail_is_fatal() {
        let cfg = config(200, 20, 0);
        let resolver = CollisionResolver::new(&cfg);
        let mut food = FoodSpawner::new(&cfg, 0);
        let mut p = player("a", Vector::new(40, 40), Vector::new(0, 1), 4);
        p.snake.tail = [Vector::new(40, 60), Vector::new(60, 60), Vector::new(60, 40)]
            .into_iter()
            .collect();
        let mut snakes = roster(vec![p]);

        let outcome = resolver.step("a", &mut snakes, &mut food);
        assert!(outcome.died);
        assert!(snakes["a"].snake.is_dead);
    }

    #[test]
    fn moving_onto_another_tail_kills_only_the_mover() {
        let cfg = config(200, 20, 0);
        let resolver = CollisionResolver::new(&cfg);
        let mut food = FoodSpawner::new(&cfg, 0);
        let a = player("a", Vector::new(20, 40), Vector::new(1, 0), 0);
        let mut b = player("b", Vector::new(40, 100), Vector::new(0, 1), 3);
        b.snake.tail = [Vector::new(40, 40), Vector::new(40, 60), Vector::new(40, 80)]
            .into_iter()
            .collect();
        let mut snakes = roster(vec![a, b]);

        let report = resolver.advance_all(&mut snakes, &mut food);
        assert!(snakes["a"].snake.is_dead);
        assert!(!snakes["b"].snake.is_dead);
        assert_eq!(report.deaths, vec!["a".to_string()]);
        assert_eq!(report.alive_humans, 1);
    }

    #[test]
    fn shared_head_cell_does_not_survive_a_tick() {
        let cfg = config(200, 20, 0);
        let resolver = CollisionResolver::new(&cfg);
        let mut food = FoodSpawner::new(&cfg, 0);
        let a = player("a", Vector::new(40, 40), Vector::new(1, 0), 0);
        let b = player("b", Vector::new(40, 40), Vector::new(1, 0), 0);
        let mut snakes = roster(vec![a, b]);

        let report = resolver.advance_all(&mut snakes, &mut food);
        assert!(report.alive_humans < 2);
    }

    #[test]
    fn exempt_autonomous_snake_neither_triggers_nor_suffers() {
        let cfg = config(200, 20, 0);
        let resolver = CollisionResolver::new(&cfg);
        let mut food = FoodSpawner::new(&cfg, 0);

        let mut server = Player::autonomous(&cfg.server_snake, 3);
        server.snake.place(Vector::new(100, 100));
        server.snake.tail = [Vector::new(40, 40)].into_iter().collect();
        let human = player("h", Vector::new(20, 40), Vector::new(1, 0), 0);
        let mut snakes = roster(vec![human, server]);

        resolver.advance_all(&mut snakes, &mut food);
        assert!(!snakes["h"].snake.is_dead);

        let strict = CollisionResolver::new(&GameConfig {
            autonomous_collision: true,
            ..cfg.clone()
        });
        let mut server = Player::autonomous(&cfg.server_snake, 3);
        server.snake.place(Vector::new(100, 100));
        server.snake.tail = [Vector::new(40, 40)].into_iter().collect();
        let human = player("h", Vector::new(20, 40), Vector::new(1, 0), 0);
        let mut snakes = roster(vec![human, server]);

        strict.advance_all(&mut snakes, &mut food);
        assert!(snakes["h"].snake.is_dead);
    }

    #[test]
    fn dead_snakes_are_skipped() {
        let cfg = config(200, 20, 0);
        let resolver = CollisionResolver::new(&cfg);
        let mut food = FoodSpawner::new(&cfg, 0);
        let mut p = player("a", Vector::new(40, 40), Vector::new(1, 0), 0);
        p.snake.is_dead = true;
        let mut snakes = roster(vec![p]);

        let outcome = resolver.step("a", &mut snakes, &mut food);
        assert_eq!(outcome, StepOutcome::default());
        assert_eq!(snakes["a"].snake.head(), Vector::new(40, 40));
    }
}
