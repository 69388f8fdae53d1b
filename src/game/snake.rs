//! Players, snakes and movement input

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SnakeTheme;

/// Caller-supplied player identifier
pub type PlayerId = String;

/// Id of the server-controlled snake within a room
pub const AUTONOMOUS_PLAYER_ID: &str = "Server";

/// Integer grid vector; positions are in pixels, velocities in cells per tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Vector {
    pub x: i32,
    pub y: i32,
}

impl Vector {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn is_zero(self) -> bool {
        self.x == 0 && self.y == 0
    }
}

/// A turn request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Self::Up, Self::Down, Self::Right, Self::Left];

    /// Accepts `UP`/`up` style names and browser `ArrowUp` key names
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        let key = key.strip_prefix("Arrow").unwrap_or(key);
        match key.to_ascii_uppercase().as_str() {
            "UP" => Some(Self::Up),
            "DOWN" => Some(Self::Down),
            "LEFT" => Some(Self::Left),
            "RIGHT" => Some(Self::Right),
            _ => None,
        }
    }

    pub fn as_key(self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
        }
    }

    pub fn velocity(self) -> Vector {
        match self {
            Self::Up => Vector::new(0, -1),
            Self::Down => Vector::new(0, 1),
            Self::Left => Vector::new(-1, 0),
            Self::Right => Vector::new(1, 0),
        }
    }

    fn is_horizontal(self) -> bool {
        matches!(self, Self::Left | Self::Right)
    }
}

/// Who controls a snake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayerKind {
    #[default]
    #[serde(rename = "human")]
    Human,
    #[serde(rename = "server", alias = "autonomous")]
    Autonomous,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Colours {
    pub body: String,
    pub head: String,
    pub eyes: String,
}

/// Authoritative snake state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snake {
    pub x: i32,
    pub y: i32,
    pub speed: Vector,
    /// Prior head positions, oldest first; never longer than `size`
    pub tail: VecDeque<Vector>,
    pub size: usize,
    #[serde(rename = "isDead")]
    pub is_dead: bool,
    pub score: u32,
    #[serde(rename = "type")]
    pub kind: PlayerKind,
}

impl Snake {
    pub fn new(kind: PlayerKind, speed: Vector, size: usize) -> Self {
        Self {
            x: 0,
            y: 0,
            speed,
            tail: VecDeque::with_capacity(size),
            size,
            is_dead: false,
            score: 0,
            kind,
        }
    }

    pub fn head(&self) -> Vector {
        Vector::new(self.x, self.y)
    }

    pub fn place(&mut self, at: Vector) {
        self.x = at.x;
        self.y = at.y;
    }

    /// Apply a turn unless it runs along the current axis of motion.
    /// Returns whether the velocity changed.
    pub fn turn(&mut self, direction: Direction) -> bool {
        let moving_horizontally = self.speed.x != 0;
        let moving_vertically = self.speed.y != 0;
        if (direction.is_horizontal() && moving_horizontally)
            || (!direction.is_horizontal() && moving_vertically)
        {
            return false;
        }
        self.speed = direction.velocity();
        true
    }

    pub fn tail_contains(&self, point: Vector) -> bool {
        self.tail.iter().any(|segment| *segment == point)
    }
}

/// A participant in a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub id: PlayerId,
    pub snake: Snake,
    pub colours: Colours,
    #[serde(rename = "type")]
    pub kind: PlayerKind,
}

impl Player {
    pub fn human(id: PlayerId, name: String, colours: Colours, initial_size: usize) -> Self {
        Self {
            name,
            id,
            snake: Snake::new(PlayerKind::Human, Direction::Right.velocity(), initial_size),
            colours,
            kind: PlayerKind::Human,
        }
    }

    pub fn autonomous(theme: &SnakeTheme, initial_size: usize) -> Self {
        Self {
            name: theme.name.clone(),
            id: AUTONOMOUS_PLAYER_ID.to_string(),
            snake: Snake::new(
                PlayerKind::Autonomous,
                Direction::Right.velocity(),
                initial_size,
            ),
            colours: theme.colours.clone(),
            kind: PlayerKind::Autonomous,
        }
    }

    pub fn is_autonomous(&self) -> bool {
        self.kind == PlayerKind::Autonomous
    }
}

/// Pick a direction perpendicular to the current motion
pub fn random_perpendicular<R: Rng + ?Sized>(speed: Vector, rng: &mut R) -> Direction {
    let reverse = Vector::new(-speed.x, -speed.y);
    let choices: Vec<Direction> = Direction::ALL
        .into_iter()
        .filter(|d| d.velocity() != speed && (speed.is_zero() || d.velocity() != reverse))
        .collect();
    choices.choose(rng).copied().unwrap_or(Direction::Right)
}
