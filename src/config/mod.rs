//! Configuration module - environment variables and the game tuning snapshot

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::game::snake::Colours;

/// Process configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Shared secret expected in the `X-Gitlab-Token` header of `/webhook`
    pub webhook_secret: Option<String>,
    /// Optional JSON file holding a [`GameConfig`]
    pub game_config_path: Option<PathBuf>,
    /// Allowed client origins for CORS (comma separated), any origin if unset
    pub client_origin: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:4002".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            webhook_secret: non_empty_var("WEBHOOK_SECRET"),
            game_config_path: non_empty_var("GAME_CONFIG_PATH").map(PathBuf::from),
            client_origin: non_empty_var("CLIENT_ORIGIN"),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// When a running game is declared over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EliminationPolicy {
    /// Over once no human snake is alive
    #[default]
    AllEliminated,
    /// Over once at most one human snake is alive; solo games fall back to zero
    LastStanding,
}

impl EliminationPolicy {
    /// Survivor count at or below which the game ends
    pub fn threshold(self, started_with: usize) -> usize {
        match self {
            Self::AllEliminated => 0,
            Self::LastStanding if started_with >= 2 => 1,
            Self::LastStanding => 0,
        }
    }
}

/// A weighted food variety with its own score
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoodKind {
    pub name: String,
    pub score: u32,
    pub weight: u32,
}

/// Lobby theming sent to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingRoomTheme {
    #[serde(rename = "waitingRoomMessage")]
    pub message: String,
    pub background_colour: String,
}

/// Name and colours of the server-controlled snake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnakeTheme {
    pub name: String,
    pub colours: Colours,
}

/// Tuning snapshot consumed by rooms at creation and by `getConfig`.
///
/// Fields marked `skip_serializing` are server-only and never reach clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameConfig {
    /// Playfield side length in pixels
    pub side: i32,
    /// Grid cell size in pixels
    pub grid_size: i32,
    /// Client render scale
    pub scale_factor: i32,
    /// Width of the reserved UI panel left of the playfield
    pub left_section_size: i32,
    /// Simulation ticks per second
    pub fps: u32,
    /// Number of food slots per room
    pub food_storage: usize,
    pub background_colour: String,
    /// Randomized per `config` reply
    pub background_number: u32,
    pub waiting_room: WaitingRoomTheme,
    pub server_snake: SnakeTheme,

    #[serde(skip_serializing)]
    pub room_capacity: usize,
    #[serde(skip_serializing)]
    pub grace_period_ms: u64,
    #[serde(skip_serializing)]
    pub elimination: EliminationPolicy,
    #[serde(skip_serializing)]
    pub autonomous_snake: bool,
    #[serde(skip_serializing)]
    pub autonomous_collision: bool,
    #[serde(skip_serializing)]
    pub autonomous_turn_ms: u64,
    #[serde(skip_serializing)]
    pub initial_size: usize,
    #[serde(skip_serializing)]
    pub food_kinds: Vec<FoodKind>,
    #[serde(skip_serializing)]
    pub input_rate_limit: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            side: 400,
            grid_size: 20,
            scale_factor: 20,
            left_section_size: 0,
            fps: 10,
            food_storage: 11,
            background_colour: "#1d1f21".to_string(),
            background_number: 1,
            waiting_room: WaitingRoomTheme {
                message: "Waiting for other players...".to_string(),
                background_colour: "#282a2e".to_string(),
            },
            server_snake: SnakeTheme {
                name: "Server Snake".to_string(),
                colours: Colours {
                    body: "#b5bd68".to_string(),
                    head: "#8c9440".to_string(),
                    eyes: "#000000".to_string(),
                },
            },
            room_capacity: 2,
            grace_period_ms: 3_000,
            elimination: EliminationPolicy::AllEliminated,
            autonomous_snake: false,
            autonomous_collision: false,
            autonomous_turn_ms: 3_000,
            initial_size: 3,
            food_kinds: Vec::new(),
            input_rate_limit: 30,
        }
    }
}

impl GameConfig {
    /// Number of grid cells along one side of the playfield
    pub fn cells_per_side(&self) -> i32 {
        (self.side / self.grid_size.max(1)).max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_size <= 0 {
            return Err(ConfigError::Invalid("gridSize must be positive"));
        }
        if self.side < self.grid_size {
            return Err(ConfigError::Invalid("side must hold at least one grid cell"));
        }
        if self.left_section_size < 0 {
            return Err(ConfigError::Invalid("leftSectionSize must not be negative"));
        }
        if self.fps == 0 {
            return Err(ConfigError::Invalid("fps must be positive"));
        }
        if self.room_capacity == 0 {
            return Err(ConfigError::Invalid("roomCapacity must be positive"));
        }
        if !self.food_kinds.is_empty() && self.food_kinds.iter().all(|k| k.weight == 0) {
            return Err(ConfigError::Invalid("foodKinds need at least one non-zero weight"));
        }
        Ok(())
    }
}

/// Holds the current tuning snapshot and refreshes it on demand
pub struct ConfigStore {
    path: Option<PathBuf>,
    current: RwLock<Arc<GameConfig>>,
}

impl ConfigStore {
    /// Load the initial snapshot; a configured but unreadable file is fatal
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = read_game_config(path.as_deref())?;
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(config)),
        })
    }

    /// Store with a fixed snapshot and no backing file
    #[cfg(test)]
    pub fn from_config(config: GameConfig) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn current(&self) -> Arc<GameConfig> {
        self.current.read().clone()
    }

    /// Re-read the backing source. On failure the previous snapshot stays.
    pub fn reload(&self) -> Result<Arc<GameConfig>, ConfigError> {
        let config = match &self.path {
            Some(path) => Arc::new(read_game_config(Some(path))?),
            // Nothing to re-read, keep whatever the store was built with
            None => return Ok(self.current()),
        };
        *self.current.write() = config.clone();
        info!(
            side = config.side,
            fps = config.fps,
            food = config.food_storage,
            "Game configuration reloaded"
        );
        Ok(config)
    }
}

fn read_game_config(path: Option<&Path>) -> Result<GameConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&raw)?
        }
        None => GameConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Failed to read game config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse game config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid game config: {0}")]
    Invalid(&'static str),
}
