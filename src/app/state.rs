//! Application state shared across routes

use std::sync::Arc;

use crate::config::{Config, ConfigStore};
use crate::matchmaking::SessionService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub game_config: Arc<ConfigStore>,
    pub sessions: Arc<SessionService>,
}

impl AppState {
    pub fn new(config: Config, game_config: ConfigStore) -> Self {
        let config = Arc::new(config);
        let game_config = Arc::new(game_config);

        // Session service owns the registry and the room directory
        let sessions = Arc::new(SessionService::new(game_config.clone()));

        Self {
            config,
            game_config,
            sessions,
        }
    }
}
