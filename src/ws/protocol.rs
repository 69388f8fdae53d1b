//! WebSocket protocol message definitions
//! These are the wire types for client-server communication. Every JSON
//! message is an object tagged by its `event` field.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::GameConfig;
use crate::game::food::FoodItem;
use crate::game::snake::{Colours, Direction, Player, PlayerId};

/// Raw keep-alive frame, answered verbatim
pub const KEEP_ALIVE: &str = "p";

/// Prefix of the compact movement form `m:<playerId>:<direction>`
const MOVEMENT_PREFIX: &str = "m:";

const CLIENT_EVENTS: &[&str] = &[
    "newPlayer",
    "waitingRoomStatus",
    "startGame",
    "playerMovement",
    "playerDisconnected",
    "getConfig",
    "foodEaten",
    "updatePlayer",
    "ping",
];

/// Player fields a client may supply; anything else it sends is ignored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSpec {
    pub name: String,
    pub id: Option<PlayerId>,
    pub colours: Option<Colours>,
}

/// Food slot reference, sent as either a number or a numeric string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlotRef {
    Number(usize),
    Text(String),
}

impl SlotRef {
    pub fn slot(&self) -> Option<usize> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ClientMsg {
    /// Enter the lobby of the current room
    #[serde(rename = "newPlayer")]
    NewPlayer {
        #[serde(default)]
        player: PlayerSpec,
    },

    /// Ask for the lobby roster to be broadcast
    #[serde(rename = "waitingRoomStatus")]
    WaitingRoomStatus,

    #[serde(rename = "startGame")]
    StartGame,

    #[serde(rename = "playerMovement")]
    PlayerMovement {
        #[serde(default)]
        player: Option<PlayerSpec>,
        key: String,
    },

    /// Lobby departure announced by a client
    #[serde(rename = "playerDisconnected")]
    PlayerDisconnected {
        #[serde(default)]
        id: Option<PlayerId>,
    },

    #[serde(rename = "getConfig")]
    GetConfig,

    /// Legacy client-side food report
    #[serde(rename = "foodEaten")]
    FoodEaten { id: SlotRef },

    /// Rename / recolour a lobby entry
    #[serde(rename = "updatePlayer")]
    UpdatePlayer {
        #[serde(default)]
        id: Option<PlayerId>,
        #[serde(default)]
        player: PlayerSpec,
    },

    #[serde(rename = "ping")]
    Ping,
}

/// A decoded inbound text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    KeepAlive,
    Movement {
        player_id: PlayerId,
        direction: Direction,
    },
    Message(ClientMsg),
}

impl Inbound {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let text = text.trim();
        if text == KEEP_ALIVE {
            return Ok(Self::KeepAlive);
        }
        if let Some(rest) = text.strip_prefix(MOVEMENT_PREFIX) {
            let (player_id, key) = rest
                .rsplit_once(':')
                .ok_or_else(|| ProtocolError::Shorthand(text.to_string()))?;
            if player_id.is_empty() {
                return Err(ProtocolError::Shorthand(text.to_string()));
            }
            let direction =
                Direction::from_key(key).ok_or_else(|| ProtocolError::Direction(key.to_string()))?;
            return Ok(Self::Movement {
                player_id: player_id.to_string(),
                direction,
            });
        }

        let value: serde_json::Value = serde_json::from_str(text)?;
        let event = value
            .get("event")
            .and_then(|e| e.as_str())
            .ok_or(ProtocolError::MissingEvent)?;
        if !CLIENT_EVENTS.contains(&event) {
            return Err(ProtocolError::UnknownEvent(event.to_string()));
        }
        Ok(Self::Message(serde_json::from_value(value)?))
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerMsg {
    /// Unordered lobby roster
    #[serde(rename = "waitingRoomStatus")]
    WaitingRoomStatus { players: Vec<Player> },

    #[serde(rename = "startGame")]
    StartGame,

    /// Relay of an accepted turn
    #[serde(rename = "playerMovement")]
    PlayerMovement { id: PlayerId, key: String },

    #[serde(rename = "playerDisconnected")]
    PlayerDisconnected { id: PlayerId },

    /// Roster-wide snake state, once per tick
    #[serde(rename = "snake_update")]
    SnakeUpdate {
        #[serde(rename = "snakesMap")]
        snakes_map: BTreeMap<PlayerId, Player>,
    },

    /// A single respawned food slot
    #[serde(rename = "updateFood")]
    UpdateFood { food: Vec<FoodItem> },

    /// Every food slot of the room
    #[serde(rename = "spawnFood")]
    SpawnFood { food: Vec<FoodItem> },

    #[serde(rename = "config")]
    Config {
        config: GameConfig,
        food: Vec<FoodItem>,
    },

    #[serde(rename = "gameover")]
    GameOver,

    #[serde(rename = "pong")]
    Pong,
}

impl ServerMsg {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::WaitingRoomStatus { .. } => "waitingRoomStatus",
            Self::StartGame => "startGame",
            Self::PlayerMovement { .. } => "playerMovement",
            Self::PlayerDisconnected { .. } => "playerDisconnected",
            Self::SnakeUpdate { .. } => "snake_update",
            Self::UpdateFood { .. } => "updateFood",
            Self::SpawnFood { .. } => "spawnFood",
            Self::Config { .. } => "config",
            Self::GameOver => "gameover",
            Self::Pong => "pong",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("payload has no event name")]
    MissingEvent,

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("malformed movement shorthand: {0}")]
    Shorthand(String),

    #[error("unknown direction: {0}")]
    Direction(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_new_player() {
        let text = r#"{"event":"newPlayer","player":{"name":"test_player7","id":"7","colours":{"head":"green","body":"yellow","eyes":"black"}}}"#;
        let Inbound::Message(ClientMsg::NewPlayer { player }) = Inbound::decode(text).unwrap()
        else {
            panic!("expected newPlayer");
        };
        assert_eq!(player.name, "test_player7");
        assert_eq!(player.id.as_deref(), Some("7"));
        assert_eq!(player.colours.unwrap().head, "green");
    }

    #[test]
    fn decodes_unit_events_with_extra_fields() {
        assert_eq!(
            Inbound::decode(r#"{"event":"startGame","player":{}}"#).unwrap(),
            Inbound::Message(ClientMsg::StartGame)
        );
        assert_eq!(
            Inbound::decode(r#"{"event":"ping"}"#).unwrap(),
            Inbound::Message(ClientMsg::Ping)
        );
    }

    #[test]
    fn decodes_compact_movement() {
        assert_eq!(
            Inbound::decode("m:42:LEFT").unwrap(),
            Inbound::Movement {
                player_id: "42".into(),
                direction: Direction::Left
            }
        );
        assert!(matches!(
            Inbound::decode("m:42:SIDEWAYS"),
            Err(ProtocolError::Direction(_))
        ));
        assert!(matches!(
            Inbound::decode("m:LEFT"),
            Err(ProtocolError::Shorthand(_))
        ));
    }

    #[test]
    fn keep_alive_and_errors() {
        assert_eq!(Inbound::decode("p").unwrap(), Inbound::KeepAlive);
        assert!(matches!(
            Inbound::decode("{not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            Inbound::decode(r#"{"event":"teleport"}"#),
            Err(ProtocolError::UnknownEvent(e)) if e == "teleport"
        ));
        assert!(matches!(
            Inbound::decode(r#"{"key":"UP"}"#),
            Err(ProtocolError::MissingEvent)
        ));
    }

    #[test]
    fn food_slot_accepts_string_or_number() {
        let Inbound::Message(ClientMsg::FoodEaten { id }) =
            Inbound::decode(r#"{"event":"foodEaten","id":"3"}"#).unwrap()
        else {
            panic!("expected foodEaten");
        };
        assert_eq!(id.slot(), Some(3));
        assert_eq!(SlotRef::Number(5).slot(), Some(5));
        assert_eq!(SlotRef::Text("x".into()).slot(), None);
    }

    #[test]
    fn server_events_are_tagged() {
        assert_eq!(ServerMsg::GameOver.encode().unwrap(), r#"{"event":"gameover"}"#);
        assert_eq!(ServerMsg::Pong.encode().unwrap(), r#"{"event":"pong"}"#);

        let update = ServerMsg::SnakeUpdate {
            snakes_map: BTreeMap::new(),
        };
        let json: serde_json::Value = serde_json::from_str(&update.encode().unwrap()).unwrap();
        assert_eq!(json["event"], update.event_name());
        assert!(json["snakesMap"].is_object());
    }
}
