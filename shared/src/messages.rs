//! Message catalogue exchanged between the orchestrator and its clients
//!
//! Every message is a JSON object tagged by `message_type`. Game states and
//! actions are opaque to the orchestrator and carried as raw [`Value`]s.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::protocol::ProtocolError;

/// Role requested by a client in its LOGIN message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "player")]
    Player,
    #[serde(rename = "special player")]
    SpecialPlayer,
    #[serde(rename = "visualization")]
    Visualization,
    #[serde(rename = "game logic")]
    GameLogic,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Player => "player",
            Role::SpecialPlayer => "special player",
            Role::Visualization => "visualization",
            Role::GameLogic => "game logic",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "player" => Ok(Role::Player),
            "special player" => Ok(Role::SpecialPlayer),
            "visualization" => Ok(Role::Visualization),
            "game logic" => Ok(Role::GameLogic),
            _ => Err(ProtocolError::InvalidRole),
        }
    }
}

/// Public information about a player, as shown to visualizations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInformation {
    pub player_id: i64,
    pub nickname: String,
    pub remote_address: String,
    pub is_connected: bool,
}

/// Actions submitted by one player for one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerActions {
    pub player_id: i64,
    pub turn_number: i64,
    pub actions: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStarts {
    pub player_id: i64,
    pub players_info: Vec<PlayerInformation>,
    pub nb_players: usize,
    pub nb_special_players: usize,
    pub nb_turns_max: u32,
    pub milliseconds_before_first_turn: f64,
    pub milliseconds_between_turns: f64,
    pub initial_game_state: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub turn_number: i64,
    pub game_state: Value,
    pub players_info: Vec<PlayerInformation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEnds {
    pub winner_player_id: i64,
    pub game_state: Value,
}

/// Messages sent by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type")]
pub enum ServerMessage {
    #[serde(rename = "LOGIN_ACK")]
    LoginAck,
    #[serde(rename = "KICK")]
    Kick { kick_reason: String },
    #[serde(rename = "DO_INIT")]
    DoInit {
        nb_players: usize,
        nb_special_players: usize,
        nb_turns_max: u32,
    },
    #[serde(rename = "GAME_STARTS")]
    GameStarts(GameStarts),
    #[serde(rename = "TURN")]
    Turn(Turn),
    #[serde(rename = "DO_TURN")]
    DoTurn { player_actions: Vec<PlayerActions> },
    #[serde(rename = "GAME_ENDS")]
    GameEnds(GameEnds),
}

impl ServerMessage {
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::LoginAck => "LOGIN_ACK",
            ServerMessage::Kick { .. } => "KICK",
            ServerMessage::DoInit { .. } => "DO_INIT",
            ServerMessage::GameStarts(_) => "GAME_STARTS",
            ServerMessage::Turn(_) => "TURN",
            ServerMessage::DoTurn { .. } => "DO_TURN",
            ServerMessage::GameEnds(_) => "GAME_ENDS",
        }
    }
}

/// Messages sent by clients
///
/// The orchestrator never deserializes these directly: incoming JSON goes
/// through the field-by-field validation in [`crate::protocol`] so that every
/// rejection comes with a precise reason. Clients use this type to build what
/// they send.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "message_type")]
pub enum ClientMessage {
    #[serde(rename = "LOGIN")]
    Login {
        nickname: String,
        role: Role,
        metaprotocol_version: String,
    },
    #[serde(rename = "TURN_ACK")]
    TurnAck {
        turn_number: i64,
        actions: Vec<Value>,
    },
    #[serde(rename = "DO_INIT_ACK")]
    DoInitAck { initial_game_state: Value },
    #[serde(rename = "DO_TURN_ACK")]
    DoTurnAck {
        winner_player_id: i64,
        game_state: Value,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        game_finished: bool,
    },
}
