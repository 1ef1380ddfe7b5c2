//! Reference bots
//!
//! Minimal clients that follow the protocol until the orchestrator kicks
//! them. Game states and actions are left empty: the orchestrator relays
//! them without looking inside.

use crate::network::{Client, ClientError};
use log::{debug, info};
use serde_json::{json, Value};
use shared::{ClientMessage, ServerMessage};

/// What a player or visualization bot saw during a game
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerSummary {
    pub player_id: Option<i64>,
    pub turns_seen: usize,
    pub last_turn_number: Option<i64>,
    pub winner_player_id: Option<i64>,
    pub kick_reason: String,
}

/// What a game logic bot saw during a game
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameLogicSummary {
    pub nb_players: usize,
    pub nb_special_players: usize,
    /// Number of action entries in each DO_TURN received
    pub player_actions_per_turn: Vec<usize>,
    pub kick_reason: String,
}

/// Smallest game state the orchestrator accepts
pub fn empty_game_state() -> Value {
    json!({ "all_clients": {} })
}

/// Answers every TURN with an empty action list until kicked
///
/// Expects the LOGIN to have been sent already.
pub async fn run_player(client: &mut Client) -> Result<PlayerSummary, ClientError> {
    let mut summary = PlayerSummary::default();

    loop {
        match client.read_server_message().await? {
            ServerMessage::LoginAck => debug!("Logged in"),
            ServerMessage::GameStarts(starts) => {
                info!("Game starts, player ID {}", starts.player_id);
                summary.player_id = Some(starts.player_id);
            }
            ServerMessage::Turn(turn) => {
                summary.turns_seen += 1;
                summary.last_turn_number = Some(turn.turn_number);
                client
                    .send_message(&ClientMessage::TurnAck {
                        turn_number: turn.turn_number,
                        actions: vec![],
                    })
                    .await?;
            }
            ServerMessage::GameEnds(ends) => {
                info!("Game ends, winner {}", ends.winner_player_id);
                summary.winner_player_id = Some(ends.winner_player_id);
            }
            ServerMessage::Kick { kick_reason } => {
                info!("Kicked: {}", kick_reason);
                summary.kick_reason = kick_reason;
                return Ok(summary);
            }
            other => debug!("Ignoring {}", other.message_type()),
        }
    }
}

/// Answers DO_INIT and every DO_TURN with empty states until kicked
///
/// Expects the LOGIN to have been sent already.
pub async fn run_game_logic(client: &mut Client) -> Result<GameLogicSummary, ClientError> {
    let mut summary = GameLogicSummary::default();

    loop {
        match client.read_server_message().await? {
            ServerMessage::LoginAck => debug!("Logged in"),
            ServerMessage::DoInit {
                nb_players,
                nb_special_players,
                nb_turns_max,
            } => {
                info!(
                    "Initializing game (players={}, special players={}, turns={})",
                    nb_players, nb_special_players, nb_turns_max
                );
                summary.nb_players = nb_players;
                summary.nb_special_players = nb_special_players;
                client
                    .send_message(&ClientMessage::DoInitAck {
                        initial_game_state: empty_game_state(),
                    })
                    .await?;
            }
            ServerMessage::DoTurn { player_actions } => {
                summary.player_actions_per_turn.push(player_actions.len());
                client
                    .send_message(&ClientMessage::DoTurnAck {
                        winner_player_id: -1,
                        game_state: empty_game_state(),
                        game_finished: false,
                    })
                    .await?;
            }
            ServerMessage::Kick { kick_reason } => {
                info!("Kicked: {}", kick_reason);
                summary.kick_reason = kick_reason;
                return Ok(summary);
            }
            other => debug!("Ignoring {}", other.message_type()),
        }
    }
}
