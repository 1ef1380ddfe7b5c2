//! Validation of client messages
//!
//! Incoming payloads are untrusted. Instead of deserializing straight into
//! typed structs, each field is read and checked one at a time so that a kick
//! reason can name the exact field or value at fault.

use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::messages::Role;

/// Version of the metaprotocol spoken by this orchestrator
pub const METAPROTOCOL_VERSION: &str = "2.0.0";

/// Longest accepted nickname, in characters
pub const NICKNAME_MAX_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Message is not a JSON object")]
    NotAnObject,
    #[error("Field '{0}' is missing")]
    MissingField(String),
    #[error("Non-string value for field '{0}'")]
    NonString(String),
    #[error("Non-integral value for field '{0}'")]
    NonIntegral(String),
    #[error("Non-object value for field '{0}'")]
    NonObject(String),
    #[error("Non-array value for field '{0}'")]
    NonArray(String),
    #[error("Non-boolean value for field '{0}'")]
    NonBoolean(String),
    #[error("Received '{received}' message type, while {expected} was expected")]
    UnexpectedMessageType {
        received: String,
        expected: &'static str,
    },
    #[error("Invalid nickname")]
    InvalidNickname,
    #[error("Invalid role")]
    InvalidRole,
    #[error("Invalid metaprotocol version: Not MAJOR.MINOR.PATCH")]
    InvalidMetaprotocolVersion,
    #[error("Invalid value ({field}={value}): {constraint}")]
    InvalidValue {
        field: &'static str,
        value: i64,
        constraint: String,
    },
}

type Object = Map<String, Value>;

fn as_object(message: &Value) -> Result<&Object, ProtocolError> {
    message.as_object().ok_or(ProtocolError::NotAnObject)
}

fn field<'a>(object: &'a Object, name: &str) -> Result<&'a Value, ProtocolError> {
    object
        .get(name)
        .ok_or_else(|| ProtocolError::MissingField(name.to_string()))
}

pub fn read_string<'a>(object: &'a Object, name: &str) -> Result<&'a str, ProtocolError> {
    field(object, name)?
        .as_str()
        .ok_or_else(|| ProtocolError::NonString(name.to_string()))
}

pub fn read_int(object: &Object, name: &str) -> Result<i64, ProtocolError> {
    let value = field(object, name)?;
    if let Some(n) = value.as_i64() {
        return Ok(n);
    }
    // Integral floats such as 3.0 are accepted
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
            Ok(f as i64)
        }
        _ => Err(ProtocolError::NonIntegral(name.to_string())),
    }
}

pub fn read_object<'a>(object: &'a Object, name: &str) -> Result<&'a Object, ProtocolError> {
    field(object, name)?
        .as_object()
        .ok_or_else(|| ProtocolError::NonObject(name.to_string()))
}

pub fn read_array<'a>(object: &'a Object, name: &str) -> Result<&'a Vec<Value>, ProtocolError> {
    field(object, name)?
        .as_array()
        .ok_or_else(|| ProtocolError::NonArray(name.to_string()))
}

/// Reads a boolean field, an absent field reading as `false`
pub fn read_optional_bool(object: &Object, name: &str) -> Result<bool, ProtocolError> {
    match object.get(name) {
        None => Ok(false),
        Some(value) => value
            .as_bool()
            .ok_or_else(|| ProtocolError::NonBoolean(name.to_string())),
    }
}

/// Returns the `message_type` of a message
pub fn message_type(message: &Value) -> Result<&str, ProtocolError> {
    read_string(as_object(message)?, "message_type")
}

fn expect_message_type<'a>(
    message: &'a Value,
    expected: &'static str,
) -> Result<&'a Object, ProtocolError> {
    let received = message_type(message)?;
    if received != expected {
        return Err(ProtocolError::UnexpectedMessageType {
            received: received.to_string(),
            expected,
        });
    }
    as_object(message)
}

/// A nickname is 1 to 10 characters, none of them a space, tab, line feed,
/// form feed or carriage return
///
/// Other whitespace (vertical tab, non-breaking space) is accepted.
pub fn is_valid_nickname(nickname: &str) -> bool {
    let len = nickname.chars().count();
    (1..=NICKNAME_MAX_LEN).contains(&len) && !nickname.chars().any(is_nickname_separator)
}

fn is_nickname_separator(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0C' | '\r')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaprotocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl MetaprotocolVersion {
    /// The version this crate speaks, see [`METAPROTOCOL_VERSION`]
    pub const CURRENT: MetaprotocolVersion = MetaprotocolVersion {
        major: 2,
        minor: 0,
        patch: 0,
    };

    pub fn is_compatible_with(&self, other: &MetaprotocolVersion) -> bool {
        self.major == other.major
    }
}

impl FromStr for MetaprotocolVersion {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(ProtocolError::InvalidMetaprotocolVersion);
        }

        let mut numbers = [0u32; 3];
        for (number, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ProtocolError::InvalidMetaprotocolVersion);
            }
            *number = part
                .parse()
                .map_err(|_| ProtocolError::InvalidMetaprotocolVersion)?;
        }

        Ok(MetaprotocolVersion {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
        })
    }
}

impl fmt::Display for MetaprotocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginMessage {
    pub nickname: String,
    pub role: Role,
    pub metaprotocol_version: MetaprotocolVersion,
}

impl LoginMessage {
    pub fn parse(message: &Value) -> Result<Self, ProtocolError> {
        let object = expect_message_type(message, "LOGIN")?;

        let nickname = read_string(object, "nickname")?;
        if !is_valid_nickname(nickname) {
            return Err(ProtocolError::InvalidNickname);
        }

        let role = read_string(object, "role")?.parse::<Role>()?;
        let metaprotocol_version =
            read_string(object, "metaprotocol_version")?.parse::<MetaprotocolVersion>()?;

        Ok(LoginMessage {
            nickname: nickname.to_string(),
            role,
            metaprotocol_version,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnAckMessage {
    pub turn_number: i64,
    pub actions: Vec<Value>,
}

impl TurnAckMessage {
    pub fn parse(message: &Value) -> Result<Self, ProtocolError> {
        let object = expect_message_type(message, "TURN_ACK")?;
        let turn_number = read_int(object, "turn_number")?;
        let actions = read_array(object, "actions")?.clone();
        Ok(TurnAckMessage {
            turn_number,
            actions,
        })
    }

    /// Checks that the acknowledgement answers the last TURN sent
    pub fn check_turn_number(&self, expected: i64) -> Result<(), ProtocolError> {
        if self.turn_number != expected {
            return Err(ProtocolError::InvalidValue {
                field: "turn_number",
                value: self.turn_number,
                constraint: format!("expecting {}", expected),
            });
        }
        Ok(())
    }
}

/// Reads a game state object, which must hold an `all_clients` object
fn read_game_state(object: &Object, name: &str) -> Result<Value, ProtocolError> {
    let state = read_object(object, name)?;
    read_object(state, "all_clients")?;
    Ok(Value::Object(state.clone()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoInitAckMessage {
    pub initial_game_state: Value,
}

impl DoInitAckMessage {
    pub fn parse(message: &Value) -> Result<Self, ProtocolError> {
        let object = expect_message_type(message, "DO_INIT_ACK")?;
        Ok(DoInitAckMessage {
            initial_game_state: read_game_state(object, "initial_game_state")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoTurnAckMessage {
    pub winner_player_id: i64,
    pub game_state: Value,
    pub game_finished: bool,
}

impl DoTurnAckMessage {
    /// Parses a DO_TURN_ACK for a game with `nb_players` players in total
    /// (special players included)
    pub fn parse(message: &Value, nb_players: usize) -> Result<Self, ProtocolError> {
        let object = expect_message_type(message, "DO_TURN_ACK")?;

        let winner_player_id = read_int(object, "winner_player_id")?;
        if winner_player_id < -1 || winner_player_id >= nb_players as i64 {
            return Err(ProtocolError::InvalidValue {
                field: "winner_player_id",
                value: winner_player_id,
                constraint: format!("not in [-1, {})", nb_players),
            });
        }

        let game_state = read_game_state(object, "game_state")?;
        let game_finished = read_optional_bool(object, "game_finished")?;

        Ok(DoTurnAckMessage {
            winner_player_id,
            game_state,
            game_finished,
        })
    }
}
