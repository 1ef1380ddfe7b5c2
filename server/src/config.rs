//! Orchestrator configuration
//!
//! Built once from the command line, then owned by the session registry.
//! The prompt can read and change the game parameters through
//! [`Config::variable`] and [`Config::set_variable`] until the game starts;
//! the game logic handler snapshots the configuration when the game begins.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const NB_TURNS_MAX_RANGE: (u32, u32) = (1, 65535);
pub const NB_PLAYERS_MAX_RANGE: (usize, usize) = (1, 1024);
pub const NB_SPECIAL_PLAYERS_MAX_RANGE: (usize, usize) = (0, 1024);
pub const NB_VISUS_MAX_RANGE: (usize, usize) = (0, 1024);
pub const DELAY_RANGE: (f64, f64) = (50.0, 10000.0);

/// Names accepted by `print` and `set`
pub const VARIABLES: [&str; 6] = [
    "nb-turns-max",
    "nb-players-max",
    "nb-splayers-max",
    "nb-visus-max",
    "delay-first-turn",
    "delay-turns",
];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Bad VARIABLE={0}. Accepted values: {accepted}", accepted = VARIABLES.join(", "))]
    UnknownVariable(String),
    #[error("Bad VALUE={value}: {reason}")]
    InvalidValue { value: String, reason: String },
    #[error("Bad VALUE={value}: Not in [{min},{max}]")]
    OutOfRange {
        value: String,
        min: String,
        max: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Interface to listen on
    pub bind_addr: String,
    /// TCP port to listen on, 0 picks a free one
    pub port: u16,
    pub nb_players_max: usize,
    pub nb_special_players_max: usize,
    pub nb_visus_max: usize,
    pub nb_turns_max: u32,
    /// Milliseconds between GAME_STARTS and the first DO_TURN
    pub delay_first_turn_ms: f64,
    /// Milliseconds between a TURN and the next DO_TURN (timed mode)
    pub delay_turns_ms: f64,
    /// Start as soon as every roster is full
    pub autostart: bool,
    /// Lock-step turns instead of fixed delays
    pub fast: bool,
    /// Time left to the peer to read a KICK before the socket closes
    pub kick_grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "0.0.0.0".to_string(),
            port: 4242,
            nb_players_max: 4,
            nb_special_players_max: 0,
            nb_visus_max: 1,
            nb_turns_max: 100,
            delay_first_turn_ms: 1000.0,
            delay_turns_ms: 1000.0,
            autostart: false,
            fast: false,
            kick_grace_ms: 500,
        }
    }
}

impl Config {
    /// Convenience: `addr:port` socket string.
    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn delay_first_turn(&self) -> Duration {
        Duration::from_secs_f64(self.delay_first_turn_ms / 1000.0)
    }

    pub fn delay_turns(&self) -> Duration {
        Duration::from_secs_f64(self.delay_turns_ms / 1000.0)
    }

    pub fn kick_grace(&self) -> Duration {
        Duration::from_millis(self.kick_grace_ms)
    }

    /// Checks every game parameter against its accepted range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(out_of_range(&self.port, &1, &u16::MAX));
        }
        check_range(self.nb_turns_max, NB_TURNS_MAX_RANGE)?;
        check_range(self.nb_players_max, NB_PLAYERS_MAX_RANGE)?;
        check_range(self.nb_special_players_max, NB_SPECIAL_PLAYERS_MAX_RANGE)?;
        check_range(self.nb_visus_max, NB_VISUS_MAX_RANGE)?;
        check_range(self.delay_first_turn_ms, DELAY_RANGE)?;
        check_range(self.delay_turns_ms, DELAY_RANGE)?;
        Ok(())
    }

    /// Current value of a prompt variable
    pub fn variable(&self, name: &str) -> Result<String, ConfigError> {
        match name {
            "nb-turns-max" => Ok(self.nb_turns_max.to_string()),
            "nb-players-max" => Ok(self.nb_players_max.to_string()),
            "nb-splayers-max" => Ok(self.nb_special_players_max.to_string()),
            "nb-visus-max" => Ok(self.nb_visus_max.to_string()),
            "delay-first-turn" => Ok(self.delay_first_turn_ms.to_string()),
            "delay-turns" => Ok(self.delay_turns_ms.to_string()),
            _ => Err(ConfigError::UnknownVariable(name.to_string())),
        }
    }

    /// Parses `value` and assigns it to a prompt variable if it is in range
    pub fn set_variable(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        match name {
            "nb-turns-max" => self.nb_turns_max = parse_in_range(value, NB_TURNS_MAX_RANGE)?,
            "nb-players-max" => {
                self.nb_players_max = parse_in_range(value, NB_PLAYERS_MAX_RANGE)?
            }
            "nb-splayers-max" => {
                self.nb_special_players_max = parse_in_range(value, NB_SPECIAL_PLAYERS_MAX_RANGE)?
            }
            "nb-visus-max" => self.nb_visus_max = parse_in_range(value, NB_VISUS_MAX_RANGE)?,
            "delay-first-turn" => self.delay_first_turn_ms = parse_in_range(value, DELAY_RANGE)?,
            "delay-turns" => self.delay_turns_ms = parse_in_range(value, DELAY_RANGE)?,
            _ => return Err(ConfigError::UnknownVariable(name.to_string())),
        }
        Ok(())
    }
}

fn out_of_range<T: Display>(value: &T, min: &T, max: &T) -> ConfigError {
    ConfigError::OutOfRange {
        value: value.to_string(),
        min: min.to_string(),
        max: max.to_string(),
    }
}

fn check_range<T: PartialOrd + Display>(value: T, (min, max): (T, T)) -> Result<T, ConfigError> {
    // NaN fails both comparisons and is rejected here too
    if value >= min && value <= max {
        Ok(value)
    } else {
        Err(out_of_range(&value, &min, &max))
    }
}

fn parse_in_range<T>(value: &str, range: (T, T)) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Display + Copy,
    T::Err: Display,
{
    let parsed = value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            value: value.to_string(),
            reason: e.to_string(),
        })?;
    check_range(parsed, range).map_err(|_| ConfigError::OutOfRange {
        value: value.to_string(),
        min: range.0.to_string(),
        max: range.1.to_string(),
    })
}
