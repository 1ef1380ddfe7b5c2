//! Interactive commands read from standard input
//!
//! `start`, `print VARIABLE|all`, `set VARIABLE=VALUE` (or `set VARIABLE
//! VALUE`) and `quit`. Answers are written one per line.

use crate::config::VARIABLES;
use crate::state::{GamePhase, SharedState};
use log::debug;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Print(String),
    Set { variable: String, value: String },
    Quit,
}

/// How the prompt stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptExit {
    Quit,
    EndOfInput,
}

/// Parses one line, returning a usage hint if it is not a valid command
///
/// Empty lines parse to `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(keyword) = words.next() else {
        return Ok(None);
    };
    let arguments: Vec<&str> = words.collect();

    match (keyword, arguments.as_slice()) {
        ("start", []) => Ok(Some(Command::Start)),
        ("start", _) => Err("expected syntax: start".to_string()),
        ("quit", []) => Ok(Some(Command::Quit)),
        ("quit", _) => Err("expected syntax: quit".to_string()),
        ("print", [variable]) => Ok(Some(Command::Print(variable.to_string()))),
        ("print", _) => Err("expected syntax: print VARIABLE".to_string()),
        ("set", [assignment]) => match assignment.split_once('=') {
            Some((variable, value)) if !variable.is_empty() && !value.is_empty() => {
                Ok(Some(Command::Set {
                    variable: variable.to_string(),
                    value: value.to_string(),
                }))
            }
            _ => Err(set_usage()),
        },
        ("set", [variable, value]) => Ok(Some(Command::Set {
            variable: variable.to_string(),
            value: value.to_string(),
        })),
        ("set", _) => Err(set_usage()),
        _ => Err("Unknown command. Available commands: start, print, set, quit".to_string()),
    }
}

fn set_usage() -> String {
    "expected syntax: set VARIABLE=VALUE\n   (alt syntax): set VARIABLE VALUE".to_string()
}

/// Runs a command against the registry and returns the text to show
///
/// `quit` is left to the caller.
pub async fn execute(state: &SharedState, command: &Command) -> String {
    let mut guard = state.lock().await;
    match command {
        Command::Start => match guard.start_game() {
            Ok(()) => "Game started".to_string(),
            Err(e) => e.to_string(),
        },
        Command::Print(variable) if variable == "all" => VARIABLES
            .iter()
            .filter_map(|name| {
                guard
                    .config
                    .variable(name)
                    .ok()
                    .map(|value| format!("{}={}", name, value))
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Command::Print(variable) => match guard.config.variable(variable) {
            Ok(value) => format!("{}={}", variable, value),
            Err(e) => e.to_string(),
        },
        Command::Set { .. } if guard.phase != GamePhase::NotRunning => {
            "Cannot change variables once the game has started".to_string()
        }
        Command::Set { variable, value } => match guard.config.set_variable(variable, value) {
            Ok(()) => match guard.config.variable(variable) {
                Ok(new_value) => format!("{}={}", variable, new_value),
                Err(e) => e.to_string(),
            },
            Err(e) => e.to_string(),
        },
        Command::Quit => String::new(),
    }
}

/// Reads commands until `quit` or the end of `input`
pub async fn run_prompt<R, W>(input: R, mut output: W, state: SharedState) -> PromptExit
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!("Cannot read prompt input: {}", e);
                break;
            }
        };

        let answer = match parse_command(&line) {
            Ok(None) => continue,
            Ok(Some(Command::Quit)) => return PromptExit::Quit,
            Ok(Some(command)) => execute(&state, &command).await,
            Err(usage) => usage,
        };

        let written = output.write_all(format!("{}\n", answer).as_bytes()).await;
        if written.is_err() || output.flush().await.is_err() {
            debug!("Cannot write prompt output");
        }
    }

    debug!("End of prompt input, the server keeps running");
    PromptExit::EndOfInput
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::connection::{ConnectionId, KickHandle};
    use crate::state::{GameLogicHandle, GlobalState};
    use tokio::sync::{mpsc, oneshot};

    fn test_state() -> SharedState {
        GlobalState::shared(Config::default())
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("start"), Ok(Some(Command::Start)));
        assert_eq!(parse_command("  quit "), Ok(Some(Command::Quit)));
        assert_eq!(parse_command(""), Ok(None));
        assert_eq!(
            parse_command("print nb-turns-max"),
            Ok(Some(Command::Print("nb-turns-max".to_string())))
        );

        let expected = Command::Set {
            variable: "delay-turns".to_string(),
            value: "250".to_string(),
        };
        assert_eq!(parse_command("set delay-turns=250"), Ok(Some(expected.clone())));
        assert_eq!(parse_command("set delay-turns 250"), Ok(Some(expected)));
    }

    #[test]
    fn test_parse_errors_give_usage() {
        assert_eq!(parse_command("start now"), Err("expected syntax: start".to_string()));
        assert_eq!(
            parse_command("print"),
            Err("expected syntax: print VARIABLE".to_string())
        );
        assert!(parse_command("set delay-turns")
            .unwrap_err()
            .starts_with("expected syntax: set VARIABLE=VALUE"));
        assert!(parse_command("set =3").is_err());
        assert!(parse_command("jump").unwrap_err().starts_with("Unknown command"));
    }

    #[tokio::test]
    async fn test_print_and_set() {
        let state = test_state();

        let answer = execute(&state, &Command::Print("nb-turns-max".to_string())).await;
        assert_eq!(answer, "nb-turns-max=100");

        let set = Command::Set {
            variable: "nb-turns-max".to_string(),
            value: "42".to_string(),
        };
        assert_eq!(execute(&state, &set).await, "nb-turns-max=42");
        assert_eq!(state.lock().await.config.nb_turns_max, 42);

        let out_of_range = Command::Set {
            variable: "nb-turns-max".to_string(),
            value: "0".to_string(),
        };
        assert_eq!(
            execute(&state, &out_of_range).await,
            "Bad VALUE=0: Not in [1,65535]"
        );

        let all = execute(&state, &Command::Print("all".to_string())).await;
        assert_eq!(all.lines().count(), VARIABLES.len());
        assert!(all.contains("nb-turns-max=42"));
    }

    #[tokio::test]
    async fn test_start_command() {
        let state = test_state();
        assert_eq!(
            execute(&state, &Command::Start).await,
            "Cannot start: No game logic"
        );

        let (kick, _) = KickHandle::detached();
        let (start_tx, _start_rx) = oneshot::channel();
        let (disconnected_tx, _) = mpsc::unbounded_channel();
        state.lock().await.game_logic = Some(GameLogicHandle::new(
            ConnectionId(1),
            kick,
            start_tx,
            disconnected_tx,
        ));

        assert_eq!(execute(&state, &Command::Start).await, "Game started");
        assert_eq!(
            execute(&state, &Command::Start).await,
            "Game has already been started"
        );

        let set = Command::Set {
            variable: "nb-turns-max".to_string(),
            value: "5".to_string(),
        };
        assert!(execute(&state, &set).await.starts_with("Cannot change"));
    }

    #[tokio::test]
    async fn test_run_prompt_until_quit() {
        let input = tokio_test::io::Builder::new()
            .read(b"print nb-players-max\n\nbogus\nquit\n")
            .build();
        let output = tokio_test::io::Builder::new()
            .write(b"nb-players-max=4\n")
            .write(b"Unknown command. Available commands: start, print, set, quit\n")
            .build();

        let exit = run_prompt(tokio::io::BufReader::new(input), output, test_state()).await;
        assert_eq!(exit, PromptExit::Quit);
    }

    #[tokio::test]
    async fn test_run_prompt_end_of_input() {
        let input = tokio_test::io::Builder::new().build();
        let output = tokio_test::io::Builder::new().build();

        let exit = run_prompt(tokio::io::BufReader::new(input), output, test_state()).await;
        assert_eq!(exit, PromptExit::EndOfInput);
    }
}
