//! # Turn Orchestrator Server
//!
//! This library implements the orchestrator of turn-based network games. It
//! relays messages between one game logic program and a set of players and
//! visualizations, all connected over TCP, and paces the game turn by turn.
//!
//! ## Core Responsibilities
//!
//! ### Session Management
//! Accepts connections, validates the LOGIN that opens each one and enforces
//! the capacity of every role. A client that breaks the protocol is kicked
//! with a human-readable reason.
//!
//! ### Turn Pacing
//! Once the game starts, the game logic is asked to initialize, then to
//! compute one turn after another. In timed mode turns are spaced by a fixed
//! delay; in fast mode a new turn starts as soon as every connected player
//! has answered.
//!
//! ### Broadcasting
//! Every new game state is forwarded to players and visualizations. Slow
//! clients only ever receive the newest turn.
//!
//! ## Architecture Design
//!
//! ### One Task per Connection
//! Each socket is owned by a single handler task. Handlers talk to each other
//! through channels only; the shared [`state::GlobalState`] registry holds
//! handles, never sockets.
//!
//! ### Cooperative Shutdown
//! Any handler can be asked to kick its client through a kick handle. The
//! shutdown coordinator uses these to close everything down cleanly.
//!
//! ## Module Organization
//!
//! - `config`: game parameters and their accepted ranges
//! - `connection`: framed JSON connection actor
//! - `login`: first-message validation and admission
//! - `client_manager`: rosters of players and visualizations
//! - `client`: player and visualization handler
//! - `game`: game logic handler and turn loop
//! - `state`: session registry and game phase
//! - `network`: listener and shutdown coordinator
//! - `prompt`: interactive commands
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::Config;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         nb_players_max: 2,
//!         autostart: true,
//!         ..Config::default()
//!     };
//!     config.validate()?;
//!
//!     let mut server = Server::bind(config).await?;
//!     let exit = server.wait_exit().await;
//!     server.shutdown().await;
//!
//!     std::process::exit(exit.map(|e| e.exit_code()).unwrap_or(1));
//! }
//! ```

pub mod client;
pub mod client_manager;
pub mod config;
pub mod connection;
pub mod game;
pub mod login;
pub mod network;
pub mod prompt;
pub mod state;
