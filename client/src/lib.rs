//! # Orchestrator Client Library
//!
//! Client side of the orchestrator protocol, usable by game logic programs,
//! players and visualizations alike.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! Manages the TCP connection to the orchestrator:
//! - Framed JSON reads and writes
//! - Typed decoding of orchestrator messages
//! - Raw writes for testing malformed input
//!
//! ### Game Module (`game`)
//! Reference bots that play along with the protocol:
//! - A player (or visualization) acknowledging every turn
//! - A game logic answering with empty game states
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::game::run_player;
//! use client::network::Client;
//! use shared::Role;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("127.0.0.1:4242").await?;
//!     client.send_login(Role::Player, "bot").await?;
//!
//!     let summary = run_player(&mut client).await?;
//!     println!("Saw {} turns", summary.turns_seen);
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod network;
