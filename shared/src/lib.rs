//! # Shared Protocol Library
//!
//! Wire format and message definitions used by both the orchestrator and the
//! clients that connect to it (game logic, players and visualizations).
//!
//! ## Modules
//!
//! ### Codec (`codec`)
//! Length-prefixed JSON framing over any async byte stream, with the
//! first-message and regular size caps.
//!
//! ### Messages (`messages`)
//! Typed records for every message of the protocol. Game states and actions
//! stay opaque JSON values.
//!
//! ### Protocol (`protocol`)
//! Field-by-field validation of what clients send, producing precise error
//! texts that end up in KICK reasons.

pub mod codec;
pub mod messages;
pub mod protocol;

pub use codec::{CodecError, FrameLimit, FIRST_FRAME_MAX_SIZE, FRAME_MAX_SIZE};
pub use messages::{
    ClientMessage, GameEnds, GameStarts, PlayerActions, PlayerInformation, Role, ServerMessage,
    Turn,
};
pub use protocol::{ProtocolError, METAPROTOCOL_VERSION};
