//! Canonical animation state shared between one server and many clients.
//!
//! - `protocol`: JSON-line wire messages
//! - `server`: single writer advancing `globalTime` and `colorShift`
//! - `client`: velocity-matching reconciliation with autonomous fallback

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{SyncClient, SyncMode, SyncState};
pub use protocol::{
    decode_line, encode_line, Checkpoint, ClientMessage, FullState, OptionUpdate, ProtocolError, SeedTick,
    ServerMessage,
};
pub use server::{CanonicalState, SessionOptions, SyncServer, MAX_EVOLVE_SPEED};
