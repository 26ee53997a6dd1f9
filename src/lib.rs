//! Rollback netcode core for a peer-to-peer arcade game.
//!
//! Deterministic lockstep with speculative execution: a per-peer input queue
//! predicts missing remote input, a state ring buffer snapshots opaque game
//! state by frame, and a rollback session detects mispredictions and
//! resimulates. A wire codec and transport router carry inputs, checksums
//! and state-sync blobs over an unreliable datagram channel, peer-to-peer
//! first with a relay fallback.
//!
//! The session never touches the game directly: it returns a list of
//! [`Request`](session::Request) variants the driver fulfills in order.

#![forbid(unsafe_code)]

pub mod builder;
pub mod error;
pub mod input;
pub mod input_queue;
pub mod orchestrator;
pub mod session;
pub mod state_buffer;
pub mod time_sync;
pub mod transport;
pub mod wire;

pub use builder::SessionBuilder;
pub use error::RollbackError;
pub use input::{Input, InputEntry, DISCONNECT_BIT};
pub use session::{Request, RollbackSession, SessionEvent};
pub use state_buffer::{StateBuffer, StateCell};

/// Sentinel for "no frame" / an invalid frame, mirrored throughout the queue
/// and session algorithms.
pub const NULL_FRAME: Frame = -1;

/// A monotonically increasing 60 Hz tick index. Signed so `NULL_FRAME` is a
/// distinguishable sentinel rather than a valid value.
pub type Frame = i32;

/// Index of a player slot, `0..num_players`.
pub type PlayerSlot = usize;

/// Player capacity for this game.
pub const MAX_PLAYERS: usize = 4;

/// Depth of the input queue ring (`Q` in the spec).
pub const INPUT_QUEUE_LENGTH: usize = 128;

/// Depth of the state ring buffer.
pub const STATE_BUFFER_LENGTH: usize = 64;

/// Default number of frames of local-input delay before it is confirmed.
pub const DEFAULT_INPUT_DELAY: u32 = 2;

/// Default throttle threshold for `current_frame - min_confirmed_frame`.
pub const DEFAULT_MAX_PREDICTION_WINDOW: u32 = 8;

/// Default peer silence before disconnect, in milliseconds.
pub const DEFAULT_DISCONNECT_TIMEOUT_MS: u128 = 5000;

/// Simulation rate, in Hz.
pub const DEFAULT_FPS: u32 = 60;

/// A session is always in one of these states.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for players to be added and the session to be started.
    Initializing,
    /// Establishing connections to remote peers.
    Synchronizing,
    /// Synchronized and advancing frames.
    Running,
}
