//! Structured error type for the rollback core.
//!
//! Per the error handling design, most of the kinds named in the spec are
//! handled in place (logged and dropped) rather than propagated as an
//! `Err` — a malformed message, for instance, never reaches a caller who
//! would need to match on it. [`RollbackError`] covers the subset that
//! actually needs to travel across an API boundary: builder misuse, a
//! mismatched checksum a `SyncTest`-style caller wants to assert on, and
//! the decoder's rejection reasons (so the orchestrator can log the
//! specific reason before discarding the message).

use thiserror::Error;

use crate::Frame;

/// Errors returned from the public API of the rollback core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RollbackError {
    /// A builder argument was out of range, e.g. `num_players == 0`.
    #[error("invalid configuration: {info}")]
    InvalidConfiguration { info: String },

    /// The local prediction window has been exhausted; the caller must
    /// wait for confirmations to catch up before adding more local input.
    #[error("prediction threshold reached at frame {frame}, cannot advance further")]
    PredictionThreshold { frame: Frame },

    /// A rollback to `frame` required a saved state, but the state ring no
    /// longer holds one (frame fell outside the ring's depth).
    #[error("no saved state available for frame {frame}")]
    StateNotAvailable { frame: Frame },

    /// A resimulated checksum did not match the checksum recorded the first
    /// time that frame was simulated.
    #[error("checksum mismatch at frame {frame}: expected {expected:#010x}, got {actual:#010x}")]
    MismatchedChecksum {
        frame: Frame,
        expected: u32,
        actual: u32,
    },

    /// The wire decoder rejected a datagram.
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },

    /// An operation was attempted before the session finished its sync
    /// handshake.
    #[error("session is not yet synchronized")]
    NotSynchronized,
}
