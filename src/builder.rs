//! Fluent construction surface for a [`RollbackSession`], in the shape of
//! the teacher's `sessions::builder::SessionBuilder`: a chain of `with_*`
//! methods over sane defaults, validated at `start()` instead of at each
//! call site.

use instant::Instant;

use crate::session::RollbackSession;
use crate::{
    PlayerSlot, RollbackError, DEFAULT_DISCONNECT_TIMEOUT_MS, DEFAULT_FPS, DEFAULT_INPUT_DELAY,
    DEFAULT_MAX_PREDICTION_WINDOW, MAX_PLAYERS,
};

const MIN_PLAYERS: usize = 1;
const DEFAULT_PLAYERS: usize = 2;

/// Assembles a [`RollbackSession`] from validated configuration (§10.3).
pub struct SessionBuilder {
    num_players: usize,
    local_slot: PlayerSlot,
    max_prediction_window: u32,
    input_delay: u32,
    disconnect_timeout_ms: u64,
    fps: u32,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            num_players: DEFAULT_PLAYERS,
            local_slot: 0,
            max_prediction_window: DEFAULT_MAX_PREDICTION_WINDOW,
            input_delay: DEFAULT_INPUT_DELAY,
            disconnect_timeout_ms: DEFAULT_DISCONNECT_TIMEOUT_MS as u64,
            fps: DEFAULT_FPS,
        }
    }

    /// Sets the number of players in the room, including a solo (`1`)
    /// session run entirely locally. Must be `1..=4`.
    pub fn with_num_players(mut self, num_players: usize) -> Result<Self, RollbackError> {
        if !(MIN_PLAYERS..=MAX_PLAYERS).contains(&num_players) {
            return Err(RollbackError::InvalidConfiguration {
                info: format!("num_players must be in {MIN_PLAYERS}..={MAX_PLAYERS}, got {num_players}"),
            });
        }
        self.num_players = num_players;
        Ok(self)
    }

    /// Sets which slot is the local player. Must be `< num_players`.
    pub fn with_local_slot(mut self, local_slot: PlayerSlot) -> Result<Self, RollbackError> {
        if local_slot >= self.num_players {
            return Err(RollbackError::InvalidConfiguration {
                info: format!("local_slot {local_slot} must be < num_players {}", self.num_players),
            });
        }
        self.local_slot = local_slot;
        Ok(self)
    }

    /// Sets the maximum number of frames the local session may predict
    /// ahead of the slowest confirmed remote. Must stay below the
    /// 64-frame state ring depth (§9 open question 2).
    pub fn with_max_prediction_window(mut self, window: u32) -> Result<Self, RollbackError> {
        if window as usize >= crate::STATE_BUFFER_LENGTH {
            return Err(RollbackError::InvalidConfiguration {
                info: format!(
                    "max_prediction_window must be < state ring depth ({})",
                    crate::STATE_BUFFER_LENGTH
                ),
            });
        }
        self.max_prediction_window = window;
        Ok(self)
    }

    /// Sets the local input delay, in frames.
    pub fn with_input_delay(mut self, delay: u32) -> Result<Self, RollbackError> {
        if delay > 15 {
            return Err(RollbackError::InvalidConfiguration {
                info: format!("input_delay must be <= 15, got {delay}"),
            });
        }
        self.input_delay = delay;
        Ok(self)
    }

    /// Sets the per-peer disconnect timeout, in milliseconds.
    pub fn with_disconnect_timeout(mut self, timeout_ms: u64) -> Self {
        self.disconnect_timeout_ms = timeout_ms;
        self
    }

    /// Sets the tick rate; derives the tick duration and every
    /// frame-count constant in §4.7/§5 from this single value.
    pub fn with_fps(mut self, fps: u32) -> Result<Self, RollbackError> {
        if fps == 0 {
            return Err(RollbackError::InvalidConfiguration {
                info: "fps must be nonzero".into(),
            });
        }
        self.fps = fps;
        Ok(self)
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn local_slot(&self) -> PlayerSlot {
        self.local_slot
    }

    /// Builds the `RollbackSession`. `now` seeds the disconnect-timeout
    /// clock for every peer slot.
    pub fn start(self, now: Instant) -> Result<RollbackSession, RollbackError> {
        RollbackSession::new(
            self.num_players,
            self.local_slot,
            self.max_prediction_window,
            self.input_delay,
            self.disconnect_timeout_ms,
            now,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_a_valid_session() {
        let builder = SessionBuilder::new();
        assert!(builder.start(Instant::now()).is_ok());
    }

    #[test]
    fn rejects_too_few_players() {
        assert!(SessionBuilder::new().with_num_players(0).is_err());
    }

    #[test]
    fn accepts_solo_session() {
        assert!(SessionBuilder::new().with_num_players(1).unwrap().start(Instant::now()).is_ok());
    }

    #[test]
    fn rejects_too_many_players() {
        assert!(SessionBuilder::new().with_num_players(5).is_err());
    }

    #[test]
    fn rejects_local_slot_beyond_num_players() {
        let builder = SessionBuilder::new().with_num_players(2).unwrap();
        assert!(builder.with_local_slot(2).is_err());
    }

    #[test]
    fn rejects_prediction_window_at_ring_depth() {
        let builder = SessionBuilder::new();
        assert!(builder
            .with_max_prediction_window(crate::STATE_BUFFER_LENGTH as u32)
            .is_err());
    }

    #[test]
    fn rejects_zero_fps() {
        assert!(SessionBuilder::new().with_fps(0).is_err());
    }

    #[test]
    fn chained_configuration_builds() {
        let session = SessionBuilder::new()
            .with_num_players(3)
            .unwrap()
            .with_local_slot(1)
            .unwrap()
            .with_max_prediction_window(16)
            .unwrap()
            .with_input_delay(3)
            .unwrap()
            .with_disconnect_timeout(8000)
            .start(Instant::now());
        assert!(session.is_ok());
    }
}
