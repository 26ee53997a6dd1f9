//! RTT averaging and the frame-wait/input-delay advisories the session
//! consults in `advance_frame` step 1.
//!
//! Grounded in the teacher's `time_sync::TimeSync` (a fixed-size sample
//! ring feeding an `advance_frame`/`average_frame_advantage` pair), widened
//! from the teacher's 30-sample symmetric frame-advantage average to the
//! 32-sample RTT-based model in §4.5.

const RTT_HISTORY_LEN: usize = 32;

/// Per-peer round-trip-time history and frame-advantage advisory.
#[derive(Debug, Clone)]
pub struct TimeSync {
    rtt_samples_ms: [u32; RTT_HISTORY_LEN],
    sample_count: usize,
    next_index: usize,
    local_frame_advantage: i32,
    remote_frame_advantage: i32,
}

impl Default for TimeSync {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSync {
    pub fn new() -> Self {
        Self {
            rtt_samples_ms: [0; RTT_HISTORY_LEN],
            sample_count: 0,
            next_index: 0,
            local_frame_advantage: 0,
            remote_frame_advantage: 0,
        }
    }

    /// Records a fresh round-trip-time sample, in milliseconds.
    pub fn record_rtt(&mut self, rtt_ms: u32) {
        self.rtt_samples_ms[self.next_index] = rtt_ms;
        self.next_index = (self.next_index + 1) % RTT_HISTORY_LEN;
        self.sample_count = (self.sample_count + 1).min(RTT_HISTORY_LEN);
    }

    /// Average of the RTT samples currently held, in milliseconds. Zero
    /// until the first sample is recorded.
    pub fn average_rtt_ms(&self) -> u32 {
        if self.sample_count == 0 {
            return 0;
        }
        let sum: u32 = self.rtt_samples_ms[..self.sample_count].iter().sum();
        sum / self.sample_count as u32
    }

    /// Updates the local/remote frame-advantage counters used by
    /// `recommend_wait`. `local_advantage` is how far ahead of the remote's
    /// confirmed frame the local session is running; `remote_advantage` is
    /// the symmetric quantity reported back by the peer.
    pub fn update_frame_advantage(&mut self, local_advantage: i32, remote_advantage: i32) {
        self.local_frame_advantage = local_advantage;
        self.remote_frame_advantage = remote_advantage;
    }

    /// Updates only the local half of the advantage pair, leaving the
    /// last reported remote advantage untouched until the next
    /// `QUALITY_REPORT` arrives.
    pub fn set_local_frame_advantage(&mut self, local_advantage: i32) {
        self.local_frame_advantage = local_advantage;
    }

    fn one_way_frames_from_rtt(&self) -> i32 {
        let rtt_ms = self.average_rtt_ms() as f64;
        ((rtt_ms / 2.0) * 60.0 / 1000.0).ceil() as i32
    }

    /// Frames to skip this tick so the faster peer doesn't run away from
    /// the slower one, per §4.4 step 1.
    pub fn recommend_wait(&self) -> u32 {
        let allowed = self.one_way_frames_from_rtt().max(2);
        let wait = (self.local_frame_advantage - self.remote_frame_advantage - allowed).max(0);
        wait.min(4) as u32
    }

    /// Suggested local input delay derived from half the average RTT,
    /// clamped to `[1, 15]` frames at 60 Hz.
    pub fn recommended_input_delay(&self) -> u32 {
        self.one_way_frames_from_rtt().clamp(1, 15) as u32
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_recommend_wait_bounded(local in -1000i32..1000, remote in -1000i32..1000) {
            let mut ts = TimeSync::new();
            ts.update_frame_advantage(local, remote);
            let wait = ts.recommend_wait();
            prop_assert!(wait <= 4);
        }

        #[test]
        fn prop_recommended_input_delay_bounded(rtt in 0u32..10_000) {
            let mut ts = TimeSync::new();
            ts.record_rtt(rtt);
            let delay = ts.recommended_input_delay();
            prop_assert!((1..=15).contains(&delay));
        }
    }
}
