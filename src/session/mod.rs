//! The rollback session: frame advancement, the rollback scan, authority
//! election, and the event queue the orchestrator drains.
//!
//! Grounded in the teacher's `sessions::p2p_session::P2PSession`: the
//! overall `advance_frame` shape (`check_simulation_consistency` →
//! `adjust_gamestate` → save-then-advance) and the `Player` enum's
//! local/remote/spectator split are the teacher's; the exact ten-step
//! schedule and event set are this spec's (§4.4).

use std::collections::{HashMap, HashSet, VecDeque};

use instant::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::input::{Input, DISCONNECT_BIT};
use crate::input_queue::InputQueue;
use crate::state_buffer::{StateBuffer, StateCell};
use crate::time_sync::TimeSync;
use crate::{Frame, PlayerSlot, RollbackError, SessionState, NULL_FRAME};

/// A request the driver must fulfill, in order, before the next call to
/// `advance_frame`. See §6 for the game contract each variant maps to.
#[derive(Debug, Clone)]
pub enum Request {
    SaveGameState { cell: StateCell, frame: Frame },
    LoadGameState { cell: StateCell, frame: Frame },
    AdvanceFrame { inputs: Vec<Input> },
}

/// Notifications the session queues for the orchestrator to drain after
/// the tick loop (§5: peer-lifecycle and advisory events never drive
/// mutation directly).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    WaitRecommendation { skip_frames: u32 },
    Disconnected { peer: PlayerSlot },
    NetworkInterrupted { peer: PlayerSlot, disconnect_timeout_ms: u128 },
    NetworkResumed { peer: PlayerSlot },
    DesyncDetected {
        frame: Frame,
        local: u32,
        remote: u32,
        peer: PlayerSlot,
    },
}

/// Deterministic lockstep session for one game: owns every input queue,
/// the state ring, the time-sync tracker, and the event queue.
pub struct RollbackSession {
    num_players: usize,
    local_slot: PlayerSlot,
    current_frame: Frame,
    sync_frame: Frame,

    input_delay: u32,
    max_prediction_window: u32,
    disconnect_timeout: Duration,

    input_queues: Vec<InputQueue>,
    state_buffer: StateBuffer,
    time_sync: TimeSync,

    connected: Vec<bool>,
    synchronized: Vec<bool>,
    disconnected_slots: HashSet<PlayerSlot>,
    auto_input_slots: HashSet<PlayerSlot>,
    last_recv: Vec<Instant>,

    pending_local_input: Option<Input>,
    /// Lowest frame any queue's `confirm()` flagged as mispredicted since
    /// the last `advance_frame` call; drives the rollback scan (§4.4
    /// step 4).
    rollback_candidate: Option<Frame>,

    remote_checksums: HashMap<Frame, HashMap<PlayerSlot, u32>>,

    events: VecDeque<SessionEvent>,
}

impl RollbackSession {
    pub fn new(
        num_players: usize,
        local_slot: PlayerSlot,
        max_prediction_window: u32,
        input_delay: u32,
        disconnect_timeout_ms: u64,
        now: Instant,
    ) -> Result<Self, RollbackError> {
        if num_players == 0 || num_players > crate::MAX_PLAYERS {
            return Err(RollbackError::InvalidConfiguration {
                info: format!("num_players must be in 1..={}", crate::MAX_PLAYERS),
            });
        }
        if local_slot >= num_players {
            return Err(RollbackError::InvalidConfiguration {
                info: "local_slot must be < num_players".into(),
            });
        }
        if max_prediction_window as usize >= crate::STATE_BUFFER_LENGTH {
            return Err(RollbackError::InvalidConfiguration {
                info: format!(
                    "max_prediction_window must be < state ring depth ({})",
                    crate::STATE_BUFFER_LENGTH
                ),
            });
        }

        Ok(Self {
            num_players,
            local_slot,
            current_frame: 0,
            sync_frame: NULL_FRAME,
            input_delay,
            max_prediction_window,
            disconnect_timeout: Duration::from_millis(disconnect_timeout_ms),
            input_queues: (0..num_players).map(InputQueue::new).collect(),
            state_buffer: StateBuffer::new(),
            time_sync: TimeSync::new(),
            connected: vec![false; num_players],
            synchronized: vec![false; num_players],
            disconnected_slots: HashSet::new(),
            auto_input_slots: HashSet::new(),
            last_recv: vec![now; num_players],
            pending_local_input: None,
            rollback_candidate: None,
            remote_checksums: HashMap::new(),
            events: VecDeque::new(),
        })
    }

    pub const fn current_frame(&self) -> Frame {
        self.current_frame
    }

    pub const fn num_players(&self) -> usize {
        self.num_players
    }

    pub fn has_active_remote_peers(&self) -> bool {
        self.active_remote_slots().next().is_some()
    }

    /// High-level lifecycle phase, derived from whether any peer has
    /// synchronized yet and whether the first tick has run.
    pub fn state(&self) -> SessionState {
        if self.current_frame > 0 {
            SessionState::Running
        } else if (0..self.num_players).any(|s| s != self.local_slot && self.synchronized[s]) {
            SessionState::Synchronizing
        } else {
            SessionState::Initializing
        }
    }

    /// Feeds a measured round-trip-time sample into the time-sync
    /// tracker (§4.5), typically from a `SYNC_REQUEST`/`SYNC_RESPONSE`
    /// roundtrip the orchestrator times.
    pub fn record_rtt(&mut self, rtt_ms: u32) {
        self.time_sync.record_rtt(rtt_ms);
    }

    /// Records a peer-reported frame advantage alongside the local one
    /// (§4.5), typically from an inbound `QUALITY_REPORT`.
    pub fn update_frame_advantage(&mut self, local_advantage: i32, remote_advantage: i32) {
        self.time_sync.update_frame_advantage(local_advantage, remote_advantage);
    }

    pub const fn sync_frame(&self) -> Frame {
        self.sync_frame
    }

    /// Drains every event queued since the last call.
    pub fn drain_events(&mut self) -> impl Iterator<Item = SessionEvent> + '_ {
        self.events.drain(..)
    }

    /// Queues the local player's input for injection at `current_frame +
    /// input_delay` (§4.4 step 3).
    pub fn add_local_input(&mut self, input: Input) {
        self.pending_local_input = Some(input);
    }

    fn active_remote_slots(&self) -> impl Iterator<Item = PlayerSlot> + '_ {
        (0..self.num_players).filter(move |&s| {
            s != self.local_slot && self.connected[s] && !self.disconnected_slots.contains(&s)
        })
    }

    fn min_confirmed_over_active_remote_peers(&self) -> Frame {
        self.active_remote_slots()
            .map(|s| self.input_queues[s].confirmed_frame())
            .min()
            .unwrap_or(self.current_frame)
    }

    /// Ingests a confirmed remote input. Returns whether it contradicted
    /// the prediction most recently read for that frame (§4.4 "remote
    /// input ingestion").
    pub fn add_remote_input(&mut self, peer: PlayerSlot, frame: Frame, input: Input, now: Instant) -> bool {
        if peer == self.local_slot {
            return false;
        }
        let mispredicted = self.input_queues[peer].confirm(frame, input);
        if mispredicted {
            self.rollback_candidate = Some(match self.rollback_candidate {
                Some(existing) => existing.min(frame),
                None => frame,
            });
        }
        self.time_sync.set_local_frame_advantage(self.current_frame - frame);
        self.last_recv[peer] = now;
        if self.disconnected_slots.remove(&peer) {
            info!(peer, "network resumed");
            self.events.push_back(SessionEvent::NetworkResumed { peer });
        }
        mispredicted
    }

    /// Records a peer's checksum for a frame; comparison happens in the
    /// per-frame desync scan (§4.4 step 9).
    pub fn add_remote_checksum(&mut self, peer: PlayerSlot, frame: Frame, checksum: u32) {
        self.remote_checksums.entry(frame).or_default().insert(peer, checksum);
    }

    /// Marks `peer` connected and synchronized; resets their input queue
    /// so a stale confirmed frame doesn't stall the prediction-gap check
    /// (§4.7 post-tick drain, non-authority connect path).
    pub fn connect_peer(&mut self, peer: PlayerSlot, now: Instant) {
        self.connected[peer] = true;
        self.synchronized[peer] = true;
        self.auto_input_slots.remove(&peer);
        self.disconnected_slots.remove(&peer);
        self.input_queues[peer].reset();
        self.last_recv[peer] = now;
        info!(peer, "peer connected");
    }

    /// Marks `peer` disconnected: their next gathered input carries the
    /// disconnect sentinel, stale checksums are purged, and authority is
    /// recomputed if they held it (§4.7 post-tick drain, disconnect
    /// path).
    pub fn disconnect_peer(&mut self, peer: PlayerSlot) {
        self.disconnected_slots.insert(peer);
        self.auto_input_slots.insert(peer);
        self.remote_checksums.retain(|&f, _| f >= self.sync_frame);
        info!(peer, "peer disconnected");
        self.events.push_back(SessionEvent::Disconnected { peer });
    }

    /// The lowest active slot (local slot union connected peer slots);
    /// uniquely authorized to broadcast STATE_SYNC (§4.4 "authority
    /// election").
    pub fn resync_authority(&self) -> PlayerSlot {
        let mut lowest = self.local_slot;
        for slot in self.active_remote_slots() {
            lowest = lowest.min(slot);
        }
        lowest
    }

    pub fn is_authority(&self) -> bool {
        self.resync_authority() == self.local_slot
    }

    /// Clears the auto-input flag for every currently connected peer
    /// (§4.7 state-sync application, step 1): a freshly applied snapshot
    /// supersedes whatever absence of input justified auto-input before
    /// the sync arrived.
    pub fn clear_auto_input_for_connected_peers(&mut self) {
        for slot in 0..self.num_players {
            if self.connected[slot] {
                self.auto_input_slots.remove(&slot);
            }
        }
    }

    /// Resets session state to converge with a freshly loaded state-sync
    /// snapshot at `f` (§4.4 "reset to a given frame").
    pub fn reset_to_frame(&mut self, f: Frame) {
        self.current_frame = f;
        self.sync_frame = f - 1;
        for q in &mut self.input_queues {
            q.reset();
        }
        self.time_sync = TimeSync::new();
        self.remote_checksums.clear();
        self.pending_local_input = None;
        self.rollback_candidate = None;
        info!(frame = f, "session reset to frame");
    }

    /// Gathers the per-slot inputs for `frame`: the disconnect sentinel
    /// for disconnected slots, zero for auto-input slots, otherwise the
    /// queue's prediction/confirmation (§4.4 "input gathering").
    fn gather_inputs(&mut self, frame: Frame) -> Vec<Input> {
        (0..self.num_players)
            .map(|slot| {
                if self.disconnected_slots.contains(&slot) {
                    DISCONNECT_BIT
                } else if self.auto_input_slots.contains(&slot) {
                    0
                } else {
                    self.input_queues[slot].get(frame).input
                }
            })
            .collect()
    }

    /// Returns the checksum recorded for `frame`, if any — the driver is
    /// expected to call this on the 60-frame cadence of §4.4 step 8 and
    /// broadcast a CHECKSUM message with the result.
    pub fn checksum_for_frame(&self, frame: Frame) -> Option<u32> {
        self.state_buffer.get_checksum(frame)
    }

    /// Advances the session by one frame, returning the ordered request
    /// list the driver must fulfill (§4.4).
    pub fn advance_frame(&mut self, now: Instant) -> Vec<Request> {
        // step 1: frame-wait throttle
        let wait = self.time_sync.recommend_wait();
        if wait > 0 {
            self.events
                .push_back(SessionEvent::WaitRecommendation { skip_frames: wait });
            return Vec::new();
        }

        // step 2: prediction-gap throttle
        let min_confirmed = self.min_confirmed_over_active_remote_peers();
        let gap = self.current_frame - min_confirmed;
        if gap >= self.max_prediction_window as Frame {
            return Vec::new();
        }

        let mut requests = Vec::new();

        // step 3: inject pending local input, delayed
        if let Some(input) = self.pending_local_input.take() {
            let target = self.current_frame + self.input_delay as Frame;
            self.input_queues[self.local_slot].confirm(target, input);
        }

        // step 4: rollback scan
        if let Some(candidate) = self.rollback_candidate.take() {
            if candidate > self.sync_frame && candidate <= self.current_frame {
                if self.state_buffer.load(candidate).is_some() {
                    debug!(from = candidate, to = self.current_frame, "rollback triggered");
                    requests.push(Request::LoadGameState {
                        cell: self.state_buffer.cell(candidate),
                        frame: candidate,
                    });
                    for g in candidate..self.current_frame {
                        let inputs = self.gather_inputs(g);
                        requests.push(Request::AdvanceFrame { inputs });
                        requests.push(Request::SaveGameState {
                            cell: self.state_buffer.cell(g + 1),
                            frame: g + 1,
                        });
                    }
                } else {
                    warn!(frame = candidate, "rollback candidate has no saved state, skipping");
                }
            }
        }

        // steps 5-6: snapshot then advance the current frame
        requests.push(Request::SaveGameState {
            cell: self.state_buffer.cell(self.current_frame),
            frame: self.current_frame,
        });
        let inputs = self.gather_inputs(self.current_frame);
        requests.push(Request::AdvanceFrame { inputs });

        // step 7
        self.current_frame += 1;
        self.sync_frame = self.min_confirmed_over_active_remote_peers();

        // step 9: desync scan
        let stale_frames: Vec<Frame> = self
            .remote_checksums
            .keys()
            .copied()
            .filter(|&f| f < self.sync_frame)
            .collect();
        let compare_frames: Vec<Frame> = self
            .remote_checksums
            .keys()
            .copied()
            .filter(|f| self.state_buffer.get_checksum(*f).is_some())
            .collect();
        for frame in compare_frames {
            if let Some(local) = self.state_buffer.get_checksum(frame) {
                if let Some(peer_checksums) = self.remote_checksums.get(&frame) {
                    for (&peer, &remote) in peer_checksums {
                        if remote != local {
                            warn!(frame, local, remote, peer, "desync detected");
                            self.events.push_back(SessionEvent::DesyncDetected {
                                frame,
                                local,
                                remote,
                                peer,
                            });
                        }
                    }
                }
            }
        }
        for frame in stale_frames {
            self.remote_checksums.remove(&frame);
        }

        // step 10: disconnect scan
        let half_timeout = self.disconnect_timeout / 2;
        let candidates: Vec<PlayerSlot> = self.active_remote_slots().collect();
        for slot in candidates {
            let silence = now.duration_since(self.last_recv[slot]);
            if silence > self.disconnect_timeout {
                self.disconnect_peer(slot);
            } else if silence > half_timeout {
                self.events.push_back(SessionEvent::NetworkInterrupted {
                    peer: slot,
                    disconnect_timeout_ms: self.disconnect_timeout.as_millis(),
                });
            }
        }

        requests
    }
}
