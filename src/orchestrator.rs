//! Schedules the session and network I/O into the strict four-phase
//! per-frame order of §4.7: pre-tick drain, tick loop, post-tick drain,
//! broadcast.
//!
//! Grounded in the teacher's `sessions::p2p_session::P2PSession`
//! (`poll_remote_clients` draining inbound messages before
//! `advance_frame`, `handle_event` reacting to transport callbacks) and
//! `sessions::builder::SessionBuilder`'s defaults, reshaped into the
//! explicit phase schedule this spec calls for.

use std::collections::{HashMap, VecDeque};

use instant::{Duration, Instant};
use rand::Rng;
use tracing::{info, warn};

use crate::input::Input;
use crate::session::{Request, RollbackSession, SessionEvent};
use crate::transport::{ConnectionEvent, NonBlockingSocket, Route, Router};
use crate::wire::{self, Message};
use crate::{Frame, PlayerSlot};

const STALE_STATE_SYNC_FRAMES: Frame = 120;
const AUTHORITY_FALLBACK: Duration = Duration::from_secs(5);
const RESYNC_COOLOFF: Duration = Duration::from_secs(3);
const JOIN_OVERLAY_TIMEOUT: Duration = Duration::from_secs(15);
const CATASTROPHIC_ACCUMULATOR_CAP: u32 = 300;
const MAX_TICKS_PER_FRAME: u32 = 10;
const MAX_INPUT_REDUNDANCY: usize = 5;

/// The game operations the orchestrator drives through a [`Request`]
/// list (§6: the three-callback game contract).
pub trait Game {
    fn advance(&mut self, inputs: &[Input]);
    fn save_state(&mut self) -> Vec<u8>;
    fn load_state(&mut self, state: &[u8]);
    fn activate_slot(&mut self, slot: PlayerSlot);
    fn deactivate_slot(&mut self, slot: PlayerSlot);
}

struct PendingSync {
    nonce: u32,
    sent_at: Instant,
}

/// Drives one [`RollbackSession`] plus its [`Router`] and [`Game`]
/// through the fixed-timestep, four-phase schedule.
pub struct MultiplayerOrchestrator<G: Game, P> {
    session: RollbackSession,
    router: Router<P>,
    game: G,
    local_slot: PlayerSlot,
    tick_duration: Duration,
    accumulator: Duration,
    created_at: Instant,
    last_sync_recv: Option<Instant>,
    last_resync_broadcast: Option<Instant>,
    local_input_history: VecDeque<Input>,
    pending_syncs: HashMap<PlayerSlot, PendingSync>,
}

impl<G: Game, P: Clone + PartialEq> MultiplayerOrchestrator<G, P> {
    pub fn new(
        session: RollbackSession,
        game: G,
        local_slot: PlayerSlot,
        fps: u32,
        now: Instant,
    ) -> Self {
        Self {
            session,
            router: Router::new(),
            game,
            local_slot,
            tick_duration: Duration::from_millis(1000 / fps.max(1) as u64),
            accumulator: Duration::ZERO,
            created_at: now,
            last_sync_recv: None,
            last_resync_broadcast: None,
            local_input_history: VecDeque::with_capacity(MAX_INPUT_REDUNDANCY),
            pending_syncs: HashMap::new(),
        }
    }

    pub fn session(&self) -> &RollbackSession {
        &self.session
    }

    pub fn game(&self) -> &G {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut G {
        &mut self.game
    }

    pub fn connect_to_peer(&mut self, peer: PlayerSlot, addr: P, relay_id: [u8; 16], now: Instant) {
        self.router.connect_to_peer(peer, addr, relay_id, now);
    }

    fn is_authority(&self) -> bool {
        self.session.is_authority()
    }

    /// §9/§5: whether the join overlay has run past its 15 s timeout
    /// without a first STATE_SYNC — the caller proceeds solo.
    pub fn join_overlay_expired(&self, now: Instant) -> bool {
        self.last_sync_recv.is_none() && now.duration_since(self.created_at) > JOIN_OVERLAY_TIMEOUT
    }

    /// Queues the local player's input for the next tick (§4.4 step 3;
    /// also seeds the redundancy history used by the broadcast phase).
    pub fn queue_local_input(&mut self, input: Input) {
        self.session.add_local_input(input);
        if self.local_input_history.len() == MAX_INPUT_REDUNDANCY {
            self.local_input_history.pop_back();
        }
        self.local_input_history.push_front(input);
    }

    fn execute(&mut self, requests: Vec<Request>) {
        for request in requests {
            match request {
                Request::SaveGameState { cell, .. } => {
                    let bytes = self.game.save_state();
                    cell.save(bytes);
                }
                Request::LoadGameState { cell, .. } => {
                    if let Some(bytes) = cell.load() {
                        self.game.load_state(&bytes);
                    }
                }
                Request::AdvanceFrame { inputs } => self.game.advance(&inputs),
            }
        }
    }

    /// Runs one driver tick: pre-tick drain, the tick loop (catastrophic
    /// accumulator cap included), post-tick drain, then broadcast.
    pub fn tick<S: NonBlockingSocket<P>>(&mut self, dt: Duration, now: Instant, socket: &mut S) {
        let (connection_events, payloads) = self.router.poll(socket, now);

        self.pre_tick_drain(payloads, now, socket);

        self.accumulator += dt;
        let cap = self.tick_duration * CATASTROPHIC_ACCUMULATOR_CAP;
        if self.accumulator > cap {
            self.accumulator = self.tick_duration * MAX_TICKS_PER_FRAME;
        }

        let mut ticks = 0;
        let mut due_checksum: Option<(Frame, u32)> = None;
        while self.accumulator >= self.tick_duration && ticks < MAX_TICKS_PER_FRAME {
            let requests = self.session.advance_frame(now);
            self.execute(requests);
            self.accumulator -= self.tick_duration;
            ticks += 1;

            let current = self.session.current_frame();
            if current > 0 && current % 60 == 0 {
                if let Some(checksum) = self.session.checksum_for_frame(current - 1) {
                    due_checksum = Some((current - 1, checksum));
                }
            }
        }

        self.post_tick_drain(connection_events, now, socket);
        self.router.send_heartbeats(socket, now);
        self.broadcast(now, socket, due_checksum);
    }

    fn pre_tick_drain<S: NonBlockingSocket<P>>(&mut self, payloads: Vec<(PlayerSlot, Vec<u8>)>, now: Instant, socket: &mut S) {
        for (peer, bytes) in payloads {
            match wire::decode(&bytes) {
                Ok(msg) => self.handle_message(peer, msg, now, socket),
                Err(err) => warn!(peer, %err, "dropping malformed datagram"),
            }
        }
    }

    fn handle_message<S: NonBlockingSocket<P>>(&mut self, peer: PlayerSlot, msg: Message, now: Instant, socket: &mut S) {
        match msg {
            Message::Input { frame, player, inputs } => {
                for (i, &input) in inputs.iter().enumerate().rev() {
                    let f = frame as Frame - i as Frame;
                    self.session.add_remote_input(player as PlayerSlot, f, input, now);
                }
            }
            Message::Checksum { frame, checksum } => {
                self.session.add_remote_checksum(peer, frame as Frame, checksum);
            }
            Message::StateSync { frame, blob } => self.handle_state_sync(peer, frame as Frame, blob, now, socket),
            Message::ResyncRequest { .. } => {
                if self.is_authority() {
                    self.try_broadcast_state_sync(now, socket);
                }
            }
            Message::SyncRequest { nonce } => {
                self.router.send(socket, peer, &Message::SyncResponse { nonce });
            }
            Message::SyncResponse { nonce } => {
                if let Some(pending) = self.pending_syncs.remove(&peer) {
                    if pending.nonce == nonce {
                        let rtt_ms = now.duration_since(pending.sent_at).as_millis() as u32;
                        self.session.record_rtt(rtt_ms);
                    }
                }
            }
            Message::QualityReport { frame, frame_advantage, ping_ms } => {
                let local_advantage = self.session.current_frame() - frame as Frame;
                self.session.update_frame_advantage(local_advantage, frame_advantage as i32);
                self.router.send(socket, peer, &Message::QualityReply { pong_ms: ping_ms });
            }
            Message::QualityReply { .. } => {}
        }
    }

    fn handle_state_sync<S: NonBlockingSocket<P>>(&mut self, peer: PlayerSlot, frame: Frame, blob: Vec<u8>, now: Instant, socket: &mut S) {
        let authority = self.session.resync_authority();
        let since = self.last_sync_recv.unwrap_or(self.created_at);
        let fallback_open = now.duration_since(since) > AUTHORITY_FALLBACK;
        if peer != authority && !fallback_open {
            return;
        }

        let stale = self.session.current_frame() - frame > STALE_STATE_SYNC_FRAMES;
        if stale {
            self.router.send(socket, peer, &Message::ResyncRequest { frame: self.session.current_frame() as u32 });
            return;
        }

        self.game.load_state(&blob);
        self.session.reset_to_frame(frame);
        // the redundancy buffer held inputs for frames now behind us;
        // reseed with neutral input rather than resending stale ones.
        self.local_input_history.clear();
        self.local_input_history.extend(std::iter::repeat(0u8).take(MAX_INPUT_REDUNDANCY));
        self.session.clear_auto_input_for_connected_peers();
        self.last_sync_recv = Some(now);
        info!(frame, peer, "applied state sync");
    }

    fn try_broadcast_state_sync<S: NonBlockingSocket<P>>(&mut self, now: Instant, socket: &mut S) {
        if let Some(t) = self.last_resync_broadcast {
            if now.duration_since(t) < RESYNC_COOLOFF {
                return;
            }
        }
        self.last_resync_broadcast = Some(now);
        let blob = self.game.save_state();
        let frame = self.session.current_frame();
        let msg = Message::StateSync {
            frame: frame as u32,
            blob,
        };
        for peer in self.connected_peers() {
            self.router.send(socket, peer, &msg);
        }
    }

    fn connected_peers(&self) -> Vec<PlayerSlot> {
        (0..self.session.num_players())
            .filter(|&slot| slot != self.local_slot && self.router.is_connected(slot))
            .collect()
    }

    fn post_tick_drain<S: NonBlockingSocket<P>>(&mut self, events: Vec<ConnectionEvent>, now: Instant, socket: &mut S) {
        for event in events {
            match event {
                ConnectionEvent::Connected { peer, via } => {
                    info!(peer, ?via, "peer connected");
                    // connect before the authority check: authority is a
                    // function of which peers this node currently
                    // considers connected, so the newly connected peer
                    // must be registered first.
                    self.session.connect_peer(peer, now);
                    if self.is_authority() {
                        self.game.activate_slot(peer);
                        self.try_broadcast_state_sync(now, socket);
                    }
                }
                ConnectionEvent::Disconnected { peer } => {
                    self.session.disconnect_peer(peer);
                    if !self.session.has_active_remote_peers() {
                        self.game.deactivate_slot(peer);
                    }
                }
            }
        }

        for event in self.session.drain_events().collect::<Vec<_>>() {
            match event {
                SessionEvent::Disconnected { peer } => {
                    let _ = self.router.disconnect(peer);
                }
                SessionEvent::DesyncDetected { frame, local, remote, peer } => {
                    warn!(frame, local, remote, peer, "desync detected");
                    if self.is_authority() {
                        self.try_broadcast_state_sync(now, socket);
                    }
                }
                SessionEvent::NetworkInterrupted { peer, disconnect_timeout_ms } => {
                    warn!(peer, disconnect_timeout_ms, "peer network interrupted");
                }
                SessionEvent::NetworkResumed { peer } => info!(peer, "peer network resumed"),
                SessionEvent::WaitRecommendation { skip_frames } => {
                    info!(skip_frames, "time sync recommends waiting");
                }
            }
        }
    }

    fn broadcast<S: NonBlockingSocket<P>>(&mut self, now: Instant, socket: &mut S, due_checksum: Option<(Frame, u32)>) {
        if !self.local_input_history.is_empty() {
            let inputs: Vec<u8> = self.local_input_history.iter().copied().collect();
            let msg = Message::Input {
                frame: self.session.current_frame().max(0) as u32,
                player: self.local_slot as u8,
                inputs,
            };
            for peer in self.connected_peers() {
                self.router.send(socket, peer, &msg);
            }
        }

        if let Some((frame, checksum)) = due_checksum {
            let msg = Message::Checksum {
                frame: frame as u32,
                checksum,
            };
            for peer in self.connected_peers() {
                self.router.send(socket, peer, &msg);
            }
        }

        // opportunistic RTT probe, at most one outstanding nonce per peer
        for peer in self.connected_peers() {
            if !self.pending_syncs.contains_key(&peer) && self.router.route_of(peer) == Some(Route::Peer) {
                let nonce: u32 = rand::thread_rng().gen();
                self.router.send(socket, peer, &Message::SyncRequest { nonce });
                self.pending_syncs.insert(peer, PendingSync { nonce, sent_at: now });
            }
        }
    }
}
