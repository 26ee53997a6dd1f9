//! End-to-end coverage of the orchestrator's four-phase schedule over an
//! in-memory channel, exercising drop-in join (authority activates the
//! new slot and broadcasts a state sync) and a purely local rollback.
//!
//! Grounded in the teacher's `tests/test_p2p_session.rs` style (one
//! `#[test] #[serial]` per scenario, a stub socket module), but wired
//! over an in-memory channel instead of real UDP sockets since the core
//! is transport-agnostic.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use instant::{Duration, Instant};
use serial_test::serial;

use rollback_core::builder::SessionBuilder;
use rollback_core::orchestrator::{Game, MultiplayerOrchestrator};
use rollback_core::transport::NonBlockingSocket;

#[derive(Default)]
struct RecordingGame {
    advances: usize,
    active_slots: Vec<usize>,
    loaded_states: Vec<Vec<u8>>,
}

impl Game for RecordingGame {
    fn advance(&mut self, _inputs: &[u8]) {
        self.advances += 1;
    }

    fn save_state(&mut self) -> Vec<u8> {
        vec![self.advances as u8]
    }

    fn load_state(&mut self, state: &[u8]) {
        self.loaded_states.push(state.to_vec());
    }

    fn activate_slot(&mut self, slot: usize) {
        self.active_slots.push(slot);
    }

    fn deactivate_slot(&mut self, slot: usize) {
        self.active_slots.retain(|&s| s != slot);
    }
}

struct ChannelBus {
    queues: [RefCell<VecDeque<(u8, Vec<u8>)>>; 2],
}

struct ChannelSocket {
    addr: u8,
    bus: Rc<ChannelBus>,
}

impl NonBlockingSocket<u8> for ChannelSocket {
    fn send_to(&mut self, msg: &[u8], addr: &u8) {
        self.bus.queues[*addr as usize]
            .borrow_mut()
            .push_back((self.addr, msg.to_vec()));
    }

    fn receive_all_messages(&mut self) -> Vec<(u8, Vec<u8>)> {
        self.bus.queues[self.addr as usize].borrow_mut().drain(..).collect()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn channel_pair() -> (ChannelSocket, ChannelSocket) {
    let bus = Rc::new(ChannelBus {
        queues: [RefCell::new(VecDeque::new()), RefCell::new(VecDeque::new())],
    });
    (
        ChannelSocket { addr: 0, bus: bus.clone() },
        ChannelSocket { addr: 1, bus },
    )
}

/// Scenario 5: drop-in join. Authority (slot 0) activates the joiner
/// and hands it a state sync; the joiner applies it and converges.
#[test]
#[serial]
fn drop_in_join_activates_slot_and_syncs_state() {
    init_tracing();
    let now = Instant::now();
    let session0 = SessionBuilder::new().with_num_players(2).unwrap().start(now).unwrap();
    let session1 = SessionBuilder::new()
        .with_num_players(2)
        .unwrap()
        .with_local_slot(1)
        .unwrap()
        .start(now)
        .unwrap();

    let mut orch0 = MultiplayerOrchestrator::new(session0, RecordingGame::default(), 0, 60, now);
    let mut orch1 = MultiplayerOrchestrator::new(session1, RecordingGame::default(), 1, 60, now);

    let (mut socket0, mut socket1) = channel_pair();
    orch0.connect_to_peer(1, 1u8, [0; 16], now);
    orch1.connect_to_peer(0, 0u8, [1; 16], now);

    let tick = Duration::from_millis(1000 / 60);
    let mut t = now;
    for _ in 0..200 {
        t += tick;
        orch0.tick(tick, t, &mut socket0);
        orch1.tick(tick, t, &mut socket1);
    }

    assert_eq!(orch0.game().active_slots, vec![1]);
    assert!(!orch1.game().loaded_states.is_empty());
}

/// A purely local session (no peers ever connect) runs the tick loop
/// without rollback and never stalls.
#[test]
#[serial]
fn solo_session_runs_without_peers() {
    init_tracing();
    let now = Instant::now();
    let session = SessionBuilder::new().with_num_players(1).unwrap().start(now).unwrap();
    let mut orch = MultiplayerOrchestrator::new(session, RecordingGame::default(), 0, 60, now);
    let (mut socket, _unused) = channel_pair();

    let tick = Duration::from_millis(1000 / 60);
    let mut t = now;
    for _ in 0..30 {
        t += tick;
        orch.tick(tick, t, &mut socket);
    }

    assert_eq!(orch.game().advances, 30);
    assert_eq!(orch.session().current_frame(), 30);
}
