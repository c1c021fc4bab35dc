//! Drives a `MatchSession` against the authoritative server world over a
//! zero-loss, frame-stepped link.

use bytes::Bytes;
use glam::Vec2;
use netcode::{
    Clock, CorrectionState, ManualClock, MatchSession, NetcodeConfig, PacketSink,
    ReconcileOutcome, ReconcileReason, SampleMode, SessionObserver,
};
use protocol::packets::{ClientPacket, ServerPacket};
use protocol::{EntityId, MoveCommand, Position};
use server::{Block, World};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Default)]
struct Recorder {
    spawned: Vec<EntityId>,
    removed: Vec<EntityId>,
    corrections: Vec<ReconcileReason>,
    resets: usize,
}

impl SessionObserver for Recorder {
    fn entity_spawned(&mut self, id: EntityId, _position: Position) {
        self.spawned.push(id);
    }
    fn entity_removed(&mut self, id: EntityId) {
        self.removed.push(id);
    }
    fn corrected(&mut self, outcome: &ReconcileOutcome) {
        self.corrections.push(outcome.reason);
    }
    fn session_reset(&mut self) {
        self.resets += 1;
    }
}

type Uplink = Rc<RefCell<VecDeque<Bytes>>>;
type Session = MatchSession<PacketSink<Box<dyn FnMut(Bytes)>>, Recorder>;

struct Harness {
    world: World,
    /// Client clock, kept on the server's timeline (zero latency).
    clock: ManualClock,
    session: Session,
    uplink: Uplink,
    local: EntityId,
}

fn server_config() -> server::Config {
    let mut config = server::Config::default();
    config.server.seed = Some(5);
    config.server.bots = 0;
    config.arena.blocks = 0;
    config.arena.speed = 1.0;
    config
}

fn netcode_config(server: &server::Config) -> NetcodeConfig {
    NetcodeConfig {
        tick_duration_ms: server.server.tick_interval_ms as f64,
        soft_threshold: 0.5,
        pred_hard_exit: 1.0,
        pred_hard_enter: 1.5,
        movement: server.movement(),
        ..NetcodeConfig::default()
    }
}

impl Harness {
    fn new(config: server::Config, spawn: Vec2) -> Self {
        let netcode = netcode_config(&config);
        let mut world = World::new(config);
        let local = world.join_at(spawn);

        let uplink: Uplink = Rc::default();
        let queue = uplink.clone();
        let write: Box<dyn FnMut(Bytes)> =
            Box::new(move |frame: Bytes| queue.borrow_mut().push_back(frame));
        let sink = PacketSink::new(write);
        let mut session = MatchSession::with_observer(netcode, sink, Recorder::default()).unwrap();
        session
            .handle_packet(&ServerPacket::AssignEntity { entity_id: local }.encode(), 0.0)
            .unwrap();

        let mut harness = Self {
            world,
            clock: ManualClock::new(0.0),
            session,
            uplink,
            local,
        };
        harness.tick();
        harness
    }

    /// Deliver queued client frames to the server; returns immediate replies.
    fn forward_uplink(&mut self) -> Vec<ServerPacket> {
        let frames: Vec<Bytes> = self.uplink.borrow_mut().drain(..).collect();
        frames
            .iter()
            .filter_map(|frame| {
                let packet = ClientPacket::parse(frame).unwrap();
                self.world.handle_client_packet(self.local, &packet).unwrap()
            })
            .collect()
    }

    /// One server tick with the client frame that follows it.
    fn tick(&mut self) {
        self.forward_uplink();
        self.step_server();
    }

    fn step_server(&mut self) {
        let frames = self.world.step();
        self.clock.set(self.world.time_ms());
        let now = self.clock.now_ms();
        for (to, packet) in frames {
            if to == self.local {
                self.session.handle_packet(&packet.encode(), now).unwrap();
            }
        }
        self.session.update(now);
    }

    fn server_position(&self) -> Position {
        self.world.player(self.local).unwrap().position
    }
}

#[test]
fn test_prediction_agrees_with_server_on_open_ground() {
    let mut h = Harness::new(server_config(), Vec2::new(100.0, 100.0));
    assert_eq!(h.session.prediction().predicted_position(), Vec2::new(100.0, 100.0));

    for frame in 1..=20u32 {
        let now = h.clock.now_ms() + 1.0;
        assert_eq!(h.session.apply_local_input(MoveCommand::right(), now), Some(frame));
        h.tick();
        assert_eq!(h.session.prediction().predicted_position(), h.server_position());
    }

    let diag = h.session.diagnostics();
    assert_eq!(diag.correction_count, 0);
    assert_eq!(diag.soft_correction_count, 0);
    assert_eq!(diag.prediction_error, 0.0);
    assert_eq!(diag.reconcile_reason, ReconcileReason::WithinTolerance);
    assert_eq!(diag.pending_inputs, 0);
    assert_eq!(h.server_position(), Vec2::new(120.0, 100.0));
}

#[test]
fn test_hidden_block_forces_hard_correction() {
    let mut h = Harness::new(server_config(), Vec2::new(100.0, 100.0));
    h.world
        .add_block(Block::new(Vec2::new(102.5, 90.0), Vec2::new(120.0, 110.0)));

    let now = h.clock.now_ms() + 1.0;
    for _ in 0..5 {
        h.session.apply_local_input(MoveCommand::right(), now);
    }
    assert_eq!(h.session.prediction().predicted_position().x, 105.0);

    h.tick();
    assert_eq!(h.server_position(), Vec2::new(102.0, 100.0));

    let diag = h.session.diagnostics();
    assert_eq!(diag.correction_count, 1);
    assert_eq!(diag.prediction_error, 3.0);
    assert_eq!(diag.correction_state, CorrectionState::Hard);
    assert_eq!(h.session.prediction().displayed_position(), h.server_position());
    assert_eq!(h.session.observer().corrections, vec![ReconcileReason::Hard]);
}

#[test]
fn test_small_rejection_is_eased() {
    let mut h = Harness::new(server_config(), Vec2::new(100.0, 100.0));
    h.world
        .add_block(Block::new(Vec2::new(101.5, 90.0), Vec2::new(120.0, 110.0)));

    let now = h.clock.now_ms() + 1.0;
    h.session.apply_local_input(MoveCommand::right(), now);
    h.session.apply_local_input(MoveCommand::right(), now);
    h.tick();

    let diag = h.session.diagnostics();
    assert_eq!(diag.reconcile_reason, ReconcileReason::Soft);
    assert_eq!(diag.soft_correction_count, 1);
    assert_eq!(h.session.prediction().predicted_position().x, 101.0);
    // Offset has started decaying from the pre-correction position.
    let displayed = h.session.prediction().displayed_position().x;
    assert!(displayed > 101.0 && displayed < 102.0);

    for _ in 0..20 {
        h.tick();
    }
    assert_eq!(h.session.prediction().displayed_position().x, 101.0);
}

#[test]
fn test_in_flight_inputs_are_replayed() {
    let mut h = Harness::new(server_config(), Vec2::new(100.0, 100.0));
    let mut in_flight: VecDeque<Vec<Bytes>> = VecDeque::new();

    for _ in 0..30 {
        let now = h.clock.now_ms() + 1.0;
        h.session.apply_local_input(MoveCommand::down(), now);
        in_flight.push_back(h.uplink.borrow_mut().drain(..).collect());

        // Inputs reach the server two frames late.
        if in_flight.len() > 2 {
            if let Some(frames) = in_flight.pop_front() {
                h.uplink.borrow_mut().extend(frames);
            }
        }
        h.tick();

        let pending = h.session.prediction().pending_inputs();
        let expected = h.server_position() + Vec2::new(0.0, pending as f32);
        assert_eq!(h.session.prediction().predicted_position(), expected);
    }

    let diag = h.session.diagnostics();
    assert_eq!(diag.correction_count, 0);
    assert_eq!(diag.pending_inputs, 2);
}

#[test]
fn test_remote_player_is_interpolated() {
    let mut h = Harness::new(server_config(), Vec2::new(100.0, 100.0));
    let remote = h.world.join_at(Vec2::new(300.0, 300.0));
    let start_tick = h.world.tick();

    for seq in 1..=12 {
        h.world
            .queue_input(remote, seq, MoveCommand::right())
            .unwrap();
        h.tick();
    }
    assert!(h.session.observer().spawned.contains(&remote));

    let now = h.clock.now_ms() + 10.0;
    let render = h.session.render_time_ms(now);
    let sample = h.session.sample(remote, now).unwrap();
    assert_eq!(sample.mode, SampleMode::Interpolated);

    // One unit per 50 ms tick, starting when the remote joined.
    let expected = 300.0 + (render / 50.0 - start_tick as f64) as f32;
    assert!((sample.position.x - expected).abs() < 1e-3);

    let local = h.session.sample(h.local, now).unwrap();
    assert_eq!(local.mode, SampleMode::Predicted);
}

#[test]
fn test_elimination_and_respawn_reseed_prediction() {
    let mut config = server_config();
    config.bomb.fuse_ticks = 2;
    config.bomb.respawn_ticks = 3;
    let mut h = Harness::new(config, Vec2::new(100.0, 100.0));

    let bomb = MoveCommand {
        place_bomb: true,
        ..MoveCommand::IDLE
    };
    let now = h.clock.now_ms() + 1.0;
    h.session.apply_local_input(bomb, now);
    h.tick();
    h.tick();

    assert!(!h.world.player(h.local).unwrap().alive);
    assert_eq!(h.session.observer().removed, vec![h.local]);
    assert_eq!(h.session.apply_local_input(MoveCommand::right(), h.clock.now_ms()), None);

    for _ in 0..3 {
        h.tick();
    }
    assert!(h.world.player(h.local).unwrap().alive);
    assert_eq!(h.session.prediction().predicted_position(), h.server_position());
    assert!(h
        .session
        .apply_local_input(MoveCommand::right(), h.clock.now_ms())
        .is_some());
}

#[test]
fn test_match_reset_clears_session() {
    let mut h = Harness::new(server_config(), Vec2::new(100.0, 100.0));
    for _ in 0..5 {
        let now = h.clock.now_ms() + 1.0;
        h.session.apply_local_input(MoveCommand::up(), now);
        h.tick();
    }
    let inserted = h.session.buffer().stats().inserted_count;
    assert_eq!(inserted, 6);

    let now = h.clock.now_ms();
    for (to, packet) in h.world.reset_match() {
        if to == h.local {
            h.session.handle_packet(&packet.encode(), now).unwrap();
        }
    }
    h.session.update(now);

    assert!(h.session.buffer().is_empty());
    assert_eq!(h.session.prediction().pending_inputs(), 0);
    assert_eq!(h.session.observer().resets, 1);
    // Counters survive a reset by default.
    assert_eq!(h.session.buffer().stats().inserted_count, inserted);

    h.tick();
    assert_eq!(h.session.prediction().predicted_position(), h.server_position());
}

#[test]
fn test_ping_pong_feeds_rtt() {
    let mut h = Harness::new(server_config(), Vec2::new(100.0, 100.0));
    h.uplink
        .borrow_mut()
        .push_back(netcode::ping_packet(h.clock.now_ms()));

    let replies = h.forward_uplink();
    assert_eq!(replies.len(), 1);
    h.clock.advance(30.0);
    let now = h.clock.now_ms();
    for reply in replies {
        h.session.handle_packet(&reply.encode(), now).unwrap();
    }
    h.session.update(now);

    let diag = h.session.diagnostics();
    assert_eq!(diag.rtt_ms, 30.0);
    assert_eq!(diag.jitter_ms, 15.0);
}
