//! Per-match netcode context.
//!
//! Owns the snapshot buffer, delay controller, interpolator, prediction
//! controller and server clock estimate for one match/connection. The
//! transport pushes [`NetEvent`]s at any time; they are only applied when the
//! owner calls [`MatchSession::update`] at the start of a frame.

use bytes::Bytes;
use protocol::packets::{ClientPacket, ServerPacket};
use protocol::{EntityId, InputSeq, MoveCommand, Position, ProtocolError, Tick};
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, info, warn};

use crate::clock::ServerClock;
use crate::config::NetcodeConfig;
use crate::delay::{AdaptiveDelay, DelayState};
use crate::diagnostics::Diagnostics;
use crate::error::ConfigError;
use crate::interpolation::{Interpolator, Sample, SampleMode};
use crate::observer::{InputSink, NoopObserver, SessionObserver};
use crate::prediction::{PredictionController, ReconcileReason};
use crate::snapshot::{InsertOutcome, Snapshot, SnapshotBuffer};

/// Messages the core consumes from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    Snapshot {
        snapshot: Snapshot,
        /// Piggy-backed ack of this client's inputs.
        last_input_seq: Option<InputSeq>,
    },
    InputAck {
        input_seq: InputSeq,
        tick: Tick,
    },
    RttSample {
        rtt_ms: f64,
    },
    AssignEntity {
        entity_id: EntityId,
    },
    Disconnect,
    Reconnect,
    /// Room change or match restart.
    MatchReset,
}

impl NetEvent {
    /// Map a decoded server frame. `received_at_ms` is needed to turn a pong
    /// into a round-trip sample.
    pub fn from_packet(packet: ServerPacket, received_at_ms: f64) -> Self {
        match packet {
            ServerPacket::Snapshot(packet) => NetEvent::Snapshot {
                snapshot: Snapshot::from(&packet),
                last_input_seq: packet.last_input_seq,
            },
            ServerPacket::InputAck { input_seq, tick } => NetEvent::InputAck { input_seq, tick },
            ServerPacket::ClearAll => NetEvent::MatchReset,
            ServerPacket::AssignEntity { entity_id } => NetEvent::AssignEntity { entity_id },
            ServerPacket::Pong { client_time_ms } => NetEvent::RttSample {
                rtt_ms: (received_at_ms - client_time_ms).max(0.0),
            },
        }
    }
}

/// Encoded ping for RTT measurement; the matching pong becomes an RTT sample.
pub fn ping_packet(now_ms: f64) -> Bytes {
    ClientPacket::Ping {
        client_time_ms: now_ms,
    }
    .encode()
}

#[derive(Debug)]
struct QueuedEvent {
    received_at_ms: f64,
    event: NetEvent,
}

pub struct MatchSession<S, O = NoopObserver> {
    config: NetcodeConfig,
    buffer: SnapshotBuffer,
    delay: AdaptiveDelay,
    interpolator: Interpolator,
    prediction: PredictionController,
    clock: ServerClock,

    queue: VecDeque<QueuedEvent>,
    /// Acks whose snapshot has not arrived yet, keyed by tick.
    parked_acks: BTreeMap<Tick, InputSeq>,
    local_entity: Option<EntityId>,
    local_spawned: bool,
    connected: bool,
    last_update_ms: Option<f64>,

    expired_ack_count: u64,
    decode_error_count: u64,

    sink: S,
    observer: O,
}

impl<S: InputSink> MatchSession<S, NoopObserver> {
    pub fn new(config: NetcodeConfig, sink: S) -> Result<Self, ConfigError> {
        Self::with_observer(config, sink, NoopObserver)
    }
}

impl<S: InputSink, O: SessionObserver> MatchSession<S, O> {
    pub fn with_observer(config: NetcodeConfig, sink: S, observer: O) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            buffer: SnapshotBuffer::with_capacity(config.buffer_capacity),
            delay: AdaptiveDelay::new(&config),
            interpolator: Interpolator::new(&config),
            prediction: PredictionController::new(&config),
            clock: ServerClock::new(config.clock_smoothing),
            config,
            queue: VecDeque::new(),
            parked_acks: BTreeMap::new(),
            local_entity: None,
            local_spawned: false,
            connected: true,
            last_update_ms: None,
            expired_ack_count: 0,
            decode_error_count: 0,
            sink,
            observer,
        })
    }

    /// Queue an event from the transport. Nothing is applied until `update`.
    pub fn push_event(&mut self, event: NetEvent, received_at_ms: f64) {
        self.queue.push_back(QueuedEvent {
            received_at_ms,
            event,
        });
    }

    /// Decode a server frame and queue it.
    pub fn handle_packet(&mut self, data: &[u8], received_at_ms: f64) -> Result<(), ProtocolError> {
        match ServerPacket::parse(data) {
            Ok(packet) => {
                self.push_event(NetEvent::from_packet(packet, received_at_ms), received_at_ms);
                Ok(())
            }
            Err(e) => {
                self.decode_error_count += 1;
                warn!("Dropping undecodable server packet ({} bytes): {}", data.len(), e);
                Err(e)
            }
        }
    }

    /// Per-frame step: drain queued events in arrival order, then advance the
    /// delay controller and correction smoothing by the elapsed time.
    pub fn update(&mut self, now_ms: f64) {
        let elapsed_ms = self
            .last_update_ms
            .map_or(0.0, |last| (now_ms - last).max(0.0));
        self.last_update_ms = Some(now_ms);

        let events = std::mem::take(&mut self.queue);
        for QueuedEvent {
            received_at_ms,
            event,
        } in events
        {
            self.apply_event(event, received_at_ms);
        }

        if self.clock.is_synced() {
            let render_time = self.render_time_ms(now_ms);
            self.delay
                .observe_occupancy(self.buffer.count_newer_than(render_time));
        }
        self.delay.update(elapsed_ms);
        self.prediction.advance(elapsed_ms);
    }

    fn apply_event(&mut self, event: NetEvent, received_at_ms: f64) {
        match event {
            NetEvent::Snapshot {
                snapshot,
                last_input_seq,
            } => self.on_snapshot(snapshot, last_input_seq, received_at_ms),
            NetEvent::InputAck { input_seq, tick } => self.on_input_ack(input_seq, tick),
            NetEvent::RttSample { rtt_ms } => self.delay.on_rtt_sample(rtt_ms),
            NetEvent::AssignEntity { entity_id } => self.on_assign_entity(entity_id),
            NetEvent::Disconnect => {
                info!("Transport disconnected, resetting netcode state");
                self.reset();
                self.connected = false;
            }
            NetEvent::Reconnect => {
                info!("Transport reconnected, starting from a clean state");
                self.reset();
                self.connected = true;
            }
            NetEvent::MatchReset => {
                info!("Match reset");
                self.reset();
            }
        }
    }

    fn on_snapshot(
        &mut self,
        snapshot: Snapshot,
        last_input_seq: Option<InputSeq>,
        received_at_ms: f64,
    ) {
        let (spawned, removed): (Vec<EntityId>, Vec<EntityId>) = match self.buffer.newest() {
            Some(previous) if snapshot.tick > previous.tick => (
                snapshot.spawned_since(previous).collect(),
                snapshot.removed_since(previous).collect(),
            ),
            Some(_) => (Vec::new(), Vec::new()),
            None => (snapshot.entities.keys().copied().collect(), Vec::new()),
        };

        let tick = snapshot.tick;
        let server_time_ms = snapshot.server_time_ms;
        if self.buffer.insert(snapshot) == InsertOutcome::DroppedLate {
            return;
        }
        self.clock
            .observe(server_time_ms, received_at_ms, self.delay.rtt_ms());

        for id in removed {
            if Some(id) == self.local_entity {
                info!("Local entity {} eliminated", id);
                self.local_spawned = false;
                self.prediction.reset();
            }
            self.observer.entity_removed(id);
        }
        for id in spawned {
            if let Some(position) = self.buffer.newest().and_then(|s| s.position(id)) {
                self.observer.entity_spawned(id, position);
            }
        }
        self.sync_local_spawn();

        if let Some(seq) = last_input_seq {
            self.reconcile_at(seq, tick);
        }
        if let Some(seq) = self.parked_acks.remove(&tick) {
            self.reconcile_at(seq, tick);
        }
        self.expire_parked_acks();
    }

    /// Standalone ack: the authoritative position comes from the snapshot of
    /// the same tick, which may not have arrived yet.
    fn on_input_ack(&mut self, input_seq: InputSeq, tick: Tick) {
        if self.buffer.get(tick).is_some() {
            self.reconcile_at(input_seq, tick);
            return;
        }
        match self.buffer.newest() {
            Some(newest) if newest.tick >= tick => {
                self.expired_ack_count += 1;
                debug!("Ack {} for tick {} has no buffered snapshot", input_seq, tick);
            }
            _ => {
                let parked = self.parked_acks.entry(tick).or_insert(input_seq);
                *parked = (*parked).max(input_seq);
            }
        }
    }

    fn expire_parked_acks(&mut self) {
        let Some(oldest) = self.buffer.oldest().map(|s| s.tick) else {
            return;
        };
        let newest = self.buffer.newest().map_or(oldest, |s| s.tick);
        let before = self.parked_acks.len();
        // Anything at or below the newest tick will never see its snapshot now.
        self.parked_acks.retain(|&tick, _| tick > newest);
        let expired = before - self.parked_acks.len();
        if expired > 0 {
            self.expired_ack_count += expired as u64;
            debug!("Expired {} parked acks (buffer {}..={})", expired, oldest, newest);
        }
    }

    fn reconcile_at(&mut self, input_seq: InputSeq, tick: Tick) {
        let Some(local) = self.local_entity else {
            debug!("Ack {} before entity assignment, ignored", input_seq);
            return;
        };
        if !self.local_spawned {
            return;
        }
        let Some(authoritative) = self.buffer.get(tick).and_then(|s| s.position(local)) else {
            return;
        };
        let outcome = self.prediction.reconcile(input_seq, authoritative);
        if matches!(
            outcome.reason,
            ReconcileReason::Soft | ReconcileReason::Hard | ReconcileReason::MissingHistory
        ) {
            self.observer.corrected(&outcome);
        }
    }

    fn on_assign_entity(&mut self, entity_id: EntityId) {
        info!("Controlling entity {}", entity_id);
        if self.local_entity != Some(entity_id) {
            self.local_spawned = false;
            self.prediction.reset();
        }
        self.local_entity = Some(entity_id);
        self.sync_local_spawn();
    }

    fn sync_local_spawn(&mut self) {
        if self.local_spawned {
            return;
        }
        let Some(local) = self.local_entity else {
            return;
        };
        if let Some(position) = self.buffer.newest().and_then(|s| s.position(local)) {
            self.prediction.set_position(position);
            self.local_spawned = true;
            debug!("Local entity {} spawned at {}", local, position);
        }
    }

    /// Predict a local input and forward it to the transport.
    ///
    /// Returns `None` while disconnected or before the controlled entity has spawned.
    pub fn apply_local_input(&mut self, command: MoveCommand, now_ms: f64) -> Option<InputSeq> {
        if !self.connected || !self.local_spawned {
            return None;
        }
        let input_seq = self.prediction.apply_input(command, now_ms);
        self.sink.send_input(input_seq, command);
        Some(input_seq)
    }

    /// Server-timeline instant the renderer should show at local time `now_ms`.
    pub fn render_time_ms(&self, now_ms: f64) -> f64 {
        self.clock.server_now(now_ms) - self.delay.current_delay_ms()
    }

    /// Position of `id` for the frame drawn at local time `now_ms`.
    pub fn sample(&mut self, id: EntityId, now_ms: f64) -> Option<Sample> {
        if self.local_spawned && self.local_entity == Some(id) {
            return Some(Sample {
                position: self.prediction.displayed_position(),
                mode: SampleMode::Predicted,
                stalled: false,
            });
        }
        let render_time = self.render_time_ms(now_ms);
        self.interpolator.sample(&self.buffer, id, render_time)
    }

    /// Convenience wrapper returning only the position.
    pub fn position(&mut self, id: EntityId, now_ms: f64) -> Option<Position> {
        self.sample(id, now_ms).map(|s| s.position)
    }

    /// Entities in the newest snapshot.
    pub fn visible_entities(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .buffer
            .newest()
            .map(|s| s.entities.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    pub fn local_entity(&self) -> Option<EntityId> {
        self.local_entity
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn buffer(&self) -> &SnapshotBuffer {
        &self.buffer
    }

    pub fn prediction(&self) -> &PredictionController {
        &self.prediction
    }

    pub fn delay_state(&self) -> DelayState {
        self.delay.state()
    }

    pub fn config(&self) -> &NetcodeConfig {
        &self.config
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let buffer = self.buffer.stats();
        let delay = self.delay.state();
        let prediction = self.prediction.stats();
        Diagnostics {
            delay_ticks: delay.current_delay_ticks,
            target_delay_ticks: delay.target_delay_ticks,
            delay_bounds: self.delay.bounds(),
            delay_bias_ticks: delay.bias_ticks,
            buffer_size: buffer.size,
            buffer_capacity: buffer.capacity,
            underrun_count: buffer.underrun_count,
            late_snapshot_count: buffer.late_snapshot_count,
            evicted_snapshot_count: buffer.evicted_count,
            extrap_count: self.interpolator.extrap_count(),
            stall_count: self.interpolator.stall_count(),
            correction_count: prediction.correction_count,
            soft_correction_count: prediction.soft_correction_count,
            missing_history_count: prediction.missing_history_count,
            stale_ack_count: prediction.stale_ack_count,
            expired_ack_count: self.expired_ack_count,
            decode_error_count: self.decode_error_count,
            prediction_error: self.prediction.prediction_error(),
            reconcile_reason: self.prediction.last_reason(),
            correction_state: self.prediction.correction_state(),
            pending_inputs: self.prediction.pending_inputs(),
            rtt_ms: delay.rtt_estimate_ms,
            jitter_ms: delay.jitter_estimate_ms,
            clock_offset_ms: self.clock.offset_ms(),
        }
    }

    /// Discard buffered snapshots, prediction history, parked acks and queued
    /// events. Counters survive unless `reset_counters_on_reset` is set.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.prediction.reset();
        self.delay.reset();
        self.clock.reset();
        self.parked_acks.clear();
        self.queue.clear();
        self.local_spawned = false;

        if self.config.reset_counters_on_reset {
            self.buffer.reset_counters();
            self.interpolator.reset_counters();
            self.prediction.reset_counters();
            self.expired_ack_count = 0;
            self.decode_error_count = 0;
        }
        self.observer.session_reset();
    }
}
