//! Local player prediction and server reconciliation.
//!
//! Inputs are applied immediately with the shared movement rule and kept in a
//! history keyed by sequence number. When the server acknowledges a sequence,
//! everything up to it is pruned and the rest is replayed from the
//! authoritative position. The difference between what we showed and what the
//! replay produced is the prediction error, which decides between an eased
//! (soft) correction and an immediate snap (hard).
//!
//! Soft/hard selection has hysteresis: entering hard requires
//! `error > pred_hard_enter`, leaving it requires `error < pred_hard_exit`.

use glam::Vec2;
use protocol::{InputSeq, MoveCommand, MovementRules, Position};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::config::NetcodeConfig;

/// One locally applied input step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictedState {
    pub input_seq: InputSeq,
    pub command: MoveCommand,
    pub position_after_apply: Position,
    pub applied_at_local_time_ms: f64,
}

/// Why the last reconciliation ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileReason {
    /// No ack processed yet.
    #[default]
    None,
    /// Error at or below the soft threshold; prediction accepted.
    WithinTolerance,
    /// Eased visual correction.
    Soft,
    /// Immediate snap.
    Hard,
    /// The acked input was no longer in history; snapped to the server.
    MissingHistory,
    /// Duplicate or out-of-order ack, ignored.
    StaleAck,
}

/// Hysteresis state of the correction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionState {
    #[default]
    Soft,
    Hard,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileOutcome {
    pub reason: ReconcileReason,
    pub prediction_error: f32,
    /// Un-acked inputs replayed on top of the authoritative position.
    pub replayed: usize,
    /// Predicted position after reconciliation.
    pub position: Position,
}

/// Counters exposed to diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PredictionStats {
    pub correction_count: u64,
    pub soft_correction_count: u64,
    pub missing_history_count: u64,
    pub stale_ack_count: u64,
    pub evicted_input_count: u64,
}

#[derive(Debug)]
pub struct PredictionController {
    rules: MovementRules,
    soft_threshold: f32,
    hard_enter: f32,
    hard_exit: f32,
    half_life_ms: f64,
    offset_epsilon: f32,
    max_history: usize,

    history: VecDeque<PredictedState>,
    next_seq: InputSeq,
    last_acked_seq: Option<InputSeq>,
    predicted: Position,
    visual_offset: Vec2,
    state: CorrectionState,
    last_error: f32,
    last_reason: ReconcileReason,
    stats: PredictionStats,
}

impl PredictionController {
    pub fn new(config: &NetcodeConfig) -> Self {
        Self {
            rules: config.movement,
            soft_threshold: config.soft_threshold,
            hard_enter: config.pred_hard_enter,
            hard_exit: config.pred_hard_exit,
            half_life_ms: config.soft_correction_half_life_ms,
            offset_epsilon: config.offset_epsilon,
            max_history: config.max_prediction_history.max(1),
            history: VecDeque::with_capacity(config.max_prediction_history),
            next_seq: 1,
            last_acked_seq: None,
            predicted: Position::ZERO,
            visual_offset: Vec2::ZERO,
            state: CorrectionState::Soft,
            last_error: 0.0,
            last_reason: ReconcileReason::None,
            stats: PredictionStats::default(),
        }
    }

    /// Seed the predicted position (spawn or respawn). Pending inputs are dropped.
    pub fn set_position(&mut self, position: Position) {
        self.predicted = position;
        self.visual_offset = Vec2::ZERO;
        self.history.clear();
        self.state = CorrectionState::Soft;
    }

    /// Apply a local input immediately and record it. Returns its sequence number.
    pub fn apply_input(&mut self, command: MoveCommand, now_ms: f64) -> InputSeq {
        let input_seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        self.predicted = self.rules.step(self.predicted, command);
        self.history.push_back(PredictedState {
            input_seq,
            command,
            position_after_apply: self.predicted,
            applied_at_local_time_ms: now_ms,
        });
        if self.history.len() > self.max_history {
            if let Some(evicted) = self.history.pop_front() {
                self.stats.evicted_input_count += 1;
                debug!("Prediction history full, evicted input {}", evicted.input_seq);
            }
        }
        input_seq
    }

    /// Position obtained by replaying the current history from `base`.
    ///
    /// Pure: calling it twice with the same base and history gives the same result.
    pub fn replay_from(&self, base: Position) -> Position {
        self.replayed_positions(base).last().unwrap_or(base)
    }

    /// Position after each history entry when stepping from `base`.
    fn replayed_positions(&self, base: Position) -> impl Iterator<Item = Position> + '_ {
        self.history.iter().scan(base, |pos, state| {
            *pos = self.rules.step(*pos, state.command);
            Some(*pos)
        })
    }

    /// Reconcile against the server having processed inputs up to `acked_seq`,
    /// ending at `authoritative`.
    pub fn reconcile(&mut self, acked_seq: InputSeq, authoritative: Position) -> ReconcileOutcome {
        if self.last_acked_seq.is_some_and(|last| acked_seq <= last) {
            self.stats.stale_ack_count += 1;
            debug!(
                "Ignoring stale ack {} (last acked {:?})",
                acked_seq, self.last_acked_seq
            );
            return ReconcileOutcome {
                reason: ReconcileReason::StaleAck,
                prediction_error: 0.0,
                replayed: 0,
                position: self.predicted,
            };
        }

        let in_history = self
            .history
            .binary_search_by_key(&acked_seq, |s| s.input_seq)
            .is_ok();
        let naive = self.predicted;
        let displayed_before = self.displayed_position();

        self.last_acked_seq = Some(acked_seq);
        while self
            .history
            .front()
            .is_some_and(|s| s.input_seq <= acked_seq)
        {
            self.history.pop_front();
        }

        if !in_history {
            // Cannot replay safely: trust the server.
            self.predicted = authoritative;
            self.visual_offset = Vec2::ZERO;
            self.state = CorrectionState::Hard;
            self.last_error = naive.distance(authoritative);
            self.stats.missing_history_count += 1;
            self.stats.correction_count += 1;
            warn!(
                "No prediction history for acked input {}, snapping (error {:.2})",
                acked_seq, self.last_error
            );
            return self.finish(ReconcileReason::MissingHistory, 0);
        }

        let replayed_positions: Vec<Position> = self.replayed_positions(authoritative).collect();
        for (state, &after) in self.history.iter_mut().zip(&replayed_positions) {
            state.position_after_apply = after;
        }
        let pos = replayed_positions.last().copied().unwrap_or(authoritative);
        let replayed = replayed_positions.len();
        let error = naive.distance(pos);
        self.predicted = pos;
        self.last_error = error;

        self.state = match self.state {
            CorrectionState::Soft if error > self.hard_enter => CorrectionState::Hard,
            CorrectionState::Hard if error < self.hard_exit => CorrectionState::Soft,
            unchanged => unchanged,
        };

        let reason = match self.state {
            CorrectionState::Hard if error > 0.0 => {
                self.visual_offset = Vec2::ZERO;
                self.stats.correction_count += 1;
                warn!("Hard correction after ack {} (error {:.2})", acked_seq, error);
                ReconcileReason::Hard
            }
            CorrectionState::Soft if error > self.soft_threshold => {
                // Keep the picture where it was and ease toward the new prediction.
                self.visual_offset = displayed_before - pos;
                self.stats.soft_correction_count += 1;
                debug!("Soft correction after ack {} (error {:.2})", acked_seq, error);
                ReconcileReason::Soft
            }
            _ => ReconcileReason::WithinTolerance,
        };
        self.finish(reason, replayed)
    }

    fn finish(&mut self, reason: ReconcileReason, replayed: usize) -> ReconcileOutcome {
        self.last_reason = reason;
        ReconcileOutcome {
            reason,
            prediction_error: self.last_error,
            replayed,
            position: self.predicted,
        }
    }

    /// Decay the visual offset by `elapsed_ms`.
    pub fn advance(&mut self, elapsed_ms: f64) {
        if self.visual_offset == Vec2::ZERO || !(elapsed_ms > 0.0) {
            return;
        }
        if self.half_life_ms > 0.0 {
            let factor = 0.5f64.powf(elapsed_ms / self.half_life_ms) as f32;
            self.visual_offset *= factor;
        } else {
            self.visual_offset = Vec2::ZERO;
        }
        if self.visual_offset.length() < self.offset_epsilon {
            self.visual_offset = Vec2::ZERO;
        }
    }

    /// Where the local entity should be drawn.
    #[inline]
    pub fn displayed_position(&self) -> Position {
        self.predicted + self.visual_offset
    }

    #[inline]
    pub fn predicted_position(&self) -> Position {
        self.predicted
    }

    pub fn visual_offset(&self) -> Vec2 {
        self.visual_offset
    }

    pub fn history(&self) -> impl ExactSizeIterator<Item = &PredictedState> {
        self.history.iter()
    }

    pub fn pending_inputs(&self) -> usize {
        self.history.len()
    }

    pub fn last_acked_seq(&self) -> Option<InputSeq> {
        self.last_acked_seq
    }

    pub fn correction_state(&self) -> CorrectionState {
        self.state
    }

    pub fn prediction_error(&self) -> f32 {
        self.last_error
    }

    pub fn last_reason(&self) -> ReconcileReason {
        self.last_reason
    }

    pub fn stats(&self) -> PredictionStats {
        self.stats
    }

    /// Drop history and smoothing state; un-acked inputs are never replayed
    /// across a reset. Sequence numbers keep increasing so late acks from the
    /// previous connection are recognised as stale. Before the first input
    /// nothing can be stale and the ack cursor stays unset.
    pub fn reset(&mut self) {
        self.history.clear();
        self.visual_offset = Vec2::ZERO;
        self.state = CorrectionState::Soft;
        self.last_error = 0.0;
        self.last_reason = ReconcileReason::None;
        if self.next_seq != 1 {
            self.last_acked_seq = Some(self.next_seq.wrapping_sub(1));
        }
    }

    pub fn reset_counters(&mut self) {
        self.stats = PredictionStats::default();
    }
}
