//! Read-only telemetry for the HUD / debug overlay.

use serde::Serialize;

use crate::prediction::{CorrectionState, ReconcileReason};

/// Point-in-time view of the netcode counters. Building one has no side effects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub delay_ticks: u32,
    pub target_delay_ticks: u32,
    pub delay_bounds: (u32, u32),
    pub delay_bias_ticks: i32,
    pub buffer_size: usize,
    pub buffer_capacity: usize,
    pub underrun_count: u64,
    pub late_snapshot_count: u64,
    pub evicted_snapshot_count: u64,
    pub extrap_count: u64,
    pub stall_count: u64,
    pub correction_count: u64,
    pub soft_correction_count: u64,
    pub missing_history_count: u64,
    pub stale_ack_count: u64,
    pub expired_ack_count: u64,
    pub decode_error_count: u64,
    pub prediction_error: f32,
    pub reconcile_reason: ReconcileReason,
    pub correction_state: CorrectionState,
    pub pending_inputs: usize,
    pub rtt_ms: f64,
    pub jitter_ms: f64,
    pub clock_offset_ms: f64,
}

impl Diagnostics {
    /// Serialize for the overlay.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
