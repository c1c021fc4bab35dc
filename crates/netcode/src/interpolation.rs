//! Remote entity interpolation and bounded extrapolation.

use protocol::{EntityId, Position};
use serde::Serialize;

use crate::config::NetcodeConfig;
use crate::snapshot::{RenderSample, SnapshotBuffer};

/// How a sampled position was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleMode {
    /// Blended between two bracketing snapshots.
    Interpolated,
    /// Projected past the newest snapshot using the last observed velocity.
    Extrapolated,
    /// Extrapolation budget exhausted; held at the last known position.
    Stalled,
    /// Only one observation available, or render time not past it.
    Held,
    /// Locally controlled entity, rendered from client-side prediction.
    Predicted,
}

/// A position for one entity at one render time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub position: Position,
    pub mode: SampleMode,
    pub stalled: bool,
}

impl Sample {
    fn new(position: Position, mode: SampleMode) -> Self {
        Self {
            position,
            mode,
            stalled: mode == SampleMode::Stalled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Interpolator {
    tick_duration_ms: f64,
    extrapolating_ticks: u32,
    extrap_count: u64,
    stall_count: u64,
}

impl Interpolator {
    pub fn new(config: &NetcodeConfig) -> Self {
        Self {
            tick_duration_ms: config.tick_duration_ms,
            extrapolating_ticks: config.extrapolating_ticks,
            extrap_count: 0,
            stall_count: 0,
        }
    }

    /// Longest projection past the newest snapshot before stalling.
    #[inline]
    pub fn extrapolation_limit_ms(&self) -> f64 {
        self.extrapolating_ticks as f64 * self.tick_duration_ms
    }

    /// Position of `id` at `render_time_ms` on the server timeline.
    ///
    /// Returns `None` when nothing is buffered or the entity is not present in
    /// the snapshots that would be sampled (not yet spawned, or removed).
    pub fn sample(
        &mut self,
        buffer: &SnapshotBuffer,
        id: EntityId,
        render_time_ms: f64,
    ) -> Option<Sample> {
        match buffer.lookup(render_time_ms) {
            RenderSample::Empty => None,
            RenderSample::Interpolate { before, after } => {
                let from = before.position(id)?;
                let to = after.position(id)?;
                let span = after.server_time_ms - before.server_time_ms;
                let t = if span > 0.0 {
                    ((render_time_ms - before.server_time_ms) / span).clamp(0.0, 1.0)
                } else {
                    1.0
                };
                Some(Sample::new(from.lerp(to, t as f32), SampleMode::Interpolated))
            }
            RenderSample::Extrapolate { last } => {
                let last_position = last.position(id)?;
                let elapsed_ms = render_time_ms - last.server_time_ms;
                if elapsed_ms <= 0.0 {
                    return Some(Sample::new(last_position, SampleMode::Held));
                }

                let velocity = match buffer.latest_pair_with(id) {
                    Some((_, Some(previous))) => {
                        let dt = last.server_time_ms - previous.server_time_ms;
                        match previous.position(id) {
                            Some(p) if dt > 0.0 => (last_position - p) / dt as f32,
                            _ => return Some(Sample::new(last_position, SampleMode::Held)),
                        }
                    }
                    _ => return Some(Sample::new(last_position, SampleMode::Held)),
                };

                if elapsed_ms > self.extrapolation_limit_ms() {
                    self.stall_count += 1;
                    return Some(Sample::new(last_position, SampleMode::Stalled));
                }
                self.extrap_count += 1;
                Some(Sample::new(
                    last_position + velocity * elapsed_ms as f32,
                    SampleMode::Extrapolated,
                ))
            }
        }
    }

    pub fn extrap_count(&self) -> u64 {
        self.extrap_count
    }

    pub fn stall_count(&self) -> u64 {
        self.stall_count
    }

    pub fn reset_counters(&mut self) {
        self.extrap_count = 0;
        self.stall_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Snapshot;

    fn config() -> NetcodeConfig {
        NetcodeConfig {
            tick_duration_ms: 33.0,
            extrapolating_ticks: 3,
            ..NetcodeConfig::default()
        }
    }

    fn at(tick: u64, time: f64, x: f32) -> Snapshot {
        Snapshot::new(tick, time).with_entity(7, Position::new(x, 0.0))
    }

    #[test]
    fn test_interpolates_between_bracketing_snapshots() {
        let mut buffer = SnapshotBuffer::with_capacity(8);
        buffer.insert(at(100, 1000.0, 0.0));
        buffer.insert(at(101, 1033.0, 3.0));

        let mut interp = Interpolator::new(&config());
        let sample = interp.sample(&buffer, 7, 1016.5).unwrap();
        assert_eq!(sample.mode, SampleMode::Interpolated);
        assert_eq!(sample.position, Position::new(1.5, 0.0));
    }

    #[test]
    fn test_midpoint_is_exact() {
        let mut buffer = SnapshotBuffer::with_capacity(8);
        buffer.insert(Snapshot::new(1, 0.0).with_entity(1, Position::new(-10.0, 4.0)));
        buffer.insert(Snapshot::new(2, 50.0).with_entity(1, Position::new(30.0, -8.0)));

        let mut interp = Interpolator::new(&config());
        let sample = interp.sample(&buffer, 1, 25.0).unwrap();
        assert_eq!(sample.position, Position::new(10.0, -2.0));
    }

    #[test]
    fn test_missing_entity_yields_none() {
        let mut buffer = SnapshotBuffer::with_capacity(8);
        buffer.insert(at(100, 1000.0, 0.0));
        buffer.insert(Snapshot::new(101, 1033.0));

        let mut interp = Interpolator::new(&config());
        assert!(interp.sample(&buffer, 7, 1016.0).is_none());
        assert!(interp.sample(&buffer, 99, 1016.0).is_none());
        assert!(interp.sample(&SnapshotBuffer::with_capacity(2), 7, 0.0).is_none());
    }

    #[test]
    fn test_extrapolates_within_cap() {
        let mut buffer = SnapshotBuffer::with_capacity(8);
        buffer.insert(at(99, 967.0, -3.0));
        buffer.insert(at(100, 1000.0, 0.0));

        let mut interp = Interpolator::new(&config());
        let sample = interp.sample(&buffer, 7, 1066.0).unwrap();
        assert_eq!(sample.mode, SampleMode::Extrapolated);
        assert!(!sample.stalled);
        assert!((sample.position.x - 6.0).abs() < 1e-4);
        assert_eq!(interp.extrap_count(), 1);
    }

    #[test]
    fn test_stalls_past_cap_and_holds_position() {
        let mut buffer = SnapshotBuffer::with_capacity(8);
        buffer.insert(at(99, 967.0, -3.0));
        buffer.insert(at(100, 1000.0, 0.0));

        let mut interp = Interpolator::new(&config());
        // Cap is 3 ticks = 99ms.
        let sample = interp.sample(&buffer, 7, 1000.0 + 100.0).unwrap();
        assert!(sample.stalled);
        assert_eq!(sample.mode, SampleMode::Stalled);
        assert_eq!(sample.position, Position::new(0.0, 0.0));

        let later = interp.sample(&buffer, 7, 5000.0).unwrap();
        assert_eq!(later.position, sample.position);
        assert_eq!(interp.stall_count(), 2);
        assert_eq!(interp.extrap_count(), 0);
        assert_eq!(buffer.stats().underrun_count, 2);
    }

    #[test]
    fn test_single_observation_is_held() {
        let mut buffer = SnapshotBuffer::with_capacity(8);
        buffer.insert(at(100, 1000.0, 5.0));

        let mut interp = Interpolator::new(&config());
        let sample = interp.sample(&buffer, 7, 1050.0).unwrap();
        assert_eq!(sample.mode, SampleMode::Held);
        assert_eq!(sample.position.x, 5.0);
        assert_eq!(interp.extrap_count(), 0);
    }

    #[test]
    fn test_velocity_skips_gaps() {
        let mut buffer = SnapshotBuffer::with_capacity(8);
        buffer.insert(at(98, 934.0, -6.0));
        buffer.insert(Snapshot::new(99, 967.0));
        buffer.insert(at(100, 1000.0, 0.0));

        let mut interp = Interpolator::new(&config());
        let sample = interp.sample(&buffer, 7, 1033.0).unwrap();
        // 6 units over 66ms, projected 33ms.
        assert!((sample.position.x - 3.0).abs() < 1e-4);
    }
}
