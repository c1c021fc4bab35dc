//! Authoritative snapshots and the ring buffer that retains them.

use protocol::packets::SnapshotPacket;
use protocol::{EntityId, Position, Tick};
use serde::Serialize;
use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// One authoritative server state observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub tick: Tick,
    /// Server wall-clock time at which this tick was produced.
    pub server_time_ms: f64,
    pub entities: HashMap<EntityId, Position>,
}

impl Snapshot {
    pub fn new(tick: Tick, server_time_ms: f64) -> Self {
        Self {
            tick,
            server_time_ms,
            entities: HashMap::new(),
        }
    }

    /// Builder-style entity insert.
    pub fn with_entity(mut self, id: EntityId, position: Position) -> Self {
        self.entities.insert(id, position);
        self
    }

    #[inline]
    pub fn position(&self, id: EntityId) -> Option<Position> {
        self.entities.get(&id).copied()
    }

    #[inline]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Entities present in `previous` but missing here (removed or eliminated).
    pub fn removed_since<'a>(
        &'a self,
        previous: &'a Snapshot,
    ) -> impl Iterator<Item = EntityId> + 'a {
        previous
            .entities
            .keys()
            .copied()
            .filter(|id| !self.entities.contains_key(id))
    }

    /// Entities present here but not in `previous`.
    pub fn spawned_since<'a>(
        &'a self,
        previous: &'a Snapshot,
    ) -> impl Iterator<Item = EntityId> + 'a {
        self.entities
            .keys()
            .copied()
            .filter(|id| !previous.entities.contains_key(id))
    }
}

impl From<&SnapshotPacket> for Snapshot {
    fn from(packet: &SnapshotPacket) -> Self {
        Self {
            tick: packet.tick,
            server_time_ms: packet.server_time_ms,
            entities: packet
                .entities
                .iter()
                .map(|record| (record.id, record.position))
                .collect(),
        }
    }
}

/// Nearest-pair lookup result for a render time.
#[derive(Debug, Clone, Copy)]
pub enum RenderSample<'a> {
    /// Two snapshots bracketing the render time (or the oldest pair, clamped).
    Interpolate {
        before: &'a Snapshot,
        after: &'a Snapshot,
    },
    /// Render time is past the newest snapshot, or only one snapshot is held.
    Extrapolate { last: &'a Snapshot },
    /// Nothing buffered yet.
    Empty,
}

/// Result of [`SnapshotBuffer::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Inserted, and the oldest snapshot was evicted to make room.
    Evicted { tick: Tick },
    /// Tick not newer than the newest held snapshot, or a non-finite server
    /// time; ignored.
    DroppedLate,
}

/// Read-only buffer counters for the diagnostics overlay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub size: usize,
    pub capacity: usize,
    pub inserted_count: u64,
    pub evicted_count: u64,
    pub late_snapshot_count: u64,
    pub underrun_count: u64,
}

/// Fixed-capacity ring of snapshots in strictly increasing tick order.
#[derive(Debug)]
pub struct SnapshotBuffer {
    snapshots: VecDeque<Snapshot>,
    capacity: usize,
    inserted_count: u64,
    evicted_count: u64,
    late_snapshot_count: u64,
    // Lookups are logically read-only; the counter is diagnostics only.
    underrun_count: Cell<u64>,
    // Render time of the last counted underrun, so every entity sampled in
    // the same frame counts once.
    last_underrun_at: Cell<Option<f64>>,
}

impl SnapshotBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
            inserted_count: 0,
            evicted_count: 0,
            late_snapshot_count: 0,
            underrun_count: Cell::new(0),
            last_underrun_at: Cell::new(None),
        }
    }

    /// Append a snapshot, evicting the oldest when full.
    ///
    /// Ticks not strictly newer than the newest held snapshot are dropped as
    /// late, as are snapshots whose server time is NaN or infinite. Server
    /// times are forced non-decreasing so lookup stays sorted.
    pub fn insert(&mut self, mut snapshot: Snapshot) -> InsertOutcome {
        if !snapshot.server_time_ms.is_finite() {
            self.late_snapshot_count += 1;
            warn!(
                "Dropped snapshot tick {} with invalid server time {}",
                snapshot.tick, snapshot.server_time_ms
            );
            return InsertOutcome::DroppedLate;
        }
        if let Some(newest) = self.snapshots.back() {
            if snapshot.tick <= newest.tick {
                self.late_snapshot_count += 1;
                debug!(
                    "Dropped late snapshot tick {} (newest {})",
                    snapshot.tick, newest.tick
                );
                return InsertOutcome::DroppedLate;
            }
            if snapshot.server_time_ms < newest.server_time_ms {
                snapshot.server_time_ms = newest.server_time_ms;
            }
        }

        let mut outcome = InsertOutcome::Inserted;
        if self.snapshots.len() >= self.capacity {
            if let Some(evicted) = self.snapshots.pop_front() {
                self.evicted_count += 1;
                outcome = InsertOutcome::Evicted { tick: evicted.tick };
            }
        }
        self.snapshots.push_back(snapshot);
        self.inserted_count += 1;
        outcome
    }

    /// Find the snapshots to sample for `render_time_ms`.
    pub fn lookup(&self, render_time_ms: f64) -> RenderSample<'_> {
        let len = self.snapshots.len();
        let Some(newest) = self.snapshots.back() else {
            return RenderSample::Empty;
        };

        if render_time_ms > newest.server_time_ms {
            if self.last_underrun_at.get() != Some(render_time_ms) {
                self.last_underrun_at.set(Some(render_time_ms));
                self.underrun_count.set(self.underrun_count.get() + 1);
            }
            return RenderSample::Extrapolate { last: newest };
        }
        if len == 1 {
            return RenderSample::Extrapolate { last: newest };
        }

        // First snapshot strictly newer than the render time.
        let idx = self
            .snapshots
            .partition_point(|s| s.server_time_ms <= render_time_ms);
        let (before, after) = match idx {
            0 => (0, 1),
            i if i == len => (len - 2, len - 1),
            i => (i - 1, i),
        };
        RenderSample::Interpolate {
            before: &self.snapshots[before],
            after: &self.snapshots[after],
        }
    }

    /// Snapshots still ahead of `render_time_ms`.
    pub fn count_newer_than(&self, render_time_ms: f64) -> usize {
        let idx = self
            .snapshots
            .partition_point(|s| s.server_time_ms <= render_time_ms);
        self.snapshots.len() - idx
    }

    /// The newest snapshot containing `id`, and the one before it that also does.
    pub fn latest_pair_with(&self, id: EntityId) -> Option<(&Snapshot, Option<&Snapshot>)> {
        let mut containing = self.snapshots.iter().rev().filter(|s| s.contains(id));
        let latest = containing.next()?;
        Some((latest, containing.next()))
    }

    pub fn get(&self, tick: Tick) -> Option<&Snapshot> {
        let idx = self.snapshots.partition_point(|s| s.tick < tick);
        self.snapshots.get(idx).filter(|s| s.tick == tick)
    }

    pub fn newest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    pub fn oldest(&self) -> Option<&Snapshot> {
        self.snapshots.front()
    }

    /// Held ticks, oldest first.
    pub fn ticks(&self) -> impl Iterator<Item = Tick> + '_ {
        self.snapshots.iter().map(|s| s.tick)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            size: self.snapshots.len(),
            capacity: self.capacity,
            inserted_count: self.inserted_count,
            evicted_count: self.evicted_count,
            late_snapshot_count: self.late_snapshot_count,
            underrun_count: self.underrun_count.get(),
        }
    }

    /// Drop all snapshots; counters are kept.
    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.last_underrun_at.set(None);
    }

    /// Zero the counters; held snapshots are untouched.
    pub fn reset_counters(&mut self) {
        self.inserted_count = 0;
        self.evicted_count = 0;
        self.late_snapshot_count = 0;
        self.underrun_count.set(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(tick: Tick, time: f64, x: f32) -> Snapshot {
        Snapshot::new(tick, time).with_entity(1, Position::new(x, 0.0))
    }

    #[test]
    fn test_admission_is_strictly_monotonic() {
        let mut buffer = SnapshotBuffer::with_capacity(8);
        assert_eq!(buffer.insert(snap(10, 100.0, 0.0)), InsertOutcome::Inserted);
        assert_eq!(buffer.insert(snap(12, 120.0, 0.0)), InsertOutcome::Inserted);
        assert_eq!(buffer.insert(snap(12, 121.0, 0.0)), InsertOutcome::DroppedLate);
        assert_eq!(buffer.insert(snap(11, 110.0, 0.0)), InsertOutcome::DroppedLate);
        assert_eq!(buffer.insert(snap(13, 130.0, 0.0)), InsertOutcome::Inserted);

        assert_eq!(buffer.ticks().collect::<Vec<_>>(), vec![10, 12, 13]);
        assert_eq!(buffer.stats().late_snapshot_count, 2);
    }

    #[test]
    fn test_capacity_eviction() {
        let mut buffer = SnapshotBuffer::with_capacity(8);
        for tick in 100..=110 {
            buffer.insert(snap(tick, tick as f64 * 33.0, 0.0));
        }
        assert_eq!(buffer.ticks().collect::<Vec<_>>(), (103..=110).collect::<Vec<_>>());
        assert_eq!(buffer.stats().evicted_count, 3);
        assert_eq!(buffer.len(), buffer.capacity());
    }

    #[test]
    fn test_lookup_brackets_render_time() {
        let mut buffer = SnapshotBuffer::with_capacity(8);
        buffer.insert(snap(100, 1000.0, 0.0));
        buffer.insert(snap(101, 1033.0, 3.0));
        buffer.insert(snap(102, 1066.0, 6.0));

        match buffer.lookup(1040.0) {
            RenderSample::Interpolate { before, after } => {
                assert_eq!((before.tick, after.tick), (101, 102));
            }
            other => panic!("expected interpolation, got {other:?}"),
        }
        // Exactly on the newest snapshot: still interpolation, no underrun.
        match buffer.lookup(1066.0) {
            RenderSample::Interpolate { after, .. } => assert_eq!(after.tick, 102),
            other => panic!("expected interpolation, got {other:?}"),
        }
        assert_eq!(buffer.stats().underrun_count, 0);
    }

    #[test]
    fn test_lookup_older_than_all_is_clamped() {
        let mut buffer = SnapshotBuffer::with_capacity(8);
        buffer.insert(snap(100, 1000.0, 0.0));
        buffer.insert(snap(101, 1033.0, 3.0));
        match buffer.lookup(500.0) {
            RenderSample::Interpolate { before, after } => {
                assert_eq!((before.tick, after.tick), (100, 101));
            }
            other => panic!("expected oldest pair, got {other:?}"),
        }
    }

    #[test]
    fn test_lookup_past_newest_counts_underrun() {
        let mut buffer = SnapshotBuffer::with_capacity(8);
        assert!(matches!(buffer.lookup(0.0), RenderSample::Empty));

        buffer.insert(snap(100, 1000.0, 0.0));
        assert!(matches!(
            buffer.lookup(900.0),
            RenderSample::Extrapolate { last } if last.tick == 100
        ));
        assert_eq!(buffer.stats().underrun_count, 0);

        assert!(matches!(buffer.lookup(1100.0), RenderSample::Extrapolate { .. }));
        assert_eq!(buffer.stats().underrun_count, 1);
    }

    #[test]
    fn test_underrun_counted_once_per_render_time() {
        let mut buffer = SnapshotBuffer::with_capacity(8);
        buffer.insert(snap(100, 1000.0, 0.0));
        buffer.insert(snap(101, 1033.0, 3.0));

        // Several entities sampled in the same frame.
        for _ in 0..4 {
            buffer.lookup(1050.0);
        }
        assert_eq!(buffer.stats().underrun_count, 1);

        buffer.lookup(1060.0);
        assert_eq!(buffer.stats().underrun_count, 2);
    }

    #[test]
    fn test_non_finite_server_time_is_rejected() {
        let mut buffer = SnapshotBuffer::with_capacity(8);
        assert_eq!(buffer.insert(snap(1, f64::NAN, 0.0)), InsertOutcome::DroppedLate);
        assert!(buffer.is_empty());

        for (tick, time) in (2..=5).zip([100.0, 150.0, 200.0, 250.0]) {
            assert_eq!(buffer.insert(snap(tick, time, tick as f32)), InsertOutcome::Inserted);
        }
        assert_eq!(
            buffer.insert(snap(6, f64::INFINITY, 0.0)),
            InsertOutcome::DroppedLate
        );
        assert_eq!(buffer.stats().late_snapshot_count, 2);
        assert_eq!(buffer.newest().map(|s| s.server_time_ms), Some(250.0));

        match buffer.lookup(175.0) {
            RenderSample::Interpolate { before, after } => {
                assert_eq!((before.tick, after.tick), (3, 4));
            }
            other => panic!("expected interpolation, got {other:?}"),
        }
    }

    #[test]
    fn test_server_time_forced_non_decreasing() {
        let mut buffer = SnapshotBuffer::with_capacity(4);
        buffer.insert(snap(1, 100.0, 0.0));
        buffer.insert(snap(2, 90.0, 0.0));
        assert_eq!(buffer.get(2).map(|s| s.server_time_ms), Some(100.0));
    }

    #[test]
    fn test_latest_pair_skips_snapshots_without_entity() {
        let mut buffer = SnapshotBuffer::with_capacity(8);
        buffer.insert(snap(1, 10.0, 1.0));
        buffer.insert(Snapshot::new(2, 20.0));
        buffer.insert(snap(3, 30.0, 3.0));
        let (latest, previous) = buffer.latest_pair_with(1).unwrap();
        assert_eq!(latest.tick, 3);
        assert_eq!(previous.map(|s| s.tick), Some(1));
        assert!(buffer.latest_pair_with(2).is_none());
    }

    #[test]
    fn test_clear_keeps_counters() {
        let mut buffer = SnapshotBuffer::with_capacity(4);
        buffer.insert(snap(2, 20.0, 0.0));
        buffer.insert(snap(1, 10.0, 0.0));
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.stats().late_snapshot_count, 1);
        // After a clear any tick is admissible again.
        assert_eq!(buffer.insert(snap(1, 10.0, 0.0)), InsertOutcome::Inserted);
        buffer.reset_counters();
        assert_eq!(buffer.stats().inserted_count, 0);
    }

    #[test]
    fn test_removed_and_spawned() {
        let a = Snapshot::new(1, 0.0)
            .with_entity(1, Position::ZERO)
            .with_entity(2, Position::ZERO);
        let b = Snapshot::new(2, 0.0)
            .with_entity(2, Position::ZERO)
            .with_entity(3, Position::ZERO);
        assert_eq!(b.removed_since(&a).collect::<Vec<_>>(), vec![1]);
        assert_eq!(b.spawned_since(&a).collect::<Vec<_>>(), vec![3]);
    }
}
