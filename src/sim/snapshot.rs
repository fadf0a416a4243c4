//! Snapshot providers for presentation
//!
//! The physics loop pushes one snapshot per tick; a presentation layer asks
//! for the snapshot to draw at its own frame rate. Times are in seconds on
//! any monotonic clock the caller likes.

use super::state::GameSnapshot;

pub trait SnapshotProvider {
    fn reset(&mut self);
    fn push(&mut self, snapshot: GameSnapshot, now: f64);
    fn snapshot(&self, now: f64) -> Option<GameSnapshot>;
}

/// Hands out the latest snapshot unchanged
#[derive(Debug, Default, Clone)]
pub struct LatestSnapshot {
    latest: Option<GameSnapshot>,
}

impl SnapshotProvider for LatestSnapshot {
    fn reset(&mut self) {
        self.latest = None;
    }

    fn push(&mut self, snapshot: GameSnapshot, _now: f64) {
        self.latest = Some(snapshot);
    }

    fn snapshot(&self, _now: f64) -> Option<GameSnapshot> {
        self.latest
    }
}

/// Keeps the last two snapshots and blends between them by the time
/// elapsed since the newest one, relative to the gap between the two pushes
#[derive(Debug, Default, Clone)]
pub struct InterpolatingSnapshots {
    newest: Option<(GameSnapshot, f64)>,
    previous: Option<(GameSnapshot, f64)>,
}

impl SnapshotProvider for InterpolatingSnapshots {
    fn reset(&mut self) {
        self.newest = None;
        self.previous = None;
    }

    fn push(&mut self, snapshot: GameSnapshot, now: f64) {
        self.previous = self.newest.take();
        self.newest = Some((snapshot, now));
    }

    fn snapshot(&self, now: f64) -> Option<GameSnapshot> {
        let (newest, newest_time) = self.newest?;
        let Some((previous, previous_time)) = self.previous else {
            return Some(newest);
        };

        let gap = newest_time - previous_time;
        let t = if gap > 0.0 {
            ((now - newest_time) / gap).clamp(0.0, 1.0)
        } else {
            1.0
        };
        Some(newest.lerp_from(&previous, t))
    }
}
