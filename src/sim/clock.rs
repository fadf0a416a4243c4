//! Fixed-step frame clock
//!
//! Converts variable wall-clock frame deltas into whole physics ticks.

use super::events::EventSink;
use super::state::{GameSnapshot, StateManager};
use crate::consts::{MAX_FRAME_DELTA, MAX_SUBSTEPS, PHYSICS_DT};

#[derive(Debug, Default, Clone)]
pub struct FrameClock {
    accumulator: f64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }

    /// Fraction of a tick left in the accumulator
    pub fn alpha(&self) -> f64 {
        self.accumulator / PHYSICS_DT
    }

    /// Feed `dt` seconds of wall-clock time and run the ticks that are due.
    ///
    /// At most [`MAX_SUBSTEPS`] ticks run per call; whole ticks beyond that
    /// are dropped so a long stall never snowballs.
    pub fn advance(
        &mut self,
        dt: f64,
        state: &mut StateManager,
        events: &mut impl EventSink,
    ) -> Vec<GameSnapshot> {
        self.accumulator += dt.clamp(0.0, MAX_FRAME_DELTA);

        let mut snapshots = Vec::new();
        let mut substeps = 0;
        while self.accumulator >= PHYSICS_DT && substeps < MAX_SUBSTEPS {
            snapshots.push(state.run_frame(events));
            self.accumulator -= PHYSICS_DT;
            substeps += 1;
        }

        if self.accumulator >= PHYSICS_DT {
            log::debug!(
                "Dropping {:.1} physics ticks of backlog",
                self.accumulator / PHYSICS_DT
            );
            self.accumulator %= PHYSICS_DT;
        }
        snapshots
    }
}
