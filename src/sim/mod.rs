//! Deterministic simulation module
//!
//! All gameplay logic lives here. This module must be pure and deterministic:
//! - Fixed timestep only
//! - Values truncated onto the same fixed-point grid every tick
//! - No rendering, audio or platform dependencies

pub mod clock;
pub mod control;
pub mod events;
pub mod fixed;
pub mod level;
pub mod ship;
pub mod snapshot;
pub mod state;

pub use clock::FrameClock;
pub use control::{
    ControlError, Controller, ControllerState, DemoController, InputController, LiveInput,
    NullController,
};
pub use events::{EventSink, ShipEvent};
pub use level::{Cell, Color, Cube, Level, LevelEntry, LevelError, Tile, TouchEffect, parse_level_index};
pub use ship::{JumpOMaster, Ship, ShipState};
pub use snapshot::{InterpolatingSnapshots, LatestSnapshot, SnapshotProvider};
pub use state::{GameSnapshot, StateManager, TickOutcome};
