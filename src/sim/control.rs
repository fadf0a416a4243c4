//! Per-tick ship controls
//!
//! A [`Controller`] turns the current ship into the inputs for the next
//! tick. Demo playback reads a recorded tape indexed by track position, live
//! play reads whatever the input layer last published.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ship::Ship;

/// Demo tape entries per unit of z
const DEMO_ENTRIES_PER_ROW: f64 = 0x10000 as f64 / 0x666 as f64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("turn input {0} outside -1..=1")]
    InvalidTurn(i8),
    #[error("accel input {0} outside -1..=1")]
    InvalidAccel(i8),
}

/// Controls for a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ControllerState {
    /// -1 left, 0 straight, 1 right
    pub turn: i8,
    /// -1 brake, 0 coast, 1 accelerate
    pub accel: i8,
    pub jump: bool,
}

impl ControllerState {
    /// No input
    pub const NEUTRAL: ControllerState = ControllerState {
        turn: 0,
        accel: 0,
        jump: false,
    };

    pub fn new(turn: i8, accel: i8, jump: bool) -> Result<Self, ControlError> {
        if !(-1..=1).contains(&turn) {
            return Err(ControlError::InvalidTurn(turn));
        }
        if !(-1..=1).contains(&accel) {
            return Err(ControlError::InvalidAccel(accel));
        }
        Ok(Self { turn, accel, jump })
    }

    /// Decode a demo tape byte: bits 2-3 turn, bits 0-1 accel, bit 4 jump.
    ///
    /// The 2-bit fields can encode 3, which maps to an out-of-range input of
    /// 2; it is clamped to 1.
    pub fn from_demo_byte(b: u8) -> Self {
        let field = |v: u8| (v as i8 - 1).min(1);
        Self {
            turn: field((b >> 2) & 3),
            accel: field(b & 3),
            jump: (b >> 4) & 1 != 0,
        }
    }

    /// Inverse of [`ControllerState::from_demo_byte`]
    pub fn to_demo_byte(self) -> u8 {
        ((self.turn + 1) as u8) << 2 | (self.accel + 1) as u8 | (self.jump as u8) << 4
    }
}

/// Source of controls, queried once per tick
pub trait Controller {
    fn update(&mut self, ship: &Ship) -> ControllerState;
}

/// Always neutral
#[derive(Debug, Default, Clone, Copy)]
pub struct NullController;

impl Controller for NullController {
    fn update(&mut self, _ship: &Ship) -> ControllerState {
        ControllerState::NEUTRAL
    }
}

/// Plays back a recorded demo tape keyed by the ship's z position
#[derive(Debug, Clone)]
pub struct DemoController {
    tape: Vec<u8>,
    warned_end: bool,
}

impl DemoController {
    pub fn new(tape: Vec<u8>) -> Self {
        Self {
            tape,
            warned_end: false,
        }
    }

    pub fn tape(&self) -> &[u8] {
        &self.tape
    }
}

impl Controller for DemoController {
    fn update(&mut self, ship: &Ship) -> ControllerState {
        let idx = (ship.z * DEMO_ENTRIES_PER_ROW).floor();
        match (idx >= 0.0).then(|| self.tape.get(idx as usize)).flatten() {
            Some(&b) => ControllerState::from_demo_byte(b),
            None => {
                if !self.warned_end {
                    log::warn!("Demo tape exhausted at z={:.3}, continuing with no input", ship.z);
                    self.warned_end = true;
                }
                ControllerState::NEUTRAL
            }
        }
    }
}

/// Live input cell shared between the input layer (writer) and the physics
/// loop (reader). The state is packed into one byte so a tick always sees a
/// consistent combination.
#[derive(Debug, Clone)]
pub struct LiveInput {
    packed: Arc<AtomicU8>,
}

impl Default for LiveInput {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveInput {
    pub fn new() -> Self {
        Self {
            packed: Arc::new(AtomicU8::new(ControllerState::NEUTRAL.to_demo_byte())),
        }
    }

    pub fn set(&self, state: ControllerState) {
        self.packed.store(state.to_demo_byte(), Ordering::Release);
    }

    pub fn get(&self) -> ControllerState {
        ControllerState::from_demo_byte(self.packed.load(Ordering::Acquire))
    }
}

/// Reads the most recent [`LiveInput`] each tick
#[derive(Debug, Clone)]
pub struct InputController {
    input: LiveInput,
}

impl InputController {
    pub fn new(input: LiveInput) -> Self {
        Self { input }
    }
}

impl Controller for InputController {
    fn update(&mut self, _ship: &Ship) -> ControllerState {
        self.input.get()
    }
}
