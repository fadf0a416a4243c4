//! Ship physics
//!
//! One [`Ship::update`] call advances the ship by a single 30 Hz tick. The
//! step order is fixed: later steps read what earlier steps wrote, and every
//! intermediate value is truncated onto the same fixed-point grid each time
//! so recorded demo tapes replay identically.
//!
//! Look-ahead and collision probing work on value copies of the ship; nothing
//! here keeps references to scratch state between calls except the
//! caller-owned `expected` ship, which carries the previous tick's
//! unconstrained target.

use serde::{Deserialize, Serialize};

use super::control::ControllerState;
use super::events::{EventSink, ShipEvent};
use super::fixed::{depletion, round16, round32, s_floor, snap, SCALE_16, SCALE_32};
use super::level::{Cell, FLOOR_HEIGHT, Level, TouchEffect};
use crate::consts::{REFILL_EVENT_THRESHOLD, RESOURCE_MAX};

/// Starting x (centre of the track)
pub const START_X: f64 = 0x8000 as f64 / 0x80 as f64;
/// Starting z
pub const START_Z: f64 = 3.0;

/// Upper bound of the forward velocity
pub const MAX_Z_VELOCITY: f64 = 0x2AAA as f64 / SCALE_32;
/// Forward velocity change per tick of accelerate/brake input
const Z_ACCEL: f64 = 0x4B as f64 / SCALE_32;
/// Forward velocity change from accelerator and decelerator pads
const PAD_ACCEL: f64 = 0x12F as f64 / SCALE_32;
/// Forward velocity lost when scraping a wall sideways
const SCRAPE_PENALTY: f64 = 0x97 as f64 / SCALE_32;
/// Base forward rate added to lateral motion (absent on decelerator pads)
const LATERAL_BASE_RATE: f64 = 0x618 as f64 / SCALE_32;
/// Lateral speed for a full turn input
const TURN_RATE: f64 = 0x1D as f64 / SCALE_16;
/// Initial upward velocity of a jump
const JUMP_VELOCITY: f64 = 0x480 as f64 / SCALE_16;
/// Jumping is impossible at or above this gravity
const MAX_JUMP_GRAVITY: u16 = 0x14;
/// Gravity only applies at or above this height
const GRAVITY_FLOOR: f64 = 0x28 as f64;
/// Fall speed below the gravity floor
const TERMINAL_FALL: f64 = -105.0 / SCALE_16;
/// Height at which the jump assist runs once per jump
const JUMP_ASSIST_HEIGHT: f64 = 110.0;
/// Turning mid-air is allowed this far above the take-off height
const AIR_TURN_WINDOW: f64 = 30.0;
/// Sideways nudge tried when the nose hits a wall
const BUMP_OFFSET: f64 = 0x3A0 as f64 / SCALE_16;
/// Slide drift gained per unit of sliding acceleration
const SLIDE_STEP: f64 = 0x11 as f64 / SCALE_16;
/// Largest sideways gap scanned for on landing
const SLIDE_SCAN: i32 = 0xE;
/// Positions closer than this compare equal
const POSITION_EPSILON: f64 = 0.01;
/// Left and right limits of the jump-assist landing search
const LANDING_MIN_X: f64 = 0x2F80 as f64 / SCALE_16;
const LANDING_MAX_X: f64 = 0xD080 as f64 / SCALE_16;
/// Oxygen drain divisor per unit of the level's oxygen constant
const OXYGEN_TICKS_PER_UNIT: f64 = 0x24 as f64;
/// Escalation steps tried by the jump assist (10%, 20%, ...)
const JUMP_ASSIST_STEPS: u32 = 6;
/// Upper bound on look-ahead ticks before a landing prediction gives up
pub const MAX_LOOKAHEAD_TICKS: u32 = 4096;

/// Ship life cycle. Everything except `Alive` freezes control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShipState {
    #[default]
    Alive,
    Exploded,
    OutOfFuel,
    OutOfOxygen,
}

/// Jump-assist bookkeeping for the current jump
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct JumpOMaster {
    /// The assist already ran for this jump
    pub has_run: bool,
    /// The assist changed the trajectory
    pub in_use: bool,
    /// Forward velocity borrowed by the assist, credited back on landing
    pub velocity_delta: f64,
}

/// Full ship state. Cheap to copy; scratch copies are used for probing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ship {
    pub x: f64,
    pub y: f64,
    pub z: f64,

    /// Residual sideways drift from landing on an edge
    pub slide_amount: f64,
    pub sliding_accel: i32,
    /// Current lateral speed budget
    pub x_movement_base: f64,
    pub y_velocity: f64,
    pub z_velocity: f64,

    /// Distance of the nearest open gap found on the last landing
    pub offset_at_which_not_inside_tile: i32,

    pub is_on_ground: bool,
    pub is_going_up: bool,
    pub jumped_from_y: f64,

    pub fuel: f64,
    pub oxygen: f64,
    pub state: ShipState,

    pub jump_o_master: JumpOMaster,
}

impl Default for Ship {
    fn default() -> Self {
        Self::initial()
    }
}

impl Ship {
    /// Ship at the start line, resting on the floor with full tanks
    pub fn initial() -> Self {
        Self {
            x: START_X,
            y: FLOOR_HEIGHT,
            z: START_Z,
            slide_amount: 0.0,
            sliding_accel: 0,
            x_movement_base: 0.0,
            y_velocity: 0.0,
            z_velocity: 0.0,
            offset_at_which_not_inside_tile: 0,
            is_on_ground: true,
            is_going_up: false,
            jumped_from_y: 0.0,
            fuel: RESOURCE_MAX,
            oxygen: RESOURCE_MAX,
            state: ShipState::Alive,
            jump_o_master: JumpOMaster::default(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state == ShipState::Alive
    }

    /// Advance one tick.
    ///
    /// `expected` holds the unconstrained target computed on the previous
    /// tick and is overwritten with this tick's target.
    pub fn update(
        &mut self,
        level: &Level,
        expected: &mut Ship,
        controls: ControllerState,
        events: &mut impl EventSink,
    ) {
        self.sanitize();
        let can_control = self.is_alive();

        let cell = level.cell(self.x, self.y, self.z);
        let is_above_nothing = cell.is_empty();
        let touch = self.touch_effect(cell);
        let on_sliding_tile = touch == TouchEffect::Slide;
        let on_decel_pad = touch == TouchEffect::Decelerate;

        self.apply_touch_effect(touch, events);
        self.update_y_velocity(expected, level, events);
        self.update_z_velocity(can_control, controls.accel);
        self.update_x_velocity(can_control, controls.turn, on_sliding_tile, is_above_nothing);
        self.update_jump(can_control, is_above_nothing, controls.jump, level);
        self.update_jump_o_master(controls, level);
        self.update_gravity(level.gravity_acceleration());

        *expected = *self;
        expected.attempt_motion(on_decel_pad);
        expected.sanitize();
        self.move_to(expected, level);
        self.sanitize();
        expected.sanitize();

        self.handle_bumps(expected, level, events);
        self.handle_collision(expected, events);
        self.handle_slide_collision(expected);
        self.handle_bounce(expected, level);
        self.handle_oxygen_and_fuel(level);
    }

    /// Snap position onto the 1/128 (x, y) and 1/65536 (z) grids
    pub fn sanitize(&mut self) {
        self.x = snap(self.x, SCALE_16);
        self.y = snap(self.y, SCALE_16);
        self.z = snap(self.z, SCALE_32);
    }

    /// Effect of the surface the ship rests on, if any
    pub fn touch_effect(&self, cell: &Cell) -> TouchEffect {
        if !self.is_on_ground {
            return TouchEffect::None;
        }

        let floor_y = self.y.floor();
        if floor_y == FLOOR_HEIGHT {
            if let Some(tile) = cell.tile {
                return tile.effect;
            }
        } else if floor_y > FLOOR_HEIGHT {
            if let Some(cube) = cell.cube.filter(|c| c.height == Some(self.y)) {
                return cube.effect;
            }
        }
        TouchEffect::None
    }

    fn apply_touch_effect(&mut self, effect: TouchEffect, events: &mut impl EventSink) {
        match effect {
            TouchEffect::Accelerate => self.z_velocity += PAD_ACCEL,
            TouchEffect::Decelerate => self.z_velocity -= PAD_ACCEL,
            TouchEffect::Kill => self.explode(events),
            TouchEffect::RefillOxygen => {
                if self.is_alive() {
                    if self.fuel < REFILL_EVENT_THRESHOLD || self.oxygen < REFILL_EVENT_THRESHOLD {
                        events.emit(ShipEvent::Refilled);
                    }
                    self.fuel = RESOURCE_MAX;
                    self.oxygen = RESOURCE_MAX;
                }
            }
            TouchEffect::None | TouchEffect::Slide => {}
        }
        self.clamp_z_velocity();
    }

    fn update_y_velocity(&mut self, expected: &Ship, level: &Level, events: &mut impl EventSink) {
        if !self.is_different_height(expected) {
            return;
        }

        if self.slide_amount == 0.0 || self.offset_at_which_not_inside_tile >= 2 {
            let bounce_threshold = level.gravity as f64 * 0x104 as f64 / 8.0 / SCALE_16;
            if self.y_velocity.abs() > bounce_threshold {
                if self.y_velocity < 0.0 {
                    events.emit(ShipEvent::Bounced);
                }
                self.y_velocity *= -0.5;
            } else {
                self.y_velocity = 0.0;
            }
        } else {
            self.y_velocity = 0.0;
        }
    }

    fn update_z_velocity(&mut self, can_control: bool, accel: i8) {
        let input = if can_control { accel as f64 } else { 0.0 };
        self.z_velocity += input * Z_ACCEL;
        self.clamp_z_velocity();
    }

    fn update_x_velocity(
        &mut self,
        can_control: bool,
        turn: i8,
        on_sliding_tile: bool,
        is_above_nothing: bool,
    ) {
        if on_sliding_tile {
            return;
        }

        let going_up = self.is_going_up;
        let air_turn = (going_up || is_above_nothing)
            && self.x_movement_base == 0.0
            && self.y_velocity > 0.0
            && (self.y - self.jumped_from_y) < AIR_TURN_WINDOW;
        let ground_turn = !going_up && !is_above_nothing;

        if air_turn || ground_turn {
            self.x_movement_base = if can_control {
                turn as f64 * TURN_RATE
            } else {
                0.0
            };
        }
    }

    fn update_jump(&mut self, can_control: bool, is_above_nothing: bool, jump: bool, level: &Level) {
        if !self.is_going_up
            && !is_above_nothing
            && jump
            && level.gravity < MAX_JUMP_GRAVITY
            && can_control
        {
            self.y_velocity = JUMP_VELOCITY;
            self.is_going_up = true;
            self.jumped_from_y = self.y;
        }
    }

    fn update_jump_o_master(&mut self, controls: ControllerState, level: &Level) {
        if self.is_going_up && !self.jump_o_master.has_run && self.y >= JUMP_ASSIST_HEIGHT {
            self.run_jump_o_master(controls, level);
            self.jump_o_master.has_run = true;
        }
    }

    fn update_gravity(&mut self, acceleration: f64) {
        if self.y >= GRAVITY_FLOOR {
            self.y_velocity += acceleration;
            self.y_velocity = s_floor(self.y_velocity * SCALE_16) / SCALE_16;
        } else if self.y_velocity > TERMINAL_FALL {
            self.y_velocity = TERMINAL_FALL;
        }
    }

    /// Integrate velocities into position, ignoring geometry
    fn attempt_motion(&mut self, on_decel_pad: bool) {
        let mut motion_vel = self.z_velocity;
        if !on_decel_pad {
            motion_vel += LATERAL_BASE_RATE;
        }

        let x_motion = s_floor(self.x_movement_base * SCALE_16) * s_floor(motion_vel * SCALE_32)
            / SCALE_32
            + self.slide_amount;
        if self.is_alive() {
            self.x += x_motion;
            self.y += self.y_velocity;
            self.z += self.z_velocity;
        }
    }

    /// Move toward `dest` without entering solid geometry.
    ///
    /// A coarse five-step search along the straight path finds the last free
    /// fraction; from there z, x and y are walked separately in shrinking
    /// steps, each axis advancing only while the probe stays outside tiles.
    pub fn move_to(&mut self, dest: &Ship, level: &Level) {
        if self.x == dest.x && self.y == dest.y && self.z == dest.z {
            return;
        }

        let mut iter = 1;
        while iter <= 5 {
            let probe = self.interpolated(dest, iter as f64 / 5.0);
            if level.is_inside_tile(probe.x, probe.y, probe.z) {
                break;
            }
            iter += 1;
        }
        *self = self.interpolated(dest, (iter - 1) as f64 / 5.0);

        let mut z_gran = 0x1000 as f64 / SCALE_32;
        while z_gran != 0.0 {
            let probe_z = self.z + z_gran;
            if dest.z - self.z >= z_gran && !level.is_inside_tile(self.x, self.y, probe_z) {
                self.z = probe_z;
            } else {
                z_gran = ((z_gran / 16.0) * SCALE_32).floor() / SCALE_32;
            }
        }
        self.z = round32(self.z);

        self.x = walk_axis(self.x, dest.x, |x| level.is_inside_tile(x, self.y, self.z));
        self.x = round16(self.x);

        self.y = walk_axis(self.y, dest.y, |y| level.is_inside_tile(self.x, y, self.z));
        self.y = round16(self.y);
    }

    /// Copy with position moved `percent` of the way to `dest`
    fn interpolated(&self, dest: &Ship, percent: f64) -> Ship {
        let mut ship = *self;
        ship.x = round16((dest.x - self.x) * percent + self.x);
        ship.y = round16((dest.y - self.y) * percent + self.y);
        ship.z = round32((dest.z - self.z) * percent + self.z);
        ship
    }

    /// Slip sideways around a wall the nose ran into
    fn handle_bumps(&mut self, expected: &mut Ship, level: &Level, events: &mut impl EventSink) {
        if self.z == expected.z || !level.is_inside_tile(self.x, self.y, expected.z) {
            return;
        }

        for offset in [-BUMP_OFFSET, BUMP_OFFSET] {
            let x = self.x + offset;
            if !level.is_inside_tile(x, self.y, expected.z) {
                self.x = x;
                expected.z = self.z;
                events.emit(ShipEvent::BumpedWall);
                return;
            }
        }
    }

    fn handle_collision(&mut self, expected: &Ship, events: &mut impl EventSink) {
        if (self.z - expected.z).abs() <= POSITION_EPSILON {
            return;
        }

        if self.z_velocity < 1.0 / 3.0 * MAX_Z_VELOCITY {
            self.z_velocity = 0.0;
            events.emit(ShipEvent::BumpedWall);
        } else {
            self.explode(events);
        }
    }

    fn handle_slide_collision(&mut self, expected: &mut Ship) {
        if (self.x - expected.x).abs() <= POSITION_EPSILON {
            return;
        }

        self.x_movement_base = 0.0;
        if self.slide_amount != 0.0 {
            expected.x = self.x;
            self.slide_amount = 0.0;
        }
        self.z_velocity -= SCRAPE_PENALTY;
        self.clamp_z_velocity();
    }

    /// Landing: settle on the ground and work out edge drift
    fn handle_bounce(&mut self, expected: &Ship, level: &Level) {
        self.is_on_ground = false;
        if !(self.y_velocity < 0.0 && expected.y != self.y) {
            return;
        }

        self.z_velocity += self.jump_o_master.velocity_delta;
        self.clamp_z_velocity();
        self.jump_o_master = JumpOMaster::default();

        self.is_going_up = false;
        self.is_on_ground = true;
        self.sliding_accel = 0;

        let probe_y = self.y - 1.0 / SCALE_16;
        for direction in [1, -1] {
            for i in 1..=SLIDE_SCAN {
                let probe_x = self.x + (direction * i) as f64;
                if !level.is_inside_tile(probe_x, probe_y, self.z) {
                    self.sliding_accel += direction;
                    self.offset_at_which_not_inside_tile = i;
                    break;
                }
            }
        }

        if self.sliding_accel != 0 {
            self.slide_amount += SLIDE_STEP * self.sliding_accel as f64;
        } else {
            self.slide_amount = 0.0;
        }
    }

    fn handle_oxygen_and_fuel(&mut self, level: &Level) {
        self.oxygen -= depletion(RESOURCE_MAX, OXYGEN_TICKS_PER_UNIT * level.oxygen as f64);
        if self.oxygen <= 0.0 {
            self.oxygen = 0.0;
            self.exhaust(ShipState::OutOfOxygen);
        }

        self.fuel -= depletion(self.z_velocity * RESOURCE_MAX, level.fuel as f64);
        if self.fuel <= 0.0 {
            self.fuel = 0.0;
            self.exhaust(ShipState::OutOfFuel);
        }
    }

    fn explode(&mut self, events: &mut impl EventSink) {
        if self.state != ShipState::Exploded {
            log::info!("Ship exploded at z={:.3}", self.z);
            self.state = ShipState::Exploded;
            events.emit(ShipEvent::Exploded);
        }
    }

    fn exhaust(&mut self, state: ShipState) {
        if self.is_alive() {
            log::info!("Ship {:?} at z={:.3}", state, self.z);
            self.state = state;
        }
    }

    /// Nudge the jump so it lands on something solid.
    ///
    /// Tries lateral speed then forward speed, each scaled up and down by
    /// 10%, 20%, ... until a trajectory lands safely. Forward speed borrowed
    /// here is credited back on landing.
    fn run_jump_o_master(&mut self, controls: ControllerState, level: &Level) {
        if self.will_land_on_tile(controls, level) {
            return;
        }

        let z_velocity = self.z_velocity;
        let x_movement = self.x_movement_base;
        let mut found = false;

        'search: for i in 1..=JUMP_ASSIST_STEPS {
            let scale = i as f64 / 10.0;

            for x_mov in [x_movement + x_movement * scale, x_movement - x_movement * scale] {
                self.x_movement_base = round16(x_mov);
                if self.will_land_on_tile(controls, level) {
                    found = true;
                    break 'search;
                }
            }
            self.x_movement_base = x_movement;

            for zv in [z_velocity + z_velocity * scale, z_velocity - z_velocity * scale] {
                let zv = round32(zv);
                self.z_velocity = clamp_z(zv);
                if self.z_velocity == zv && self.will_land_on_tile(controls, level) {
                    found = true;
                    break 'search;
                }
            }
            self.z_velocity = z_velocity;
        }

        self.jump_o_master.velocity_delta = z_velocity - self.z_velocity;
        if found {
            self.jump_o_master.in_use = true;
            log::debug!(
                "Jump assist adjusted trajectory (x {:.4} -> {:.4}, z {:.5} -> {:.5})",
                x_movement,
                self.x_movement_base,
                z_velocity,
                self.z_velocity
            );
        } else {
            log::debug!("Jump assist found no safe landing at z={:.3}", self.z);
        }
    }

    /// Whether the current trajectory comes down over solid, non-lethal ground.
    ///
    /// Pure forward simulation on copies of the motion values. Gives up and
    /// reports `false` after [`MAX_LOOKAHEAD_TICKS`] ticks without landing.
    pub fn will_land_on_tile(&self, controls: ControllerState, level: &Level) -> bool {
        let gravity = level.gravity_acceleration();
        let (mut x, mut y, mut z) = (self.x, self.y, self.z);
        let x_velocity = self.x_movement_base;
        let mut y_velocity = self.y_velocity;
        let mut z_velocity = self.z_velocity;

        for _ in 0..MAX_LOOKAHEAD_TICKS {
            let current_x = x;
            let current_z = z;

            y_velocity += gravity;
            z += z_velocity;

            let x_rate = z_velocity + LATERAL_BASE_RATE;
            x += x_velocity * x_rate * SCALE_16 + self.slide_amount;
            if !(LANDING_MIN_X..=LANDING_MAX_X).contains(&x) {
                return false;
            }

            y += y_velocity;
            z_velocity = clamp_z(z_velocity + controls.accel as f64 * Z_ACCEL);

            if y <= FLOOR_HEIGHT {
                return !is_on_nothing(level, current_x, current_z) && !is_on_nothing(level, x, z);
            }
        }

        log::warn!(
            "Landing prediction gave up after {} ticks (y={:.3}, gravity={})",
            MAX_LOOKAHEAD_TICKS,
            y,
            level.gravity
        );
        false
    }

    fn clamp_z_velocity(&mut self) {
        self.z_velocity = clamp_z(self.z_velocity);
    }

    fn is_different_height(&self, other: &Ship) -> bool {
        (other.y - self.y).abs() > POSITION_EPSILON
    }
}

/// Clamp a forward velocity into `[0, MAX_Z_VELOCITY]`
pub fn clamp_z(z: f64) -> f64 {
    z.clamp(0.0, MAX_Z_VELOCITY)
}

/// Nothing to land on: empty cell or a kill tile
fn is_on_nothing(level: &Level, x: f64, z: f64) -> bool {
    let cell = level.cell(x, 0.0, z);
    cell.is_empty() || cell.tile.is_some_and(|t| t.effect == TouchEffect::Kill)
}

/// Walk one axis from `pos` toward `target` in steps shrinking by 5x,
/// advancing only while `blocked` reports free space.
fn walk_axis(mut pos: f64, target: f64, blocked: impl Fn(f64) -> bool) -> f64 {
    let start_gran = 0x7D as f64 / SCALE_16;
    let mut gran = if target > pos { start_gran } else { -start_gran };
    while gran.abs() > 0.0 {
        let probe = pos + gran;
        if (target - pos).abs() >= gran.abs() && !blocked(probe) {
            pos = probe;
        } else {
            gran = s_floor(gran / 5.0 * SCALE_16) / SCALE_16;
        }
    }
    pos
}
