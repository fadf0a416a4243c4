//! Physics driver
//!
//! [`StateManager`] owns the level, the controller and the ship pair
//! (current + expected) and advances them one tick per [`StateManager::run_frame`].

use glam::DVec3;
use serde::{Deserialize, Serialize};

use super::control::Controller;
use super::events::EventSink;
use super::level::Level;
use super::ship::{Ship, ShipState};
use crate::consts::RESOURCE_MAX;

/// Distance before the end of the level at which the finish tunnel counts
const FINISH_MARGIN: f64 = 0.5;

/// Read-only view of the ship published once per tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub position: DVec3,
    /// Only z is populated (forward speed including borrowed jump-assist speed)
    pub velocity: DVec3,
    pub craft_state: ShipState,
    pub fuel_percent: f64,
    pub oxygen_percent: f64,
    pub jump_o_master_in_use: bool,
    pub jump_o_master_velocity_delta: f64,
}

impl GameSnapshot {
    pub fn from_ship(ship: &Ship) -> Self {
        Self {
            position: DVec3::new(ship.x, ship.y, ship.z),
            velocity: DVec3::new(
                0.0,
                0.0,
                ship.z_velocity + ship.jump_o_master.velocity_delta,
            ),
            craft_state: ship.state,
            fuel_percent: ship.fuel / RESOURCE_MAX,
            oxygen_percent: ship.oxygen / RESOURCE_MAX,
            jump_o_master_in_use: ship.jump_o_master.in_use,
            jump_o_master_velocity_delta: ship.jump_o_master.velocity_delta,
        }
    }

    /// Blend position and velocity from `older` toward `self` by `t`;
    /// every other field comes from `self`
    pub fn lerp_from(&self, older: &GameSnapshot, t: f64) -> GameSnapshot {
        GameSnapshot {
            position: older.position.lerp(self.position, t),
            velocity: older.velocity.lerp(self.velocity, t),
            ..*self
        }
    }
}

/// Where a run stands after the latest tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickOutcome {
    Running,
    Won,
    Lost(ShipState),
}

pub struct StateManager {
    level: Level,
    controller: Box<dyn Controller>,
    current: Ship,
    expected: Ship,
    did_win: bool,
    ticks: u64,
}

impl StateManager {
    pub fn new(level: Level, controller: Box<dyn Controller>) -> Self {
        let current = Ship::initial();
        Self {
            level,
            controller,
            current,
            expected: current,
            did_win: false,
            ticks: 0,
        }
    }

    /// Put the ship back on the start line
    pub fn reset(&mut self) {
        self.current = Ship::initial();
        self.expected = self.current;
        self.did_win = false;
        self.ticks = 0;
    }

    pub fn set_controller(&mut self, controller: Box<dyn Controller>) {
        self.controller = controller;
    }

    pub fn level(&self) -> &Level {
        &self.level
    }

    pub fn ship(&self) -> &Ship {
        &self.current
    }

    pub fn did_win(&self) -> bool {
        self.did_win
    }

    /// Ticks run since the last reset
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Fraction of the track covered, for the dashboard gauge
    pub fn track_progress(&self) -> f64 {
        match self.level.length() {
            0 => 0.0,
            len => (self.current.z / len as f64).clamp(0.0, 1.0),
        }
    }

    pub fn outcome(&self) -> TickOutcome {
        if self.did_win {
            TickOutcome::Won
        } else if self.current.is_alive() {
            TickOutcome::Running
        } else {
            TickOutcome::Lost(self.current.state)
        }
    }

    /// Run one physics tick and publish the resulting snapshot
    pub fn run_frame(&mut self, events: &mut impl EventSink) -> GameSnapshot {
        let controls = self.controller.update(&self.current);
        self.current
            .update(&self.level, &mut self.expected, controls, events);
        self.ticks += 1;

        let ship = &self.current;
        if !self.did_win
            && ship.z >= self.level.length() as f64 - FINISH_MARGIN
            && self.level.is_inside_tunnel(ship.x, ship.y, ship.z)
        {
            log::info!(
                "Level '{}' finished after {} ticks",
                self.level.name,
                self.ticks
            );
            self.did_win = true;
        }

        GameSnapshot::from_ship(&self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::control::{ControllerState, DemoController, NullController};
    use crate::sim::events::{Discard, ShipEvent};
    use crate::sim::level::LEVEL_WIDTH;

    fn level(length: usize, cell: (u8, u8), last_rows: Option<(u8, u8)>) -> Level {
        let mut bytes = Vec::new();
        for z in 0..length {
            let c = match last_rows {
                Some(end) if z + 3 >= length => end,
                _ => cell,
            };
            for _ in 0..LEVEL_WIDTH {
                bytes.extend_from_slice(&[c.0, c.1]);
            }
        }
        Level::from_cell_bytes("state", 8, 100, 100, Vec::new(), &bytes).unwrap()
    }

    #[test]
    fn test_snapshot_projection() {
        let mut ship = Ship::initial();
        ship.fuel = RESOURCE_MAX / 2.0;
        ship.z_velocity = 0.1;
        ship.jump_o_master.velocity_delta = 0.02;
        let snap = GameSnapshot::from_ship(&ship);

        assert_eq!(snap.position, DVec3::new(256.0, 80.0, 3.0));
        assert!((snap.velocity.z - 0.12).abs() < 1e-12);
        assert_eq!(snap.fuel_percent, 0.5);
        assert_eq!(snap.oxygen_percent, 1.0);
        assert_eq!(snap.craft_state, ShipState::Alive);
    }

    #[test]
    fn test_null_controller_ship_stays_put() {
        let mut manager = StateManager::new(level(50, (0x01, 0), None), Box::new(NullController));
        let mut events = Vec::new();
        let mut snap = manager.run_frame(&mut events);
        for _ in 0..30 {
            snap = manager.run_frame(&mut events);
        }
        assert!(events.is_empty());
        assert_eq!(snap.position, DVec3::new(256.0, 80.0, 3.0));
        assert_eq!(manager.ticks(), 31);
        assert_eq!(manager.outcome(), TickOutcome::Running);
    }

    #[test]
    fn test_driving_into_finish_tunnel_wins() {
        // Plain track ending in three tunnel rows
        let lvl = level(12, (0x01, 0), Some((0x01, 0x01)));
        let full_throttle = ControllerState::new(0, 1, false).unwrap().to_demo_byte();
        let demo = DemoController::new(vec![full_throttle; 4096]);
        let mut manager = StateManager::new(lvl, Box::new(demo));

        let mut events: Vec<ShipEvent> = Vec::new();
        for _ in 0..2000 {
            manager.run_frame(&mut events);
            if manager.did_win() {
                break;
            }
        }
        assert!(manager.did_win());
        assert_eq!(manager.outcome(), TickOutcome::Won);
        assert!(manager.ship().z >= 11.5);
        assert!(manager.track_progress() > 0.95);
    }

    #[test]
    fn test_reset_restores_start() {
        let full_throttle = ControllerState::new(0, 1, false).unwrap().to_demo_byte();
        let demo = DemoController::new(vec![full_throttle; 4096]);
        let mut manager = StateManager::new(level(50, (0x01, 0), None), Box::new(demo));
        for _ in 0..20 {
            manager.run_frame(&mut Discard);
        }
        assert!(manager.ship().z > 3.0);

        manager.reset();
        assert_eq!(*manager.ship(), Ship::initial());
        assert_eq!(manager.ticks(), 0);
    }

    #[test]
    fn test_lerp_keeps_newest_flags() {
        let older = GameSnapshot::from_ship(&Ship::initial());
        let mut ship = Ship::initial();
        ship.z = 5.0;
        ship.state = ShipState::Exploded;
        let newer = GameSnapshot::from_ship(&ship);

        let mid = newer.lerp_from(&older, 0.5);
        assert_eq!(mid.position.z, 4.0);
        assert_eq!(mid.craft_state, ShipState::Exploded);
    }
}
