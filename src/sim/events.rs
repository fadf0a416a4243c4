//! Ship events
//!
//! The ship reports discrete happenings (bounces, wall hits, explosions,
//! refills) through a closed set of variants. Consumers match on the variant
//! and map it to a sound effect or any other reaction.

use serde::{Deserialize, Serialize};

/// Something the ship did during a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShipEvent {
    /// Landed hard enough to rebound
    Bounced,
    /// Hit a wall without being destroyed
    BumpedWall,
    /// Destroyed by a collision or a kill tile
    Exploded,
    /// Fuel and oxygen topped up from a noticeably low level
    Refilled,
}

/// Receiver for ship events, invoked synchronously during the tick
pub trait EventSink {
    fn emit(&mut self, event: ShipEvent);
}

impl EventSink for Vec<ShipEvent> {
    fn emit(&mut self, event: ShipEvent) {
        self.push(event);
    }
}

/// Sink that drops everything (used for look-ahead simulations)
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl EventSink for Discard {
    fn emit(&mut self, _event: ShipEvent) {}
}
