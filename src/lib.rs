//! Open Roads - ship physics and FM music core for a 1990s track-racing game
//!
//! Core modules:
//! - `sim`: Deterministic fixed-point simulation (level geometry, ship, driver)
//! - `audio`: Two-operator FM synthesis, song sequencer and effect mixing
//! - `settings`: User configuration (volumes, output rate)
//! - `progress`: Per-level win counters

pub mod audio;
pub mod progress;
pub mod settings;
pub mod sim;

#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub use progress::Progress;
pub use settings::Settings;

/// Game configuration constants
pub mod consts {
    /// Fixed physics timestep (30 Hz, as the DOS game ran)
    pub const PHYSICS_DT: f64 = 1.0 / 30.0;
    /// Maximum physics ticks per frame to prevent spiral of death
    pub const MAX_SUBSTEPS: u32 = 4;
    /// Wall-clock delta clamp (resume from background)
    pub const MAX_FRAME_DELTA: f64 = 0.25;

    /// Full fuel/oxygen tank
    pub const RESOURCE_MAX: f64 = 0x7530 as f64;
    /// Refills below this level fire a refill event
    pub const REFILL_EVENT_THRESHOLD: f64 = 0x6978 as f64;

    /// Internal synthesis rate of the FM chip
    pub const OPL_SAMPLE_RATE: f64 = 49700.0;
    /// Sequencer tick period in seconds
    pub const NOTE_TICK_RATE: f64 = 5.0 / 1000.0;
    /// Default platform output rate
    pub const OUTPUT_SAMPLE_RATE: u32 = 44100;
    /// Entries per waveform lookup table
    pub const WAVE_TABLE_SIZE: usize = 1024;
    /// Melodic + drum channels
    pub const SYNTH_CHANNELS: usize = 15;
}
