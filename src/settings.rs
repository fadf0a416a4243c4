//! User settings and preferences
//!
//! Stored as JSON. The browser build hands the JSON string to the page for
//! storage; the native build reads and writes a file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::consts::OUTPUT_SAMPLE_RATE;

/// Game settings/preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // === Audio ===
    /// Sound effects volume (0.0 - 1.0)
    pub effect_volume: f32,
    /// Music volume (0.0 - 1.0)
    pub music_volume: f32,
    /// Silence everything
    pub muted: bool,
    /// Output rate requested from the audio backend
    pub output_sample_rate: u32,

    // === Presentation ===
    /// Blend between physics ticks instead of showing the last one
    pub interpolate_snapshots: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            effect_volume: 0.5,
            music_volume: 0.5,
            muted: false,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            interpolate_snapshots: true,
        }
    }
}

impl Settings {
    /// Effective music gain (respects mute)
    pub fn effective_music_gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.music_volume.clamp(0.0, 1.0)
        }
    }

    /// Effective effect gain (respects mute)
    pub fn effective_effect_gain(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.effect_volume.clamp(0.0, 1.0)
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Load settings from `path`, falling back to defaults
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(json) => match Self::from_json(&json) {
                Ok(settings) => {
                    log::info!("Loaded settings from {}", path.display());
                    settings
                }
                Err(err) => {
                    log::warn!("Ignoring unreadable settings {}: {}", path.display(), err);
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("Using default settings");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)?;
        log::info!("Settings saved");
        Ok(())
    }
}
