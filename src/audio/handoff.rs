//! Lock-free control of the music thread
//!
//! The game thread writes requests into a [`MusicHandle`]; the sequencer
//! reads them on its next tick. Nothing here blocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

const NO_SONG: i32 = -1;

#[derive(Debug)]
struct Shared {
    song: AtomicI32,
    /// Bumped on every request so repeating a request is still seen
    requests: AtomicU32,
    /// `f32` bit pattern
    gain: AtomicU32,
}

/// Clonable handle shared between the game and audio threads
#[derive(Debug, Clone)]
pub struct MusicHandle {
    shared: Arc<Shared>,
}

impl Default for MusicHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl MusicHandle {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                song: AtomicI32::new(NO_SONG),
                requests: AtomicU32::new(0),
                gain: AtomicU32::new(1.0f32.to_bits()),
            }),
        }
    }

    /// Ask the player to switch to `song`, or to go silent with `None`
    pub fn request_song(&self, song: Option<usize>) {
        let raw = song
            .and_then(|s| i32::try_from(s).ok())
            .unwrap_or(NO_SONG);
        self.shared.song.store(raw, Ordering::Release);
        self.shared.requests.fetch_add(1, Ordering::Release);
    }

    /// Number of requests made so far, wrapping
    pub fn request_serial(&self) -> u32 {
        self.shared.requests.load(Ordering::Acquire)
    }

    pub fn requested_song(&self) -> Option<usize> {
        usize::try_from(self.shared.song.load(Ordering::Acquire)).ok()
    }

    /// Set the linear music gain; negative and NaN values mean silence
    pub fn set_gain(&self, gain: f32) {
        let gain = if gain.is_nan() { 0.0 } else { gain.max(0.0) };
        self.shared.gain.store(gain.to_bits(), Ordering::Release);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.shared.gain.load(Ordering::Acquire))
    }
}
