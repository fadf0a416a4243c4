//! Music and sound effects
//!
//! Everything here runs on the audio callback path except [`MusicHandle`],
//! which is the only way the game thread talks to the music.

pub mod handoff;
pub mod mixer;
pub mod opl;
pub mod player;
pub mod tables;

pub use handoff::MusicHandle;
pub use mixer::{AudioSource, Mixer, OneShot, SoundBank, SoundEffect, effect_index};
pub use opl::{Chip, KeyState, NoteSource, Opl, OscDesc, OscState, Synth, Waveform};
pub use player::{Instrument, Player, Song, SongBank, SongError, SongEvent, SongHeader};
