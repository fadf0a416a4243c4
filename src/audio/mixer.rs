//! Sound effect playback and output mixing

use std::sync::Arc;

use super::handoff::MusicHandle;
use super::opl::Opl;
use crate::settings::Settings;
use crate::sim::ShipEvent;

/// Rate of the raw effect samples
pub const EFFECT_SOURCE_RATE: u32 = 8000;

/// Anything that can render mono samples into a caller-owned buffer
pub trait AudioSource {
    /// Returns `false` once the source has nothing more to play
    fn fill(&mut self, buffer: &mut [f32]) -> bool;
}

impl AudioSource for Opl {
    fn fill(&mut self, buffer: &mut [f32]) -> bool {
        self.fill_audio_buffer(buffer)
    }
}

/// A sampled effect resampled to the output rate
#[derive(Debug, Clone)]
pub struct SoundEffect {
    samples: Arc<[f32]>,
}

impl SoundEffect {
    /// Convert unsigned 8-bit 8 kHz samples, picking the nearest earlier
    /// source sample for each output sample
    pub fn from_pcm_u8(bytes: &[u8], output_rate: u32) -> Self {
        let len = bytes.len();
        let scaled_len = (len as u64 * output_rate as u64 / EFFECT_SOURCE_RATE as u64) as usize;
        let samples = (0..scaled_len)
            .map(|i| {
                let src = bytes[i * len / scaled_len];
                (src as f32 - 127.0) / 128.0
            })
            .collect();
        Self { samples }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn play(&self) -> OneShot {
        OneShot {
            samples: Arc::clone(&self.samples),
            position: 0,
        }
    }
}

/// Bank index of the effect for a ship event
pub fn effect_index(event: ShipEvent) -> usize {
    match event {
        ShipEvent::Exploded => 0,
        ShipEvent::Bounced => 1,
        ShipEvent::BumpedWall => 2,
        ShipEvent::Refilled => 4,
    }
}

/// Several effects packed in one blob behind a table of u16 start offsets.
///
/// The first offset also marks the end of the table.
#[derive(Debug, Clone, Default)]
pub struct SoundBank {
    effects: Vec<SoundEffect>,
}

impl SoundBank {
    pub fn parse(bytes: &[u8], output_rate: u32) -> Self {
        let word = |offset: usize| {
            bytes
                .get(offset..offset + 2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
        };
        let Some(first) = word(0) else {
            return Self::default();
        };

        let mut starts = vec![first];
        let mut offset = 2;
        while offset < first {
            match word(offset) {
                Some(start) => starts.push(start),
                None => break,
            }
            offset += 2;
        }

        let effects = starts
            .iter()
            .enumerate()
            .map(|(i, &start)| {
                let end = starts.get(i + 1).copied().unwrap_or(bytes.len()).min(bytes.len());
                let start = start.min(end);
                SoundEffect::from_pcm_u8(&bytes[start..end], output_rate)
            })
            .collect::<Vec<_>>();
        log::info!("Loaded sound bank with {} effects", effects.len());
        Self { effects }
    }

    pub fn get(&self, index: usize) -> Option<&SoundEffect> {
        self.effects.get(index)
    }

    pub fn for_event(&self, event: ShipEvent) -> Option<&SoundEffect> {
        self.get(effect_index(event))
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

/// One playback of a [`SoundEffect`]
#[derive(Debug, Clone)]
pub struct OneShot {
    samples: Arc<[f32]>,
    position: usize,
}

impl AudioSource for OneShot {
    fn fill(&mut self, buffer: &mut [f32]) -> bool {
        let start = self.position.min(self.samples.len());
        let end = (start + buffer.len()).min(self.samples.len());
        let copied = end - start;

        buffer[..copied].copy_from_slice(&self.samples[start..end]);
        buffer[copied..].fill(0.0);
        self.position += buffer.len();

        copied == buffer.len() && self.position < self.samples.len()
    }
}

/// Music plus any number of overlapping effects
pub struct Mixer {
    music: Opl,
    effects: Vec<OneShot>,
    effect_gain: f32,
    scratch: Vec<f32>,
}

impl Mixer {
    pub fn new(music: Opl) -> Self {
        Self {
            music,
            effects: Vec::new(),
            effect_gain: 1.0,
            scratch: Vec::new(),
        }
    }

    pub fn music(&self) -> &Opl {
        &self.music
    }

    pub fn music_mut(&mut self) -> &mut Opl {
        &mut self.music
    }

    pub fn set_effect_gain(&mut self, gain: f32) {
        self.effect_gain = gain.max(0.0);
    }

    pub fn effect_gain(&self) -> f32 {
        self.effect_gain
    }

    /// Push volume settings to the mixer and the music thread
    pub fn apply_settings(&mut self, settings: &Settings, music: &MusicHandle) {
        self.set_effect_gain(settings.effective_effect_gain());
        music.set_gain(settings.effective_music_gain());
    }

    pub fn play(&mut self, effect: &SoundEffect) {
        if !effect.is_empty() {
            self.effects.push(effect.play());
        }
    }

    /// Start the effect mapped to `event`, if the bank has one
    pub fn trigger(&mut self, bank: &SoundBank, event: ShipEvent) {
        match bank.for_event(event) {
            Some(effect) => self.play(effect),
            None => log::debug!("No sound for {:?}", event),
        }
    }

    pub fn active_effects(&self) -> usize {
        self.effects.len()
    }
}

impl AudioSource for Mixer {
    /// Always `true`: the mixer runs for as long as the output does
    fn fill(&mut self, out: &mut [f32]) -> bool {
        self.music.fill_audio_buffer(out);

        self.scratch.resize(out.len(), 0.0);
        let scratch = &mut self.scratch;
        let gain = self.effect_gain;
        self.effects.retain_mut(|effect| {
            let more = effect.fill(scratch);
            for (o, s) in out.iter_mut().zip(scratch.iter()) {
                *o += s * gain;
            }
            more
        });

        for o in out.iter_mut() {
            *o = o.clamp(-1.0, 1.0);
        }
        true
    }
}
