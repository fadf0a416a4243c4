//! Two-operator FM synthesis
//!
//! [`Chip`] holds the fifteen channels and renders one internal sample at
//! 49.7 kHz. [`Opl`] wraps it for a platform output rate: it resamples by
//! holding the last internal sample and calls the attached [`NoteSource`]
//! every 5 ms of output time.
//!
//! Volumes are kept in dB until the very end of each operator, where they
//! are converted to linear gain.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use super::tables::{
    ATTACK_RATES, DECAY_RATES, FREQ_STARTS, FREQ_STEPS, KEY_SCALE_LEVELS, KEY_SCALE_MULTIPLIERS,
    SAMPLE_TIME, VOLUME_MAX, VOLUME_MIN, WAVES, WaveTable,
};
use crate::consts::{NOTE_TICK_RATE, OUTPUT_SAMPLE_RATE, SYNTH_CHANNELS, WAVE_TABLE_SIZE};

/// Highest block number the frequency tables cover
const MAX_BLOCK: u8 = 7;
/// Phase scale of the modulator path (dB units per full wave)
const MODULATION_SCALE: f64 = 2.0 * PI * 65536.0 / (1024.0 * 16.0);

/// Operator waveform, selected by a 3-bit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Waveform {
    #[default]
    Sine,
    HalfSine,
    AbsSine,
    PulseSine,
    SineEven,
    AbsSineEven,
    Square,
    DerivedSquare,
}

impl Waveform {
    pub fn from_code(code: u8) -> Self {
        match code & 7 {
            0 => Waveform::Sine,
            1 => Waveform::HalfSine,
            2 => Waveform::AbsSine,
            3 => Waveform::PulseSine,
            4 => Waveform::SineEven,
            5 => Waveform::AbsSineEven,
            6 => Waveform::Square,
            _ => Waveform::DerivedSquare,
        }
    }

    pub fn table(self) -> &'static WaveTable {
        &WAVES[self as usize]
    }
}

/// Envelope phase of one operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyState {
    #[default]
    Off,
    Attack,
    Sustain,
    Decay,
    Release,
}

/// Operator configuration as loaded from an instrument record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OscDesc {
    pub tremolo: bool,
    pub vibrato: bool,
    /// Hold at the sustain level until released
    pub sound_sustaining: bool,
    /// Key-scale rate: envelope speeds up fully with pitch
    pub key_scaling: bool,
    /// Frequency multiplier (0 means one half)
    pub multiplication: u8,
    /// 2-bit key-scale level code
    pub key_scale_level: u8,
    /// Output attenuation in dB
    pub output_level: f64,
    pub attack_rate: u8,
    pub decay_rate: u8,
    /// Sustain level in dB (0 down to -45)
    pub sustain_level: f64,
    pub release_rate: u8,
    pub waveform: Waveform,
}

impl Default for OscDesc {
    fn default() -> Self {
        Self {
            tremolo: false,
            vibrato: false,
            sound_sustaining: true,
            key_scaling: false,
            multiplication: 1,
            key_scale_level: 0,
            output_level: 1.0,
            attack_rate: 0,
            decay_rate: 0,
            sustain_level: 0.0,
            release_rate: 0,
            waveform: Waveform::Sine,
        }
    }
}

/// Live state of one operator
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OscState {
    pub config: OscDesc,
    pub state: KeyState,
    /// Envelope volume in dB
    pub volume: f64,
    pub envelope_step: u32,
    /// Phase accumulator in radians
    pub angle: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    a: OscState,
    b: OscState,
    additive: bool,
    freq_num: u16,
    block_num: u8,
    output0: f64,
    output1: f64,
    m1: f64,
    m2: f64,
    feedback_factor: f64,
}

/// Self-modulation gain of operator A for a 3-bit feedback code
pub fn feedback_factor(feedback: u8) -> f64 {
    if feedback > 0 {
        2.0f64.powi(feedback as i32 + 8)
    } else {
        0.0
    }
}

/// Receiver of sequencer commands
pub trait Synth {
    fn set_channel_config(&mut self, n: usize, a: OscDesc, b: OscDesc, additive: bool, feedback: u8);
    fn start_note(&mut self, channel: usize, freq_num: u16, block_num: u8);
    fn stop_note(&mut self, channel: usize);
    /// Set operator B's output level (dB)
    fn set_channel_volume(&mut self, n: usize, volume: f64);
}

/// Producer of note events, polled once per sequencer tick
pub trait NoteSource {
    fn read_note(&mut self, synth: &mut dyn Synth);
    /// Linear output gain applied to the synthesized signal
    fn gain(&self) -> f32;
}

/// The bank of synthesis channels
#[derive(Debug, Clone)]
pub struct Chip {
    channels: [Channel; SYNTH_CHANNELS],
    /// Seconds since creation (drives vibrato and tremolo)
    time: f64,
}

impl Default for Chip {
    fn default() -> Self {
        Self::new()
    }
}

impl Chip {
    pub fn new() -> Self {
        Self {
            channels: [Channel::default(); SYNTH_CHANNELS],
            time: 0.0,
        }
    }

    /// Operator state: `op` 0 is A (modulator), 1 is B (carrier)
    pub fn operator(&self, channel: usize, op: usize) -> Option<&OscState> {
        let chan = self.channels.get(channel)?;
        match op {
            0 => Some(&chan.a),
            1 => Some(&chan.b),
            _ => None,
        }
    }

    pub fn advance_time(&mut self, dt: f64) {
        self.time += dt;
    }

    /// Render one internal sample: the sum of all channels
    pub fn render_sample(&mut self) -> f64 {
        let time = self.time;
        self.channels
            .iter_mut()
            .map(|c| process_channel(c, time))
            .sum()
    }
}

impl Synth for Chip {
    fn set_channel_config(&mut self, n: usize, a: OscDesc, b: OscDesc, additive: bool, feedback: u8) {
        let Some(chan) = self.channels.get_mut(n) else {
            return;
        };
        chan.a.config = a;
        chan.b.config = b;
        chan.additive = additive;
        chan.feedback_factor = feedback_factor(feedback);
        chan.m2 = MODULATION_SCALE;
        chan.m1 = MODULATION_SCALE / 2.0 / 65536.0;
    }

    fn start_note(&mut self, channel: usize, freq_num: u16, block_num: u8) {
        let Some(chan) = self.channels.get_mut(channel) else {
            return;
        };
        let block_num = block_num.min(MAX_BLOCK);
        let same_note = chan.freq_num == freq_num && chan.block_num == block_num;
        for osc in [&mut chan.a, &mut chan.b] {
            if same_note && osc.state == KeyState::Sustain {
                continue;
            }
            osc.state = KeyState::Attack;
            osc.envelope_step = 0;
        }
        chan.freq_num = freq_num;
        chan.block_num = block_num;
    }

    fn stop_note(&mut self, channel: usize) {
        let Some(chan) = self.channels.get_mut(channel) else {
            return;
        };
        for osc in [&mut chan.a, &mut chan.b] {
            if osc.state != KeyState::Off {
                osc.state = KeyState::Release;
                osc.envelope_step = 0;
            }
        }
    }

    fn set_channel_volume(&mut self, n: usize, volume: f64) {
        if let Some(chan) = self.channels.get_mut(n) {
            chan.b.config.output_level = volume;
        }
    }
}

fn process_channel(c: &mut Channel, time: f64) -> f64 {
    let feedback = (c.output0 + c.output1) * c.feedback_factor * c.m1;
    let a = process_osc(&mut c.a, c.freq_num, c.block_num, feedback, time);
    let b = if c.additive {
        process_osc(&mut c.b, c.freq_num, c.block_num, 0.0, time)
    } else {
        process_osc(&mut c.b, c.freq_num, c.block_num, a * c.m2, time)
    };
    c.output1 = c.output0;
    c.output0 = a;

    if c.additive { a + b } else { b }
}

/// Number of internal samples a ramp of `ms` milliseconds takes
fn ramp_steps(ms: f64) -> u32 {
    (ms / 1000.0 / SAMPLE_TIME).floor() as u32
}

/// Advance the envelope one internal sample
fn step_envelope(osc: &mut OscState, freq_num: u16, block_num: u8) {
    let conf = osc.config;
    let key_scale_num = block_num as u32 * 2 + (freq_num as u32 >> 7);
    let rof = if conf.key_scaling {
        key_scale_num
    } else {
        key_scale_num / 4
    };
    let rate = |n: u8| -> usize {
        let r = if n > 0 { rof + n as u32 * 4 } else { 0 };
        r.min(63) as usize
    };

    match osc.state {
        KeyState::Off => {}
        KeyState::Attack => match ATTACK_RATES[rate(conf.attack_rate)] {
            None => osc.state = KeyState::Off,
            Some(ms) if ms == 0.0 => {
                osc.volume = VOLUME_MAX;
                osc.envelope_step = 0;
                osc.state = KeyState::Decay;
            }
            Some(ms) => {
                let steps = ramp_steps(ms);
                let remaining = (steps as f64 - osc.envelope_step as f64) / steps as f64;
                osc.volume = VOLUME_MIN * remaining.powi(3);
                osc.envelope_step += 1;
                if osc.envelope_step >= steps {
                    osc.envelope_step = 0;
                    osc.volume = VOLUME_MAX;
                    osc.state = KeyState::Decay;
                }
            }
        },
        KeyState::Decay => match DECAY_RATES[rate(conf.decay_rate)] {
            // Never decays; holds full volume
            None => {}
            Some(ms) if ramp_steps(ms) == 0 => {
                osc.volume = conf.sustain_level;
                osc.envelope_step = 0;
                osc.state = KeyState::Sustain;
            }
            Some(ms) => {
                let steps = ramp_steps(ms);
                osc.volume += conf.sustain_level / steps as f64;
                osc.envelope_step += 1;
                if osc.envelope_step >= steps {
                    osc.envelope_step = 0;
                    osc.state = KeyState::Sustain;
                }
            }
        },
        KeyState::Sustain => {
            if !conf.sound_sustaining {
                osc.state = KeyState::Release;
            }
        }
        KeyState::Release => {
            let steps = DECAY_RATES[rate(conf.release_rate)].map_or(0, ramp_steps);
            if steps == 0 {
                osc.volume = VOLUME_MIN;
                osc.state = KeyState::Off;
            } else {
                osc.volume += (VOLUME_MIN - conf.sustain_level) / steps as f64;
                osc.envelope_step += 1;
                if osc.envelope_step >= steps {
                    osc.volume = VOLUME_MIN;
                    osc.state = KeyState::Off;
                }
            }
        }
    }
}

fn process_osc(osc: &mut OscState, freq_num: u16, block_num: u8, modulator: f64, time: f64) -> f64 {
    if osc.state == KeyState::Off {
        return 0.0;
    }

    step_envelope(osc, freq_num, block_num);
    let conf = &osc.config;
    let block = block_num.min(MAX_BLOCK) as usize;

    let ks_damping = if conf.key_scale_level > 0 {
        let multiplier = KEY_SCALE_MULTIPLIERS[(conf.key_scale_level & 3) as usize];
        -multiplier * KEY_SCALE_LEVELS[block][((freq_num >> 6) as usize).min(15)]
    } else {
        0.0
    };

    let mut freq = FREQ_STARTS[block] + FREQ_STEPS[block] * freq_num as f64;
    freq *= if conf.multiplication == 0 {
        0.5
    } else {
        conf.multiplication as f64
    };

    let vibrato = if conf.vibrato {
        (time * 2.0 * PI).cos() * 0.00004 + 1.0
    } else {
        1.0
    };
    osc.angle += SAMPLE_TIME * 2.0 * PI * freq * vibrato;

    let phase = (osc.angle + modulator).abs() % (2.0 * PI);
    let idx = ((phase * WAVE_TABLE_SIZE as f64 / 2.0 / PI).floor() as usize).min(WAVE_TABLE_SIZE - 1);
    let wave = conf.waveform.table()[idx];

    let tremolo = if conf.tremolo {
        (time * PI * 3.7).cos().abs()
    } else {
        0.0
    };
    wave * 10f64.powf((osc.volume + conf.output_level + tremolo + ks_damping) / 10.0)
}

/// FM engine paced for a platform output rate
pub struct Opl {
    chip: Chip,
    source: Option<Box<dyn NoteSource + Send>>,
    sample_rate: f64,
    time_since_note: f64,
    synth_time: f64,
}

impl Default for Opl {
    fn default() -> Self {
        Self::new(OUTPUT_SAMPLE_RATE)
    }
}

impl Opl {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            chip: Chip::new(),
            source: None,
            sample_rate: sample_rate.max(1) as f64,
            time_since_note: 0.0,
            synth_time: 0.0,
        }
    }

    /// Attach (or detach) the note source; silences every channel
    pub fn set_source(&mut self, source: Option<Box<dyn NoteSource + Send>>) {
        self.source = source;
        for i in 0..SYNTH_CHANNELS {
            self.chip.stop_note(i);
        }
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn chip(&self) -> &Chip {
        &self.chip
    }

    /// Fill `buffer` with mono samples at the output rate.
    ///
    /// Writes silence when no source is attached. Always reports more audio
    /// pending: music never finishes on its own.
    pub fn fill_audio_buffer(&mut self, buffer: &mut [f32]) -> bool {
        let Some(source) = self.source.as_mut() else {
            buffer.fill(0.0);
            return true;
        };

        let gain = source.gain();
        let dt = 1.0 / self.sample_rate;
        let mut synth_out = 0.0;

        for sample in buffer.iter_mut() {
            self.time_since_note += dt;
            if self.time_since_note > NOTE_TICK_RATE {
                source.read_note(&mut self.chip);
                self.time_since_note -= NOTE_TICK_RATE;
            }

            self.chip.advance_time(dt);
            self.synth_time += dt;
            while self.synth_time >= SAMPLE_TIME {
                synth_out = self.chip.render_sample();
                self.synth_time -= SAMPLE_TIME;
            }

            *sample = (synth_out / 2.0) as f32 * gain;
        }
        true
    }
}

impl Synth for Opl {
    fn set_channel_config(&mut self, n: usize, a: OscDesc, b: OscDesc, additive: bool, feedback: u8) {
        self.chip.set_channel_config(n, a, b, additive, feedback);
    }

    fn start_note(&mut self, channel: usize, freq_num: u16, block_num: u8) {
        self.chip.start_note(channel, freq_num, block_num);
    }

    fn stop_note(&mut self, channel: usize) {
        self.chip.stop_note(channel);
    }

    fn set_channel_volume(&mut self, n: usize, volume: f64) {
        self.chip.set_channel_volume(n, volume);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant_attack() -> OscDesc {
        OscDesc {
            attack_rate: 15,
            decay_rate: 15,
            release_rate: 15,
            sustain_level: -12.0,
            ..OscDesc::default()
        }
    }

    /// Plays one sustained note on channel 0 on its first tick
    struct OneNote {
        started: bool,
    }

    impl NoteSource for OneNote {
        fn read_note(&mut self, synth: &mut dyn Synth) {
            if !self.started {
                synth.set_channel_config(0, instant_attack(), instant_attack(), false, 3);
                synth.start_note(0, 0x15B, 4);
                self.started = true;
            }
        }

        fn gain(&self) -> f32 {
            1.0
        }
    }

    fn states(chip: &Chip, channel: usize) -> (KeyState, KeyState) {
        (
            chip.operator(channel, 0).map(|o| o.state).unwrap(),
            chip.operator(channel, 1).map(|o| o.state).unwrap(),
        )
    }

    #[test]
    fn test_silence_without_source() {
        let mut opl = Opl::default();
        let mut buffer = [1.0f32; 256];
        assert!(opl.fill_audio_buffer(&mut buffer));
        assert!(buffer.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_start_then_stop_releases_both_operators() {
        let mut chip = Chip::new();
        chip.set_channel_config(2, instant_attack(), instant_attack(), false, 0);
        chip.start_note(2, 0x102, 4);
        assert_eq!(states(&chip, 2), (KeyState::Attack, KeyState::Attack));
        chip.stop_note(2);
        assert_eq!(states(&chip, 2), (KeyState::Release, KeyState::Release));
    }

    #[test]
    fn test_stop_leaves_silent_operators_off() {
        let mut chip = Chip::new();
        chip.stop_note(0);
        assert_eq!(states(&chip, 0), (KeyState::Off, KeyState::Off));
    }

    #[test]
    fn test_zero_attack_rate_turns_operator_off() {
        let mut chip = Chip::new();
        let dead = OscDesc {
            attack_rate: 0,
            ..OscDesc::default()
        };
        chip.set_channel_config(0, dead, dead, false, 0);
        chip.start_note(0, 0x15B, 4);
        chip.render_sample();
        assert_eq!(states(&chip, 0), (KeyState::Off, KeyState::Off));
    }

    #[test]
    fn test_envelope_runs_attack_decay_sustain_release() {
        let mut chip = Chip::new();
        chip.set_channel_config(0, instant_attack(), instant_attack(), false, 0);
        chip.start_note(0, 0x15B, 4);

        // Instant attack lands straight in decay at full volume
        chip.render_sample();
        assert_eq!(states(&chip, 0).1, KeyState::Decay);
        assert_eq!(chip.operator(0, 1).unwrap().volume, VOLUME_MAX);

        // Fastest decay: 2.4 ms worth of internal samples
        for _ in 0..ramp_steps(2.40) {
            chip.render_sample();
        }
        assert_eq!(states(&chip, 0).1, KeyState::Sustain);
        assert!((chip.operator(0, 1).unwrap().volume + 12.0).abs() < 1e-9);

        chip.stop_note(0);
        for _ in 0..=ramp_steps(2.40) {
            chip.render_sample();
        }
        assert_eq!(states(&chip, 0), (KeyState::Off, KeyState::Off));
        assert_eq!(chip.render_sample(), 0.0);
    }

    #[test]
    fn test_non_sustaining_operator_releases_itself() {
        let mut chip = Chip::new();
        let pluck = OscDesc {
            sound_sustaining: false,
            ..instant_attack()
        };
        chip.set_channel_config(0, pluck, pluck, false, 0);
        chip.start_note(0, 0x15B, 4);
        for _ in 0..(ramp_steps(2.40) + 2) {
            chip.render_sample();
        }
        assert_eq!(states(&chip, 0).1, KeyState::Release);
    }

    #[test]
    fn test_restart_same_note_keeps_sustain() {
        let mut chip = Chip::new();
        chip.set_channel_config(0, instant_attack(), instant_attack(), false, 0);
        chip.start_note(0, 0x15B, 4);
        for _ in 0..(ramp_steps(2.40) + 1) {
            chip.render_sample();
        }
        assert_eq!(states(&chip, 0).1, KeyState::Sustain);

        chip.start_note(0, 0x15B, 4);
        assert_eq!(states(&chip, 0).1, KeyState::Sustain);
        chip.start_note(0, 0x102, 4);
        assert_eq!(states(&chip, 0).1, KeyState::Attack);
    }

    #[test]
    fn test_out_of_range_channels_are_ignored() {
        let mut chip = Chip::new();
        chip.set_channel_config(SYNTH_CHANNELS, instant_attack(), instant_attack(), true, 7);
        chip.start_note(40, 0x15B, 4);
        chip.stop_note(40);
        chip.set_channel_volume(99, -3.0);
        assert!(chip.operator(SYNTH_CHANNELS, 0).is_none());
    }

    #[test]
    fn test_feedback_factor() {
        assert_eq!(feedback_factor(0), 0.0);
        assert_eq!(feedback_factor(1), 512.0);
        assert_eq!(feedback_factor(7), 32768.0);
    }

    #[test]
    fn test_source_produces_sound() {
        let mut opl = Opl::new(44100);
        opl.set_source(Some(Box::new(OneNote { started: false })));
        let mut buffer = vec![0.0f32; 2048];
        assert!(opl.fill_audio_buffer(&mut buffer));

        // Nothing plays before the first sequencer tick (5 ms)
        assert!(buffer[..200].iter().all(|&s| s == 0.0));
        assert!(buffer[300..].iter().any(|&s| s.abs() > 1e-3));
        assert!(buffer.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_detaching_source_silences_output() {
        let mut opl = Opl::new(44100);
        opl.set_source(Some(Box::new(OneNote { started: false })));
        let mut buffer = vec![0.0f32; 1024];
        opl.fill_audio_buffer(&mut buffer);

        opl.set_source(None);
        assert!(!opl.has_source());
        opl.fill_audio_buffer(&mut buffer);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }
}
