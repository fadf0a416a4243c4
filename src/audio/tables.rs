//! FM chip constant tables
//!
//! Envelope timings are in milliseconds per full ramp, indexed by the
//! effective rate (0..=63). `None` marks rates the chip never completes.

use std::f64::consts::PI;
use std::sync::LazyLock;

use crate::consts::{OPL_SAMPLE_RATE, WAVE_TABLE_SIZE};

/// Duration of one internal synthesis sample
pub const SAMPLE_TIME: f64 = 1.0 / OPL_SAMPLE_RATE;

/// Silence floor of the envelope in dB
pub const VOLUME_MIN: f64 = -96.0;
/// Full volume in dB
pub const VOLUME_MAX: f64 = 0.0;

/// Attack ramp duration (ms) per effective rate
#[rustfmt::skip]
pub const ATTACK_RATES: [Option<f64>; 64] = [
    None, None, None, None,
    Some(2826.24), Some(2252.80), Some(1884.16), Some(1597.44),
    Some(1413.12), Some(1126.40), Some(942.08), Some(798.72),
    Some(706.56), Some(563.20), Some(471.04), Some(399.36),
    Some(353.28), Some(281.60), Some(235.52), Some(199.68),
    Some(176.76), Some(140.80), Some(117.76), Some(99.84),
    Some(88.32), Some(70.40), Some(58.88), Some(49.92),
    Some(44.16), Some(35.20), Some(29.44), Some(24.96),
    Some(22.08), Some(17.60), Some(14.72), Some(12.48),
    Some(11.04), Some(8.8), Some(7.36), Some(6.24),
    Some(5.52), Some(4.40), Some(3.68), Some(3.12),
    Some(2.76), Some(2.20), Some(1.84), Some(1.56),
    Some(1.40), Some(1.12), Some(0.92), Some(0.80),
    Some(0.70), Some(0.56), Some(0.46), Some(0.42),
    Some(0.38), Some(0.30), Some(0.24), Some(0.20),
    Some(0.0), Some(0.0), Some(0.0), Some(0.0),
];

/// Decay and release ramp duration (ms) per effective rate
#[rustfmt::skip]
pub const DECAY_RATES: [Option<f64>; 64] = [
    None, None, None, None,
    Some(39280.64), Some(31416.32), Some(26173.44), Some(22446.08),
    Some(19640.32), Some(15708.16), Some(13086.72), Some(11223.04),
    Some(9820.16), Some(7854.08), Some(6543.36), Some(5611.52),
    Some(4910.08), Some(3927.04), Some(3271.68), Some(2805.76),
    Some(2455.04), Some(1936.52), Some(1635.84), Some(1402.88),
    Some(1227.52), Some(981.76), Some(817.92), Some(701.44),
    Some(613.76), Some(490.88), Some(488.96), Some(350.72),
    Some(306.88), Some(245.44), Some(204.48), Some(175.36),
    Some(153.44), Some(122.72), Some(102.24), Some(87.68),
    Some(76.72), Some(61.36), Some(51.12), Some(43.84),
    Some(38.36), Some(30.68), Some(25.56), Some(21.92),
    Some(19.20), Some(15.36), Some(12.80), Some(10.96),
    Some(9.60), Some(7.68), Some(6.40), Some(5.48),
    Some(4.80), Some(3.84), Some(3.20), Some(2.74),
    Some(2.40), Some(2.40), Some(2.40), Some(2.40),
];

/// Key-scale attenuation (dB) by block and the top four F-number bits
pub const KEY_SCALE_LEVELS: [[f64; 16]; 8] = [
    [0.0; 16],
    [
        0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, //
        0.0, 0.75, 1.125, 1.5, 1.875, 2.25, 2.625, 3.0,
    ],
    [
        0.0, 0.0, 0.0, 0.0, 0.0, 1.875, 3.0, 4.125, //
        4.875, 5.625, 6.0, 6.75, 7.125, 7.5, 7.875, 8.25,
    ],
    [
        0.0, 0.0, 0.0, 1.875, 3.0, 4.125, 4.875, 5.625, //
        6.0, 6.75, 7.125, 7.5, 7.875, 8.25, 8.625, 9.0,
    ],
    [
        0.0, 0.0, 3.0, 4.875, 6.0, 7.125, 7.875, 8.625, //
        9.0, 9.75, 10.125, 10.5, 10.875, 11.25, 11.625, 12.0,
    ],
    [
        0.0, 3.0, 6.0, 7.875, 9.0, 10.125, 10.875, 1.625, //
        12.0, 12.75, 13.125, 13.5, 13.875, 14.25, 14.625, 15.0,
    ],
    [
        0.0, 6.0, 9.0, 10.875, 12.0, 13.125, 13.875, 14.625, //
        15.0, 15.75, 16.125, 16.5, 16.875, 17.25, 17.625, 18.0,
    ],
    [
        0.0, 9.0, 12.0, 13.875, 15.0, 16.125, 16.875, 17.625, //
        18.0, 18.75, 19.125, 19.5, 19.875, 20.25, 20.625, 21.0,
    ],
];

/// Frequency (Hz) of F-number 0 per block
pub const FREQ_STARTS: [f64; 8] = [0.047, 0.094, 0.189, 0.379, 0.758, 1.517, 3.034, 6.068];
/// Frequency (Hz) added per F-number step per block
pub const FREQ_STEPS: [f64; 8] = [0.048, 0.095, 0.190, 0.379, 0.759, 1.517, 3.034, 6.069];

/// Scale applied to the key-scale table by the 2-bit KSL code
pub const KEY_SCALE_MULTIPLIERS: [f64; 4] = [0.0, 1.0, 0.5, 2.0];

/// F-numbers for the twelve semitones of an octave
pub const NOTE_FNUMS: [u16; 12] = [
    0x0AC, 0x0B6, 0x0C1, 0x0CD, 0x0D9, 0x0E6, 0x0F3, 0x102, 0x111, 0x122, 0x133, 0x145,
];

pub type WaveTable = [f64; WAVE_TABLE_SIZE];

/// The eight operator waveforms, indexed by 3-bit waveform code
pub static WAVES: LazyLock<[WaveTable; 8]> = LazyLock::new(build_waves);

fn build_waves() -> [WaveTable; 8] {
    let mut waves = [[0.0; WAVE_TABLE_SIZE]; 8];
    for i in 0..WAVE_TABLE_SIZE {
        let angle = 2.0 * PI * i as f64 / WAVE_TABLE_SIZE as f64;
        let s = angle.sin();
        let square = if s > 0.0 { 1.0 } else { 0.0 };

        waves[0][i] = s;
        waves[1][i] = s.max(0.0);
        waves[2][i] = s.abs();
        waves[3][i] = if angle % 6.28 < 1.57 { s } else { 0.0 };
        waves[4][i] = if angle % 12.56 < 6.28 { s } else { 0.0 };
        waves[5][i] = if angle % 12.56 < 6.28 { s.abs() } else { 0.0 };
        waves[6][i] = square;
        waves[7][i] = square;
    }
    waves
}
