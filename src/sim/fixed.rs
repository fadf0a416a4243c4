//! Fixed-point truncation helpers
//!
//! Positions and velocities are stored as `f64` but must land on the DOS
//! game's integer grids: 1/128 units for x/y (8.7-style) and 1/65536 units
//! for z (16.16). Each helper is one specific truncation; callers apply them
//! in a fixed order so recorded demos replay the same way.

/// 1/128 unit scale used by x/y positions and velocities
pub const SCALE_16: f64 = 128.0;
/// 1/65536 unit scale used by z positions and velocities
pub const SCALE_32: f64 = 65536.0;

/// Floor onto the 16.16 grid
#[inline]
pub fn round32(n: f64) -> f64 {
    (n * SCALE_32).floor() / SCALE_32
}

/// Floor onto the 1/128 grid
#[inline]
pub fn round16(n: f64) -> f64 {
    (n * SCALE_16).floor() / SCALE_16
}

/// Truncate toward zero (sign-magnitude floor)
#[inline]
pub fn s_floor(n: f64) -> f64 {
    n.trunc()
}

/// Round half toward positive infinity
/// (`f64::round` rounds half away from zero, which differs for negatives).
#[inline]
pub fn round_half_up(n: f64) -> f64 {
    let f = n.floor();
    if n - f >= 0.5 { f + 1.0 } else { f }
}

/// Snap to the nearest point of a grid with `scale` steps per unit
#[inline]
pub fn snap(n: f64, scale: f64) -> f64 {
    round_half_up(n * scale) / scale
}

/// Per-tick depletion `numerator / denominator` with a zero-denominator guard.
///
/// A zero level constant means "drains instantly" while anything is being
/// consumed and "never drains" otherwise, instead of producing NaN.
#[inline]
pub fn depletion(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        if numerator > 0.0 { f64::INFINITY } else { 0.0 }
    } else {
        numerator / denominator
    }
}
