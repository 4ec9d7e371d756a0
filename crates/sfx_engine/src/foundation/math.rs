//! Math utilities and types
//!
//! Listener and emitter positions live in the 2D world plane.

pub use nalgebra::Vector2;

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// Linear interpolation between `a` and `b`
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    (b - a).mul_add(t, a)
}

/// Clamp to `[0, 1]`, mapping NaN to 0
#[inline]
pub fn saturate(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Convert decibels to a linear gain factor
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert a pitch offset in cents to a playback-rate multiplier
#[inline]
pub fn cents_to_rate(cents: f32) -> f32 {
    2.0_f32.powf(cents / 1200.0)
}
