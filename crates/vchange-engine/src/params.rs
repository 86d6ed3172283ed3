//! Effect parameter set and partial updates.
//!
//! `EffectParameters` is an immutable value: every change goes through
//! [`EffectParameters::merged`], which clamps each field into its range and
//! returns a fresh instance.

use serde::{Deserialize, Serialize};

pub const PITCH_MIN: f32 = -12.0;
pub const PITCH_MAX: f32 = 12.0;

/// 0 Hz means the highpass is bypassed.
pub const HIGH_PASS_MIN: f32 = 0.0;
pub const HIGH_PASS_MAX: f32 = 2000.0;

/// 22 kHz means the lowpass is bypassed.
pub const LOW_PASS_MIN: f32 = 500.0;
pub const LOW_PASS_MAX: f32 = 22000.0;

pub const ROOM_SIZE_MIN: f32 = 0.0;
pub const ROOM_SIZE_MAX: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectParameters {
    pitch_semitones: f32,
    high_pass_hz: f32,
    low_pass_hz: f32,
    reverb_on: bool,
    room_size: f32,
    chorus_on: bool,
    delay_on: bool,
}

impl Default for EffectParameters {
    fn default() -> Self {
        Self {
            pitch_semitones: 0.0,
            high_pass_hz: HIGH_PASS_MIN,
            low_pass_hz: LOW_PASS_MAX,
            reverb_on: false,
            room_size: 0.0,
            chorus_on: false,
            delay_on: false,
        }
    }
}

impl EffectParameters {
    pub fn pitch_semitones(&self) -> f32 { self.pitch_semitones }
    pub fn high_pass_hz(&self) -> f32 { self.high_pass_hz }
    pub fn low_pass_hz(&self) -> f32 { self.low_pass_hz }
    pub fn reverb_on(&self) -> bool { self.reverb_on }
    pub fn room_size(&self) -> f32 { self.room_size }
    pub fn chorus_on(&self) -> bool { self.chorus_on }
    pub fn delay_on(&self) -> bool { self.delay_on }

    /// Apply the fields present in `update` on top of `self`, clamping each
    /// numeric field into its documented range. NaN falls back to the
    /// current value.
    pub fn merged(&self, update: &ParameterUpdate) -> Self {
        Self {
            pitch_semitones: clamp_or(update.pitch, self.pitch_semitones, PITCH_MIN, PITCH_MAX),
            high_pass_hz: clamp_or(update.high_pass, self.high_pass_hz, HIGH_PASS_MIN, HIGH_PASS_MAX),
            low_pass_hz: clamp_or(update.low_pass, self.low_pass_hz, LOW_PASS_MIN, LOW_PASS_MAX),
            reverb_on: update.reverb_on.unwrap_or(self.reverb_on),
            room_size: clamp_or(update.room_size, self.room_size, ROOM_SIZE_MIN, ROOM_SIZE_MAX),
            chorus_on: update.chorus_on.unwrap_or(self.chorus_on),
            delay_on: update.delay_on.unwrap_or(self.delay_on),
        }
    }
}

fn clamp_or(value: Option<f32>, current: f32, min: f32, max: f32) -> f32 {
    match value {
        Some(v) if !v.is_nan() => v.clamp(min, max),
        _ => current,
    }
}

/// A partial parameter change. `None` leaves the field untouched.
///
/// Field names match the preset record so a preset maps onto an update
/// one-to-one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterUpdate {
    pub pitch: Option<f32>,
    pub high_pass: Option<f32>,
    pub low_pass: Option<f32>,
    pub reverb_on: Option<bool>,
    pub room_size: Option<f32>,
    pub chorus_on: Option<bool>,
    pub delay_on: Option<bool>,
}

impl ParameterUpdate {
    pub fn pitch(semitones: f32) -> Self {
        Self { pitch: Some(semitones), ..Self::default() }
    }

    pub fn reverb(on: bool, room_size: f32) -> Self {
        Self { reverb_on: Some(on), room_size: Some(room_size), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_bypass_values() {
        let p = EffectParameters::default();
        assert_eq!(p.pitch_semitones(), 0.0);
        assert_eq!(p.high_pass_hz(), 0.0);
        assert_eq!(p.low_pass_hz(), 22000.0);
        assert!(!p.reverb_on() && !p.chorus_on() && !p.delay_on());
    }

    #[test]
    fn out_of_range_pitch_is_clamped() {
        let p = EffectParameters::default().merged(&ParameterUpdate::pitch(50.0));
        assert_eq!(p.pitch_semitones(), 12.0);
        let p = p.merged(&ParameterUpdate::pitch(-40.0));
        assert_eq!(p.pitch_semitones(), -12.0);
    }

    #[test]
    fn every_numeric_field_is_clamped() {
        let update = ParameterUpdate {
            high_pass: Some(-10.0),
            low_pass: Some(100.0),
            room_size: Some(3.0),
            ..ParameterUpdate::default()
        };
        let p = EffectParameters::default().merged(&update);
        assert_eq!(p.high_pass_hz(), 0.0);
        assert_eq!(p.low_pass_hz(), 500.0);
        assert_eq!(p.room_size(), 1.0);
    }

    #[test]
    fn merge_keeps_fields_not_in_update() {
        let base = EffectParameters::default().merged(&ParameterUpdate::reverb(true, 0.4));
        let p = base.merged(&ParameterUpdate::pitch(3.0));
        assert!(p.reverb_on());
        assert_eq!(p.room_size(), 0.4);
        assert_eq!(p.pitch_semitones(), 3.0);
    }

    #[test]
    fn nan_is_ignored() {
        let p = EffectParameters::default().merged(&ParameterUpdate::pitch(f32::NAN));
        assert_eq!(p.pitch_semitones(), 0.0);
    }
}
