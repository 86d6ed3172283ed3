use crate::dsp::{Chorus, Delay, Effect, Filter, PitchShift, Reverb};
use crate::params::{EffectParameters, HIGH_PASS_MIN, LOW_PASS_MAX};

/// Scale between i16 samples and the float working domain. Used in both
/// directions so an untouched sample survives the round trip exactly.
pub const SAMPLE_SCALE: f32 = 32767.0;

/// Stage identifiers, in the order they are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageKind {
    Highpass,
    Lowpass,
    PitchShift,
    Reverb,
    Chorus,
    Delay,
}

impl StageKind {
    pub const ORDER: [StageKind; 6] = [
        StageKind::Highpass,
        StageKind::Lowpass,
        StageKind::PitchShift,
        StageKind::Reverb,
        StageKind::Chorus,
        StageKind::Delay,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Highpass => "highpass",
            StageKind::Lowpass => "lowpass",
            StageKind::PitchShift => "pitch_shift",
            StageKind::Reverb => "reverb",
            StageKind::Chorus => "chorus",
            StageKind::Delay => "delay",
        }
    }
}

/// One active stage with the parameters it was built from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stage {
    Highpass(Filter),
    Lowpass(Filter),
    PitchShift(PitchShift),
    Reverb(Reverb),
    Chorus(Chorus),
    Delay(Delay),
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Highpass(_) => StageKind::Highpass,
            Stage::Lowpass(_) => StageKind::Lowpass,
            Stage::PitchShift(_) => StageKind::PitchShift,
            Stage::Reverb(_) => StageKind::Reverb,
            Stage::Chorus(_) => StageKind::Chorus,
            Stage::Delay(_) => StageKind::Delay,
        }
    }

    pub fn process(&self, input: &[f32], sample_rate: u32) -> Vec<f32> {
        match self {
            Stage::Highpass(fx) | Stage::Lowpass(fx) => fx.process(input, sample_rate),
            Stage::PitchShift(fx) => fx.process(input, sample_rate),
            Stage::Reverb(fx) => fx.process(input, sample_rate),
            Stage::Chorus(fx) => fx.process(input, sample_rate),
            Stage::Delay(fx) => fx.process(input, sample_rate),
        }
    }
}

/// A serial chain of stages built from one parameter snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectChain {
    stages: Vec<Stage>,
}

impl EffectChain {
    /// Each stage is switched on independently; pushing in `StageKind::ORDER`
    /// order keeps the chain order fixed whatever the parameter combination.
    pub fn build(params: &EffectParameters) -> Self {
        let mut stages = Vec::with_capacity(StageKind::ORDER.len());
        if params.high_pass_hz() > HIGH_PASS_MIN {
            stages.push(Stage::Highpass(Filter::highpass(params.high_pass_hz())));
        }
        if params.low_pass_hz() < LOW_PASS_MAX {
            stages.push(Stage::Lowpass(Filter::lowpass(params.low_pass_hz())));
        }
        if params.pitch_semitones() != 0.0 {
            stages.push(Stage::PitchShift(PitchShift::new(params.pitch_semitones())));
        }
        if params.reverb_on() {
            stages.push(Stage::Reverb(Reverb::new(params.room_size())));
        }
        if params.chorus_on() {
            stages.push(Stage::Chorus(Chorus));
        }
        if params.delay_on() {
            stages.push(Stage::Delay(Delay));
        }
        Self { stages }
    }

    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(Stage::kind).collect()
    }

    pub fn is_bypass(&self) -> bool {
        self.stages.is_empty()
    }

    /// Process one block. With no active stage the block is copied through
    /// untouched.
    pub fn process(&self, block: &[i16], sample_rate: u32) -> Vec<i16> {
        if self.is_bypass() {
            return block.to_vec();
        }
        let mut buf = to_float(block);
        for stage in &self.stages {
            buf = stage.process(&buf, sample_rate);
            debug_assert_eq!(buf.len(), block.len(), "{} changed block length", stage.kind().name());
        }
        to_i16(&buf)
    }
}

pub fn to_float(block: &[i16]) -> Vec<f32> {
    block.iter().map(|&s| s as f32 / SAMPLE_SCALE).collect()
}

/// Round to nearest and clamp to the i16 range so feedback-heavy stages
/// saturate instead of wrapping.
pub fn to_i16(buf: &[f32]) -> Vec<i16> {
    buf.iter()
        .map(|&v| {
            let v = if v.is_finite() { v } else { 0.0 };
            (v * SAMPLE_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
        })
        .collect()
}
