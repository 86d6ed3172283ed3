use super::effect::{sample_at, Effect};
use std::f32::consts::PI;

/// Grain length in samples at 44.1 kHz (~11.6 ms).
const GRAIN: usize = 512;

/// Time-domain granular pitch shifter.
///
/// The block is cut into Hann-windowed grains at 50% overlap. Each grain is
/// re-read around its own centre at `ratio` speed, so pitch moves while the
/// grain stays anchored in time and the block length never changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchShift {
    pub semitones: f32,
}

impl PitchShift {
    pub fn new(semitones: f32) -> Self {
        Self { semitones }
    }

    pub fn ratio(&self) -> f32 {
        2f32.powf(self.semitones / 12.0)
    }
}

impl Effect for PitchShift {
    fn process(&self, input: &[f32], _sample_rate: u32) -> Vec<f32> {
        let n = input.len();
        if n == 0 {
            return Vec::new();
        }
        let ratio = self.ratio();
        let grain = GRAIN.min(n).max(2);
        let hop = grain / 2;
        let half = grain as f32 / 2.0;

        let mut out = vec![0.0f32; n];
        let mut norm = vec![0.0f32; n];

        // start one hop early so the first samples get full window coverage
        let mut start = -(hop as isize);
        while start < n as isize {
            let centre = start as f32 + half;
            for i in 0..grain {
                let pos = start + i as isize;
                if pos < 0 {
                    continue;
                }
                let pos = pos as usize;
                if pos >= n {
                    break;
                }
                let w = 0.5 - 0.5 * (2.0 * PI * i as f32 / grain as f32).cos();
                let src = centre + (i as f32 - half) * ratio;
                out[pos] += w * sample_at(input, src);
                norm[pos] += w;
            }
            start += hop as isize;
        }

        for (o, w) in out.iter_mut().zip(norm.iter()) {
            if *w > 1e-3 {
                *o /= *w;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_crossings(x: &[f32]) -> usize {
        x.windows(2).filter(|w| w[0] <= 0.0 && w[1] > 0.0).count()
    }

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / 44100.0).sin() * 0.5)
            .collect()
    }

    #[test]
    fn keeps_block_length() {
        let x = sine(440.0, 1024);
        for st in [-12.0, -3.5, 7.0, 12.0] {
            assert_eq!(PitchShift::new(st).process(&x, 44100).len(), 1024);
        }
    }

    #[test]
    fn octave_up_roughly_doubles_frequency() {
        let x = sine(300.0, 4096);
        let y = PitchShift::new(12.0).process(&x, 44100);
        let before = zero_crossings(&x) as f32;
        let after = zero_crossings(&y) as f32;
        assert!(after > before * 1.6 && after < before * 2.4, "{before} -> {after}");
    }

    #[test]
    fn octave_down_roughly_halves_frequency() {
        let x = sine(800.0, 4096);
        let y = PitchShift::new(-12.0).process(&x, 44100);
        let before = zero_crossings(&x) as f32;
        let after = zero_crossings(&y) as f32;
        assert!(after > before * 0.35 && after < before * 0.65, "{before} -> {after}");
    }

    #[test]
    fn output_stays_bounded() {
        let x = sine(440.0, 1024);
        let y = PitchShift::new(5.0).process(&x, 44100);
        assert!(y.iter().all(|s| s.abs() <= 0.5 + 1e-3));
    }
}
