use super::effect::{sample_at, Effect};
use std::f32::consts::PI;

const BASE_DELAY_MS: f32 = 7.0;
/// Peak excursion of each voice from the base delay.
const DEPTH_MS: f32 = 0.25;
const MIX: f32 = 0.5;

/// Two-voice chorus. Each voice sweeps its delay through one raised-cosine
/// bump per block, one voice longer and one shorter than the base delay.
/// Both voices sit at the base delay on block edges, so consecutive blocks
/// join without a jump in delay time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Chorus;

impl Chorus {
    /// Delays in samples of both voices at position `n` of a `len`-sample block.
    fn voice_delays(n: usize, len: usize, sample_rate: u32) -> (f32, f32) {
        let sr = sample_rate as f32;
        let base = BASE_DELAY_MS * 0.001 * sr;
        let depth = DEPTH_MS * 0.001 * sr;
        let bump = (PI * n as f32 / len.max(1) as f32).sin().powi(2);
        (base + depth * bump, base - depth * bump)
    }
}

impl Effect for Chorus {
    fn process(&self, input: &[f32], sample_rate: u32) -> Vec<f32> {
        input
            .iter()
            .enumerate()
            .map(|(n, &x)| {
                let (d1, d2) = Self::voice_delays(n, input.len(), sample_rate);
                let wet = 0.5 * (sample_at(input, n as f32 - d1) + sample_at(input, n as f32 - d2));
                x * (1.0 - MIX) + wet * MIX
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_length_and_bounds() {
        let x: Vec<f32> = (0..1024).map(|i| (i as f32 * 0.05).sin() * 0.9).collect();
        let y = Chorus.process(&x, 44100);
        assert_eq!(y.len(), x.len());
        assert!(y.iter().all(|s| s.abs() <= 0.9 + 1e-4));
    }

    #[test]
    fn changes_the_signal() {
        let x: Vec<f32> = (0..1024).map(|i| (i as f32 * 0.3).sin()).collect();
        assert_ne!(Chorus.process(&x, 44100), x);
    }

    #[test]
    fn voices_sweep_within_a_block_and_meet_at_the_edges() {
        let base = BASE_DELAY_MS * 0.001 * 44100.0;
        let (a, b) = Chorus::voice_delays(0, 1024, 44100);
        assert!((a - base).abs() < 1e-3 && (b - base).abs() < 1e-3);

        // mid-block the voices are a full 2 * depth apart (22 samples)
        let (a, b) = Chorus::voice_delays(512, 1024, 44100);
        assert!(a - b > 20.0, "spread {}", a - b);

        // the last sample is one step from the next block's first
        let (a, _) = Chorus::voice_delays(1023, 1024, 44100);
        assert!((a - base).abs() < 0.01);
    }
}
