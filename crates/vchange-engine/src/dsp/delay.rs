use super::effect::{tap, Effect};

const DELAY_MS: f32 = 6.0;
const FEEDBACK: f32 = 0.45;
const REPEATS: usize = 3;

/// Feedback echo unrolled into a fixed number of decaying taps.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Delay;

impl Delay {
    pub fn delay_samples(sample_rate: u32) -> usize {
        ((DELAY_MS * 0.001 * sample_rate as f32).round() as usize).max(1)
    }
}

impl Effect for Delay {
    fn process(&self, input: &[f32], sample_rate: u32) -> Vec<f32> {
        let d = Self::delay_samples(sample_rate) as isize;
        (0..input.len())
            .map(|n| {
                let mut acc = input[n];
                let mut gain = 1.0;
                for k in 1..=REPEATS as isize {
                    gain *= FEEDBACK;
                    acc += gain * tap(input, n as isize - k * d);
                }
                acc
            })
            .collect()
    }
}
