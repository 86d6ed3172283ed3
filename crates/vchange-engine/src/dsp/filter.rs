use super::effect::Effect;
use std::f32::consts::PI;

/// Butterworth Q.
const Q: f32 = 0.707;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterMode {
    Highpass,
    Lowpass,
}

/// Second-order RBJ filter, run over one block from zero state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Filter {
    pub mode: FilterMode,
    pub cutoff_hz: f32,
}

#[derive(Debug, Clone, Copy)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Filter {
    pub fn highpass(cutoff_hz: f32) -> Self {
        Self { mode: FilterMode::Highpass, cutoff_hz }
    }

    pub fn lowpass(cutoff_hz: f32) -> Self {
        Self { mode: FilterMode::Lowpass, cutoff_hz }
    }

    fn coefficients(&self, sample_rate: u32) -> Coefficients {
        let nyquist = sample_rate as f32 * 0.5;
        // keep the cutoff strictly inside (0, nyquist) so omega stays meaningful
        let f = self.cutoff_hz.clamp(1.0, nyquist * 0.99);
        let omega = 2.0 * PI * f / sample_rate as f32;
        let (sin_w, cos_w) = omega.sin_cos();
        let alpha = sin_w / (2.0 * Q);
        let a0 = 1.0 + alpha;

        let (b0, b1, b2) = match self.mode {
            FilterMode::Lowpass => (
                ((1.0 - cos_w) / 2.0) / a0,
                (1.0 - cos_w) / a0,
                ((1.0 - cos_w) / 2.0) / a0,
            ),
            FilterMode::Highpass => (
                ((1.0 + cos_w) / 2.0) / a0,
                -(1.0 + cos_w) / a0,
                ((1.0 + cos_w) / 2.0) / a0,
            ),
        };
        Coefficients { b0, b1, b2, a1: (-2.0 * cos_w) / a0, a2: (1.0 - alpha) / a0 }
    }
}

impl Effect for Filter {
    fn process(&self, input: &[f32], sample_rate: u32) -> Vec<f32> {
        let c = self.coefficients(sample_rate);
        let (mut z1, mut z2) = (0.0f32, 0.0f32);
        // Direct Form II transposed
        input
            .iter()
            .map(|&x| {
                let y = c.b0 * x + z1;
                z1 = c.b1 * x - c.a1 * y + z2;
                z2 = c.b2 * x - c.a2 * y;
                y
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sr: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sr as f32).sin() * 0.5)
            .collect()
    }

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|s| s * s).sum::<f32>() / x.len() as f32).sqrt()
    }

    #[test]
    fn lowpass_attenuates_high_tone() {
        let x = sine(8000.0, 44100, 1024);
        let y = Filter::lowpass(500.0).process(&x, 44100);
        assert_eq!(y.len(), x.len());
        assert!(rms(&y[256..]) < rms(&x[256..]) * 0.1);
    }

    #[test]
    fn highpass_attenuates_low_tone() {
        let x = sine(50.0, 44100, 4096);
        let y = Filter::highpass(2000.0).process(&x, 44100);
        assert!(rms(&y[1024..]) < rms(&x[1024..]) * 0.05);
    }

    #[test]
    fn lowpass_passes_low_tone() {
        let x = sine(100.0, 44100, 4096);
        let y = Filter::lowpass(5000.0).process(&x, 44100);
        let ratio = rms(&y[1024..]) / rms(&x[1024..]);
        assert!((ratio - 1.0).abs() < 0.05, "ratio {ratio}");
    }
}
