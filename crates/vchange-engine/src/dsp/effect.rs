/// Uniform stage interface.
/// - `process()` is a pure function of its input, its own parameters and the
///   sample rate; nothing carries over between blocks.
/// - `input` is mono f32 in roughly [-1, 1]; the output has the same length.
pub trait Effect {
    fn process(&self, input: &[f32], sample_rate: u32) -> Vec<f32>;
}

/// Read `input` at a fractional position with linear interpolation.
/// Positions before the block mirror into it so delay taps reaching back past
/// sample 0 stay continuous; positions past the end hold the last sample.
pub(crate) fn sample_at(input: &[f32], pos: f32) -> f32 {
    let n = input.len();
    if n == 0 {
        return 0.0;
    }
    let pos = if pos < 0.0 { -pos } else { pos };
    let last = (n - 1) as f32;
    if pos >= last {
        return input[n - 1];
    }
    let i = pos.floor();
    let frac = pos - i;
    let i = i as usize;
    input[i] + (input[i + 1] - input[i]) * frac
}

/// Integer-tap variant of [`sample_at`] for fixed delays.
pub(crate) fn tap(input: &[f32], index: isize) -> f32 {
    let n = input.len() as isize;
    if n == 0 {
        return 0.0;
    }
    let i = index.unsigned_abs() as isize;
    input[i.min(n - 1) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_between_samples() {
        let x = [0.0, 1.0, 0.0];
        assert!((sample_at(&x, 0.5) - 0.5).abs() < 1e-6);
        assert_eq!(sample_at(&x, 1.0), 1.0);
    }

    #[test]
    fn negative_positions_mirror() {
        let x = [0.0, 0.25, 0.5];
        assert_eq!(sample_at(&x, -2.0), 0.5);
        assert_eq!(tap(&x, -1), 0.25);
        assert_eq!(tap(&x, 10), 0.5);
    }
}
