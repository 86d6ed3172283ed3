use super::effect::Effect;

// Comb and all-pass lengths in samples at 44.1 kHz. They are kept well below
// one block so reflections build up inside a single block.
const COMB_DELAYS: [usize; 8] = [113, 137, 163, 191, 223, 257, 293, 331];
const ALLPASS_DELAYS: [usize; 3] = [37, 71, 97];
const REFERENCE_RATE: f32 = 44100.0;

const INPUT_GAIN: f32 = 0.015;
const DAMPING: f32 = 0.4;
const ALLPASS_FEEDBACK: f32 = 0.5;
const WET: f32 = 0.35;
// makes up for INPUT_GAIN so the wet path sits near the dry level
const WET_GAIN: f32 = 8.0;

/// Schroeder reverb: parallel damped combs into series all-passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reverb {
    /// 0..1, maps onto comb feedback.
    pub room_size: f32,
}

impl Reverb {
    pub fn new(room_size: f32) -> Self {
        Self { room_size: room_size.clamp(0.0, 1.0) }
    }

    fn feedback(&self) -> f32 {
        0.7 + 0.28 * self.room_size
    }
}

struct Comb {
    buffer: Vec<f32>,
    pos: usize,
    store: f32,
}

impl Comb {
    fn new(len: usize) -> Self {
        Self { buffer: vec![0.0; len.max(1)], pos: 0, store: 0.0 }
    }

    fn process(&mut self, input: f32, feedback: f32) -> f32 {
        let out = self.buffer[self.pos];
        self.store = out * (1.0 - DAMPING) + self.store * DAMPING;
        self.buffer[self.pos] = input + self.store * feedback;
        self.pos = (self.pos + 1) % self.buffer.len();
        out
    }
}

struct AllPass {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllPass {
    fn new(len: usize) -> Self {
        Self { buffer: vec![0.0; len.max(1)], pos: 0 }
    }

    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.pos];
        self.buffer[self.pos] = input + delayed * ALLPASS_FEEDBACK;
        self.pos = (self.pos + 1) % self.buffer.len();
        delayed - input
    }
}

fn scaled(len: usize, sample_rate: u32) -> usize {
    ((len as f32) * sample_rate as f32 / REFERENCE_RATE).round() as usize
}

impl Effect for Reverb {
    fn process(&self, input: &[f32], sample_rate: u32) -> Vec<f32> {
        let feedback = self.feedback();
        let mut combs: Vec<Comb> =
            COMB_DELAYS.iter().map(|&d| Comb::new(scaled(d, sample_rate))).collect();
        let mut allpasses: Vec<AllPass> =
            ALLPASS_DELAYS.iter().map(|&d| AllPass::new(scaled(d, sample_rate))).collect();

        input
            .iter()
            .map(|&x| {
                let driven = x * INPUT_GAIN;
                let mut wet: f32 = combs.iter_mut().map(|c| c.process(driven, feedback)).sum();
                for ap in allpasses.iter_mut() {
                    wet = ap.process(wet);
                }
                x * (1.0 - WET) + wet * WET * WET_GAIN
            })
            .collect()
    }
}
