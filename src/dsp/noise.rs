use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::dsp::UnitGen;

/*
Noise Sources
=============

  white     A fresh uniform value in [-1, 1) every sample. Flat spectrum.

  hold      Sample-and-hold: draw a value, repeat it for sr/rate samples,
            draw again. The spectrum rolls off above `rate`, giving the
            stepped "computer" noise of old synths.

  interp    Like hold, but instead of stepping it ramps linearly from the
            previous value to the next over the hold period. Smoother,
            darker, useful as a random LFO.

All three use a seeded SmallRng so a given seed always produces the same
sequence. Clones continue the same sequence from the point they were cloned.
*/

const DEFAULT_SEED: u64 = 0x5EED_B0A5;

#[derive(Debug, Clone)]
pub struct WhiteNoise {
    rng: SmallRng,
    seed: u64,
}

impl WhiteNoise {
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Default for WhiteNoise {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitGen for WhiteNoise {
    fn reset(&mut self, init_phase: f32) {
        if init_phase == 0.0 {
            self.rng = SmallRng::seed_from_u64(self.seed);
        }
    }

    #[inline]
    fn next_sample(&mut self) -> f32 {
        self.rng.gen_range(-1.0..1.0)
    }
}

/// Sample-and-hold noise, optionally ramping between hold points.
#[derive(Debug, Clone)]
pub struct NoiseHold {
    white: WhiteNoise,
    sample_rate: f32,
    rate: f32,
    interpolate: bool,

    hold_samples: u32,
    count: u32,
    value: f32,
    next: f32,
    step: f32,
}

/// Linearly interpolated hold noise. Build with [`NoiseHold::interpolated`].
pub type NoiseInterp = NoiseHold;

impl NoiseHold {
    pub fn new(sample_rate: f32, rate: f32) -> Self {
        Self {
            white: WhiteNoise::new(),
            sample_rate,
            rate,
            interpolate: false,
            hold_samples: 1,
            count: 0,
            value: 0.0,
            next: 0.0,
            step: 0.0,
        }
    }

    /// Ramp between hold points instead of stepping.
    pub fn interpolated(sample_rate: f32, rate: f32) -> Self {
        Self {
            interpolate: true,
            ..Self::new(sample_rate, rate)
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.white = WhiteNoise::with_seed(seed);
        self
    }

    /// New values per second. Takes effect on the next `reset`.
    pub fn set_rate(&mut self, rate: f32) {
        self.rate = rate;
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn hold_samples(&self) -> u32 {
        self.hold_samples
    }

    fn draw(&mut self) {
        if self.interpolate {
            self.value = self.next;
            self.next = self.white.next_sample();
            self.step = (self.next - self.value) / self.hold_samples as f32;
        } else {
            self.value = self.white.next_sample();
        }
        self.count = self.hold_samples;
    }
}

impl UnitGen for NoiseHold {
    fn reset(&mut self, init_phase: f32) {
        self.hold_samples = if self.rate > 0.0 {
            (self.sample_rate / self.rate).round().max(1.0) as u32
        } else {
            1
        };
        if init_phase >= 0.0 {
            self.white.reset(init_phase);
            self.next = self.white.next_sample();
            self.count = 0;
        }
    }

    #[inline]
    fn next_sample(&mut self) -> f32 {
        if self.count == 0 {
            self.draw();
        } else if self.interpolate {
            self.value += self.step;
        }
        self.count -= 1;
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_noise_is_bounded_and_deterministic() {
        let mut a = WhiteNoise::with_seed(7);
        let mut b = WhiteNoise::with_seed(7);
        for _ in 0..4096 {
            let x = a.next_sample();
            assert!((-1.0..1.0).contains(&x));
            assert_eq!(x, b.next_sample());
        }
    }

    #[test]
    fn white_noise_reset_replays() {
        let mut noise = WhiteNoise::with_seed(3);
        noise.reset(0.0);
        let first: Vec<f32> = (0..16).map(|_| noise.next_sample()).collect();
        noise.reset(0.0);
        let again: Vec<f32> = (0..16).map(|_| noise.next_sample()).collect();
        assert_eq!(first, again);
    }

    #[test]
    fn hold_repeats_for_period() {
        let mut noise = NoiseHold::new(1000.0, 100.0);
        noise.reset(0.0);
        assert_eq!(noise.hold_samples(), 10);
        let buffer: Vec<f32> = (0..30).map(|_| noise.next_sample()).collect();
        for chunk in buffer.chunks(10) {
            assert!(chunk.iter().all(|&v| v == chunk[0]));
        }
        assert_ne!(buffer[0], buffer[10]);
    }

    #[test]
    fn interp_ramps_between_points() {
        let mut noise = NoiseHold::interpolated(1000.0, 100.0).with_seed(11);
        noise.reset(0.0);
        let buffer: Vec<f32> = (0..40).map(|_| noise.next_sample()).collect();
        // Constant slope inside each hold period
        for chunk in buffer.chunks(10) {
            let slope = chunk[1] - chunk[0];
            for w in chunk.windows(2) {
                assert!(((w[1] - w[0]) - slope).abs() < 1e-5);
            }
        }
        // Continuous across period boundaries
        let max_jump = buffer.windows(2).map(|w| (w[1] - w[0]).abs()).fold(0.0, f32::max);
        assert!(max_jump <= 0.2 + 1e-5);
    }
}
