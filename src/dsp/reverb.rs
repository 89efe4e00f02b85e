//! Reverb - Room Simulation via Delay Networks
//!
//! Reverb simulates the sound of a space by creating many delayed reflections
//! of the input signal. This implementation uses the classic Schroeder network.
//!
//! # Schroeder Reverb Architecture
//!
//! ```text
//! Input ──┬──→ [Comb 1] ──┐
//!         ├──→ [Comb 2] ──┤
//!         ├──→ [Comb 3] ──┼──→ (+) ──→ [Allpass 1] ──→ [Allpass 2] ──→ wet
//!         └──→ [Comb 4] ──┘
//!
//! out = (1 - mix) · input + mix · wet
//! ```
//!
//! ## Comb Filters
//!
//! Four parallel combs with mutually prime delays (43.7, 41.1, 37.1, 29.7 ms)
//! build the dense tail. Each comb's feedback comes from the overall reverb
//! time, so all four reach -60 dB together:
//!
//! ```text
//! g = 0.001 ^ (comb_delay / reverb_time)
//! ```
//!
//! ## Allpass Filters
//!
//! Two short all-passes in series (5 ms and 1.7 ms, with fixed decay times of
//! 96.83 ms and 32.92 ms) diffuse the comb echoes without colouring them.
//!
//! # Parameters
//!
//! Only the reverb time and the mix are exposed; everything else is fixed.

use crate::dsp::{
    delay::{AllPassDelay, CombDelay},
    UnitGen,
};

const COMB_DELAYS: [f32; 4] = [0.0437, 0.0411, 0.0371, 0.0297];
const ALLPASS_DELAYS: [f32; 2] = [0.005, 0.0017];
const ALLPASS_DECAYS: [f32; 2] = [0.096_83, 0.032_92];

/// Schroeder reverb with 4 comb filters and 2 allpass filters
#[derive(Debug, Clone)]
pub struct Reverb {
    combs: [CombDelay; 4],
    allpasses: [AllPassDelay; 2],
    rvt: f32,
    mix: f32,
}

impl Reverb {
    pub fn new(sample_rate: f32, rvt: f32) -> Self {
        let combs = COMB_DELAYS.map(|d| CombDelay::new(d, rvt, sample_rate));
        let allpasses = [
            AllPassDelay::new(ALLPASS_DELAYS[0], ALLPASS_DECAYS[0], sample_rate),
            AllPassDelay::new(ALLPASS_DELAYS[1], ALLPASS_DECAYS[1], sample_rate),
        ];
        Self {
            combs,
            allpasses,
            rvt,
            mix: 0.1,
        }
    }

    /// Time for the tail to fall 60 dB, in seconds.
    pub fn set_rvt(&mut self, rvt: f32) {
        self.rvt = rvt.max(0.01);
        for comb in &mut self.combs {
            comb.set_decay(self.rvt);
        }
    }

    pub fn rvt(&self) -> f32 {
        self.rvt
    }

    /// Wet proportion of the output (0..=1).
    pub fn set_mix(&mut self, mix: f32) {
        self.mix = mix.clamp(0.0, 1.0);
    }

    pub fn mix(&self) -> f32 {
        self.mix
    }
}

impl UnitGen for Reverb {
    fn reset(&mut self, init_phase: f32) {
        for comb in &mut self.combs {
            comb.reset(init_phase);
        }
        for allpass in &mut self.allpasses {
            allpass.reset(init_phase);
        }
    }

    fn next_sample(&mut self) -> f32 {
        self.sample(0.0)
    }

    /// Process a single sample through the reverb
    #[inline]
    fn sample(&mut self, input: f32) -> f32 {
        // Sum outputs of all comb filters (parallel)
        let mut wet = 0.0;
        for comb in &mut self.combs {
            wet += comb.sample(input);
        }
        wet *= 0.25;

        // Pass through allpass filters (series)
        for allpass in &mut self.allpasses {
            wet = allpass.sample(wet);
        }

        input * (1.0 - self.mix) + wet * self.mix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverb_produces_tail() {
        let mut reverb = Reverb::new(48_000.0, 1.0);
        reverb.set_mix(1.0);

        let _ = reverb.sample(1.0);

        // Shortest comb is ~30 ms = 1426 samples at 48 kHz
        let mut has_tail = false;
        for _ in 0..5000 {
            if reverb.sample(0.0).abs() > 0.001 {
                has_tail = true;
                break;
            }
        }
        assert!(has_tail, "Reverb should produce a tail after impulse");
    }

    #[test]
    fn test_reverb_time_sets_decay() {
        let mut short = Reverb::new(48_000.0, 0.2);
        let mut long = Reverb::new(48_000.0, 2.0);
        short.set_mix(1.0);
        long.set_mix(1.0);
        short.sample(1.0);
        long.sample(1.0);
        let tail = |r: &mut Reverb| {
            let mut energy = 0.0;
            for i in 0..48_000 {
                let v = r.sample(0.0);
                if i > 24_000 {
                    energy += v * v;
                }
            }
            energy
        };
        assert!(tail(&mut long) > tail(&mut short) * 100.0);
    }

    #[test]
    fn test_reverb_stability() {
        let mut reverb = Reverb::new(48_000.0, 10.0);
        reverb.set_mix(1.0);
        for _ in 0..10000 {
            let out = reverb.sample(0.1);
            assert!(out.is_finite(), "Reverb output should be finite");
            assert!(out.abs() < 10.0, "Reverb output unstable: {}", out);
        }
    }

    #[test]
    fn test_zero_mix_is_dry() {
        let mut reverb = Reverb::new(48_000.0, 1.0);
        reverb.set_mix(0.0);
        for i in 0..512 {
            let x = (i as f32 * 0.05).sin();
            assert_eq!(reverb.sample(x), x);
        }
    }
}
