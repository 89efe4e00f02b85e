//! Per-sample unit generators.
//!
//! Everything in here runs on the audio thread. Generators own their runtime
//! state, allocate only when constructed or reconfigured, and never block. The
//! shared, read-only pieces (sample-rate constants and wavetables) live in
//! [`context::SynthContext`] and are reached through an `Arc`.

/// Sample-rate constants, cents table and the shared context.
pub mod context;
/// Delay lines: plain, comb, all-pass, variable and flanger.
pub mod delay;
/// Segment envelopes and the DLS/SF2 style envelope.
pub mod envelope;
/// IIR, FIR and all-pass filters plus the coefficient update stride.
pub mod filter;
/// Low frequency oscillator with attack ramp.
pub mod lfo;
/// Uniform, sample-and-hold and interpolated noise.
pub mod noise;
/// Wavetable, FM, AM and buzz oscillators.
pub mod oscillator;
/// Segment and wavetable-scan pitch bend.
pub mod pitch_bend;
/// Schroeder reverb.
pub mod reverb;
/// Waveform tables.
pub mod wavetable;

pub use context::{SynthContext, SynthParams};
pub use envelope::{Curve, DlsEnv, EnvDef, Segment, SegmentEnv};
pub use oscillator::{AmOsc, BuzzOsc, FmOsc, WaveOsc};

/// Shared contract for every leaf generator.
///
/// `reset(init_phase)`:
///
///   init_phase == 0   cold start: clear all runtime state
///   init_phase  > 0   seed the phase (radians) for a new note
///   init_phase  < 0   live parameter change: recompute increments and
///                     coefficients but keep phase, so nothing clicks
pub trait UnitGen: Send {
    fn reset(&mut self, init_phase: f32);

    /// Advance one sample and return the new output.
    fn next_sample(&mut self) -> f32;

    /// Process one input sample. Sources ignore the input.
    fn sample(&mut self, input: f32) -> f32 {
        let _ = input;
        self.next_sample()
    }
}

/// Clamp a duration so a zero-length stage still takes one sample.
#[inline]
pub(crate) fn duration_samples(seconds: f32, sample_rate: f32) -> u32 {
    (seconds.max(crate::MIN_TIME) * sample_rate).round().max(1.0) as u32
}
