use std::f32::consts::TAU;

use crate::dsp::wavetable::WaveTableSet;

/*
Synthesis Context
=================

Every generator in the crate needs a handful of numbers derived from the
sample rate, plus the wavetable library. They are computed once, wrapped in an
`Arc<SynthContext>`, and handed to every instrument template. Voices copy the
`Arc` at start-up; nothing in here changes afterwards.

Vocabulary
----------

  frq_ti      Table-index increment per Hz: table_length / sample_rate.
              An oscillator at f Hz advances f * frq_ti table entries per
              sample.

  rad_ti      Table index per radian: table_length / 2π. Converts a phase
              offset in radians into an index offset.

  frq_rad     Radians per sample per Hz: 2π / sample_rate.

  cents       1/100 of an equal-tempered semitone. A pitch offset of c cents
              multiplies frequency by 2^(c/1200).


The Cents Table
---------------

Pitch changes show up everywhere: vibrato depth, pitch bend, sample-player
tuning, pitch-wheel. Rather than calling powf each time we keep a table of
2^(c/1200) for c = 0..=1200 (one octave). Any other value folds whole octaves
out with an exact power of two and linearly interpolates the fractional cent:

    c = -1250.5  →  octave -2, remainder 1149.5
    mult = 2^-2 * lerp(table[1149], table[1150], 0.5)

The error from interpolating between adjacent cents is far below anything
audible (relative error < 1e-7).
*/

pub const DEFAULT_SAMPLE_RATE: f32 = 44_100.0;
pub const DEFAULT_TABLE_LENGTH: usize = 16_384;

const CENTS_PER_OCTAVE: i32 = 1200;

/// Sample-rate derived constants shared by every generator.
#[derive(Debug, Clone)]
pub struct SynthParams {
    pub sample_rate: f32,
    pub inv_sample_rate: f32,
    pub table_length: usize,
    pub ftable_length: f32,
    pub frq_ti: f32,
    pub rad_ti: f32,
    pub frq_rad: f32,
    pub nyquist: f32,
    cents: Box<[f32]>,
    pitches: [f32; 128],
}

impl SynthParams {
    pub fn new(sample_rate: f32, table_length: usize) -> Self {
        let sample_rate = sample_rate.max(1.0);
        let table_length = table_length.max(2);
        let ftable_length = table_length as f32;

        let cents = (0..=CENTS_PER_OCTAVE)
            .map(|c| 2.0_f64.powf(c as f64 / CENTS_PER_OCTAVE as f64) as f32)
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let mut pitches = [0.0; 128];
        for (p, slot) in pitches.iter_mut().enumerate() {
            *slot = 440.0 * 2.0_f32.powf((p as f32 - 69.0) / 12.0);
        }

        Self {
            sample_rate,
            inv_sample_rate: 1.0 / sample_rate,
            table_length,
            ftable_length,
            frq_ti: ftable_length / sample_rate,
            rad_ti: ftable_length / TAU,
            frq_rad: TAU / sample_rate,
            nyquist: sample_rate * 0.5,
            cents,
            pitches,
        }
    }

    /// Frequency ratio for a pitch offset in cents: 2^(cents/1200).
    pub fn cents_mult(&self, cents: f32) -> f32 {
        if !cents.is_finite() {
            return 1.0;
        }
        let whole = cents.floor();
        let frac = cents - whole;
        let whole = whole as i32;
        let octave = whole.div_euclid(CENTS_PER_OCTAVE);
        let rem = whole.rem_euclid(CENTS_PER_OCTAVE) as usize;

        let lo = self.cents[rem];
        let mult = if frac > 0.0 {
            lo + (self.cents[rem + 1] - lo) * frac
        } else {
            lo
        };
        mult * 2.0_f32.powi(octave)
    }

    /// Frequency in Hz for a MIDI pitch number (69 = A4 = 440 Hz).
    pub fn pitch_frequency(&self, pitch: i32) -> f32 {
        match usize::try_from(pitch) {
            Ok(p) if p < self.pitches.len() => self.pitches[p],
            _ => 440.0 * self.cents_mult((pitch - 69) as f32 * 100.0),
        }
    }

    /// Convert seconds to a whole number of samples (at least zero).
    pub fn samples(&self, seconds: f32) -> u32 {
        (seconds.max(0.0) * self.sample_rate).round() as u32
    }

    /// Convert an absolute pitch in cents (0 = MIDI key 0, 8.176 Hz) to Hz.
    pub fn abs_cents_frequency(&self, cents: f32) -> f32 {
        8.175_799 * self.cents_mult(cents)
    }
}

impl Default for SynthParams {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_TABLE_LENGTH)
    }
}

/// Process-scoped, read-only resources every voice reads from.
#[derive(Debug, Clone)]
pub struct SynthContext {
    pub params: SynthParams,
    pub wavetables: WaveTableSet,
}

impl SynthContext {
    pub fn new(sample_rate: f32) -> Self {
        Self::with_options(sample_rate, DEFAULT_TABLE_LENGTH, true)
    }

    pub fn with_options(sample_rate: f32, table_length: usize, gibbs: bool) -> Self {
        let params = SynthParams::new(sample_rate, table_length);
        let wavetables = WaveTableSet::new(&params, gibbs);
        Self { params, wavetables }
    }

    /// Build a context with a custom wavetable set (user tables added before sharing).
    pub fn with_wavetables(params: SynthParams, wavetables: WaveTableSet) -> Self {
        Self { params, wavetables }
    }
}

impl Default for SynthContext {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}
