use std::{f64::consts::PI, sync::Arc};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dsp::context::SynthParams;

/*
Wavetables
==========

A wavetable holds one cycle of a waveform. An oscillator reads through it at a
speed proportional to the desired frequency, so any shape costs the same per
sample as a sine.

Band-Limiting
-------------

A mathematically perfect sawtooth contains infinitely many harmonics; played
back at 2 kHz with a 44.1 kHz sample rate, everything above the 11th harmonic
folds back (aliases) into the audible band. The "band-limited" tables are built
by summing only the harmonics that fit below Nyquist at a reference pitch:

    saw       all harmonics, amplitude 1/n
    square    odd harmonics, amplitude 1/n
    triangle  odd harmonics, amplitude 1/n², alternating sign
    pulse     all harmonics, amplitude 1

Summing a truncated series produces ripples near discontinuities (the Gibbs
phenomenon). Multiplying each partial by the Lanczos sigma factor
sin(πn/N)/(πn/N) smooths them out at the cost of slightly duller edges.

The "linear" tables (SAWL, SQRL, TRIL) are the naive geometric shapes: they
alias, but are handy as control-rate sources (LFOs, pitch-bend scans) where
harmonics above Nyquist are not an issue. SAWP and TRIP are unipolar (0..1).

Every table carries one guard sample (table[len] == table[0]) so interpolating
readers never need to wrap the second tap.
*/

pub type WaveTable = Arc<[f32]>;

pub const WT_SIN: usize = 0;
pub const WT_SAW: usize = 1;
pub const WT_SQR: usize = 2;
pub const WT_TRI: usize = 3;
pub const WT_PLS: usize = 4;
pub const WT_SAWL: usize = 5;
pub const WT_SQRL: usize = 6;
pub const WT_TRIL: usize = 7;
pub const WT_SAWP: usize = 8;
pub const WT_TRIP: usize = 9;
pub const WT_USR0: usize = 10;

/// Reference pitch for deciding how many partials a band-limited table holds.
const BAND_LIMIT_REF_HZ: f64 = 440.0;
const MAX_PARTIALS: usize = 128;

/// One sinusoidal component of a user table.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Partial {
    /// Harmonic multiple of the fundamental.
    pub mult: f32,
    /// Relative amplitude.
    pub amp: f32,
    /// Starting phase in radians.
    pub phase: f32,
}

impl Partial {
    pub fn new(mult: f32, amp: f32) -> Self {
        Self {
            mult,
            amp,
            phase: 0.0,
        }
    }
}

/// The library of waveform tables, looked up by integer ID.
#[derive(Debug, Clone)]
pub struct WaveTableSet {
    tables: Vec<WaveTable>,
    silent: WaveTable,
    table_length: usize,
    gibbs: bool,
}

impl WaveTableSet {
    pub fn new(params: &SynthParams, gibbs: bool) -> Self {
        let len = params.table_length;
        let partials = ((params.nyquist as f64 / BAND_LIMIT_REF_HZ).floor() as usize).clamp(1, MAX_PARTIALS);

        let harmonic = |select: &dyn Fn(usize) -> Option<f64>| -> Vec<Partial> {
            (1..=partials)
                .filter_map(|n| {
                    select(n).map(|amp| Partial {
                        mult: n as f32,
                        amp: amp as f32,
                        phase: 0.0,
                    })
                })
                .collect()
        };

        let sine = vec![Partial::new(1.0, 1.0)];
        let saw = harmonic(&|n| Some(1.0 / n as f64));
        let square = harmonic(&|n| (n % 2 == 1).then(|| 1.0 / n as f64));
        let triangle = harmonic(&|n| {
            (n % 2 == 1).then(|| {
                let sign = if (n / 2) % 2 == 0 { 1.0 } else { -1.0 };
                sign / (n * n) as f64
            })
        });
        let pulse = harmonic(&|_| Some(1.0));

        let tables: Vec<WaveTable> = vec![
            sum_partials(len, &sine, false).into(),
            sum_partials(len, &saw, gibbs).into(),
            sum_partials(len, &square, gibbs).into(),
            sum_partials(len, &triangle, gibbs).into(),
            sum_partials(len, &pulse, gibbs).into(),
            shape_table(len, |t| 2.0 * t - 1.0).into(),
            shape_table(len, |t| if t < 0.5 { 1.0 } else { -1.0 }).into(),
            shape_table(len, tri_bipolar).into(),
            shape_table(len, |t| t).into(),
            shape_table(len, |t| (tri_bipolar(t) + 1.0) * 0.5).into(),
        ];

        Self {
            tables,
            silent: vec![0.0; len + 1].into(),
            table_length: len,
            gibbs,
        }
    }

    /// Resolve a table by ID. Unknown IDs resolve to a silent table.
    pub fn get(&self, id: usize) -> WaveTable {
        self.tables
            .get(id)
            .cloned()
            .unwrap_or_else(|| self.silent.clone())
    }

    pub fn try_get(&self, id: usize) -> Option<&WaveTable> {
        self.tables.get(id)
    }

    pub fn contains(&self, id: usize) -> bool {
        id < self.tables.len()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_length(&self) -> usize {
        self.table_length
    }

    /// Append a user table built from partials; returns its ID.
    ///
    /// Only possible before the set is shared: the owning `SynthContext`
    /// is handed out behind an `Arc` and never mutated afterwards.
    pub fn add_user(&mut self, partials: &[Partial]) -> usize {
        self.tables
            .push(sum_partials(self.table_length, partials, self.gibbs).into());
        self.tables.len() - 1
    }

    /// Replace (or create) the user table with the given ID.
    pub fn set_user(&mut self, id: usize, partials: &[Partial]) -> bool {
        if id < WT_USR0 {
            return false;
        }
        while self.tables.len() <= id {
            self.tables.push(self.silent.clone());
        }
        self.tables[id] = sum_partials(self.table_length, partials, self.gibbs).into();
        true
    }
}

fn tri_bipolar(t: f64) -> f64 {
    if t < 0.25 {
        4.0 * t
    } else if t < 0.75 {
        2.0 - 4.0 * t
    } else {
        4.0 * t - 4.0
    }
}

fn shape_table(len: usize, shape: impl Fn(f64) -> f64) -> Vec<f32> {
    let mut table: Vec<f32> = (0..len)
        .map(|i| shape(i as f64 / len as f64) as f32)
        .collect();
    table.push(table[0]);
    table
}

/// Sum sinusoidal partials into a table normalized to a peak of 1.0.
pub fn sum_partials(len: usize, partials: &[Partial], gibbs: bool) -> Vec<f32> {
    let top = partials
        .iter()
        .map(|p| p.mult.abs())
        .fold(0.0_f32, f32::max) as f64
        + 1.0;

    let mut table = vec![0.0_f64; len];
    for p in partials {
        if p.amp == 0.0 || p.mult == 0.0 {
            continue;
        }
        let mut amp = p.amp as f64;
        if gibbs && partials.len() > 1 {
            let x = PI * p.mult as f64 / top;
            amp *= x.sin() / x;
        }
        let step = 2.0 * PI * p.mult as f64 / len as f64;
        for (i, slot) in table.iter_mut().enumerate() {
            *slot += amp * (step * i as f64 + p.phase as f64).sin();
        }
    }

    let peak = table.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let scale = if peak > 0.0 { 1.0 / peak } else { 0.0 };
    let mut out: Vec<f32> = table.into_iter().map(|v| (v * scale) as f32).collect();
    out.push(out.first().copied().unwrap_or(0.0));
    out
}
