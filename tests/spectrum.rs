//! Spectral checks on the band-limited wavetables.

use std::{f32::consts::PI, sync::Arc};

use basicsynth::{
    dsp::{
        oscillator::WaveOsc,
        wavetable::{WT_SAW, WT_SAWL, WT_SQR},
        UnitGen,
    },
    SynthContext,
};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

const SR: f32 = 48_000.0;
/// 10 Hz bins, so 440 Hz lands on bin 44 with a whole number of cycles.
const N: usize = 4800;
const FUNDAMENTAL_BIN: usize = 44;

fn spectrum(wt: usize) -> Vec<f32> {
    let ctx = Arc::new(SynthContext::with_options(SR, 16_384, true));
    let mut osc = WaveOsc::interpolated(ctx).with_wavetable(wt).with_frequency(440.0);
    osc.reset(0.0);

    let mut buf: Vec<Complex<f32>> = (0..N)
        .map(|n| {
            let hann = 0.5 - 0.5 * (2.0 * PI * n as f32 / N as f32).cos();
            Complex::new(osc.next_sample() * hann, 0.0)
        })
        .collect();
    FftPlanner::<f32>::new().plan_fft_forward(N).process(&mut buf);
    buf[..N / 2].iter().map(|c| c.norm()).collect()
}

/// Largest bin at least two bins away from every harmonic, relative to the
/// fundamental.
fn off_harmonic_ratio(mags: &[f32]) -> f32 {
    let fundamental = mags[FUNDAMENTAL_BIN];
    let worst = mags
        .iter()
        .enumerate()
        .skip(3)
        .filter(|(bin, _)| {
            let r = bin % FUNDAMENTAL_BIN;
            r > 2 && r < FUNDAMENTAL_BIN - 2
        })
        .fold(0.0f32, |m, (_, v)| m.max(*v));
    worst / fundamental
}

#[test]
fn band_limited_tables_do_not_alias() {
    for wt in [WT_SAW, WT_SQR] {
        let ratio = off_harmonic_ratio(&spectrum(wt));
        assert!(ratio < 1e-3, "table {wt}: {ratio}");
    }
}

#[test]
fn naive_saw_aliases() {
    let ratio = off_harmonic_ratio(&spectrum(WT_SAWL));
    assert!(ratio > 1e-3, "{ratio}");
}

#[test]
fn saw_harmonics_fall_off_as_one_over_n() {
    let mags = spectrum(WT_SAW);
    let fundamental = mags[FUNDAMENTAL_BIN];
    for n in [2, 3, 5, 8] {
        let ratio = mags[FUNDAMENTAL_BIN * n] / fundamental;
        // Lanczos sigma shaves the upper partials a little.
        assert!(ratio <= 1.0 / n as f32 + 1e-3, "harmonic {n}: {ratio}");
        assert!(ratio > 0.8 / n as f32, "harmonic {n}: {ratio}");
    }
}
