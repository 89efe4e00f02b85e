//! Benchmarks for wavetable, FM and buzz oscillators.

use std::hint::black_box;

use basicsynth::dsp::{
    oscillator::{BuzzOsc, FmOsc, WaveOsc},
    wavetable::{WT_SAW, WT_SIN},
    UnitGen,
};
use criterion::{BenchmarkId, Criterion};

use crate::{context, BLOCK_SIZES};

fn run(osc: &mut dyn UnitGen, buffer: &mut [f32]) {
    for s in buffer.iter_mut() {
        *s = osc.next_sample();
    }
}

pub fn bench_oscillator(c: &mut Criterion) {
    let mut group = c.benchmark_group("dsp/oscillator");
    let ctx = context();

    for &size in BLOCK_SIZES {
        let mut buffer = vec![0.0f32; size];

        // Table lookup, truncating index
        let mut osc = WaveOsc::new(ctx.clone()).with_wavetable(WT_SIN).with_frequency(440.0);
        osc.reset(0.0);
        group.bench_with_input(BenchmarkId::new("wave_sine", size), &size, |b, _| {
            b.iter(|| run(black_box(&mut osc), black_box(&mut buffer)))
        });

        // Band-limited saw, interpolating index
        let mut osc = WaveOsc::interpolated(ctx.clone()).with_wavetable(WT_SAW).with_frequency(440.0);
        osc.reset(0.0);
        group.bench_with_input(BenchmarkId::new("wave_saw_interp", size), &size, |b, _| {
            b.iter(|| run(black_box(&mut osc), black_box(&mut buffer)))
        });

        // Two table reads per sample
        let mut osc = FmOsc::new(ctx.clone());
        osc.set_frequency(440.0);
        osc.reset(0.0);
        group.bench_with_input(BenchmarkId::new("fm", size), &size, |b, _| {
            b.iter(|| run(black_box(&mut osc), black_box(&mut buffer)))
        });

        // Closed-form sum of harmonics
        let mut osc = BuzzOsc::new(ctx.clone());
        osc.set_frequency(110.0);
        osc.set_harmonics(40);
        osc.reset(0.0);
        group.bench_with_input(BenchmarkId::new("buzz_40", size), &size, |b, _| {
            b.iter(|| run(black_box(&mut osc), black_box(&mut buffer)))
        });
    }

    group.finish();
}
