//! Benchmarks for delay lines.

use std::hint::black_box;

use basicsynth::dsp::{
    delay::{AllPassDelay, CombDelay, DelayLine, Flanger},
    UnitGen,
};
use criterion::{BenchmarkId, Criterion};

use crate::{context, BLOCK_SIZES, SAMPLE_RATE};

fn run(unit: &mut dyn UnitGen, buffer: &mut [f32]) {
    for (i, s) in buffer.iter_mut().enumerate() {
        *s = unit.sample(if i == 0 { 1.0 } else { 0.0 });
    }
}

pub fn bench_delay(c: &mut Criterion) {
    let mut group = c.benchmark_group("dsp/delay");

    for &size in BLOCK_SIZES {
        let mut buffer = vec![0.0f32; size];

        let mut line = DelayLine::new(0.25, SAMPLE_RATE);
        group.bench_with_input(BenchmarkId::new("plain", size), &size, |b, _| {
            b.iter(|| run(black_box(&mut line), black_box(&mut buffer)))
        });

        let mut comb = CombDelay::new(0.03, 1.0, SAMPLE_RATE);
        group.bench_with_input(BenchmarkId::new("comb", size), &size, |b, _| {
            b.iter(|| run(black_box(&mut comb), black_box(&mut buffer)))
        });

        let mut ap = AllPassDelay::new(0.005, 0.1, SAMPLE_RATE);
        group.bench_with_input(BenchmarkId::new("allpass", size), &size, |b, _| {
            b.iter(|| run(black_box(&mut ap), black_box(&mut buffer)))
        });

        // Interpolated read position swept by an LFO
        let mut flanger = Flanger::new(context(), 0.004, 0.003, 0.3);
        group.bench_with_input(BenchmarkId::new("flanger", size), &size, |b, _| {
            b.iter(|| run(black_box(&mut flanger), black_box(&mut buffer)))
        });
    }

    group.finish();
}
