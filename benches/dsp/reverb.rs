//! Benchmarks for the Schroeder reverb.

use std::hint::black_box;

use basicsynth::dsp::{reverb::Reverb, UnitGen};
use criterion::{BenchmarkId, Criterion};

use crate::{BLOCK_SIZES, SAMPLE_RATE};

pub fn bench_reverb(c: &mut Criterion) {
    let mut group = c.benchmark_group("dsp/reverb");

    for &size in BLOCK_SIZES {
        let mut buffer = vec![0.0f32; size];

        // Four combs and two all-passes per sample
        let mut reverb = Reverb::new(SAMPLE_RATE, 1.5);
        reverb.set_mix(0.3);
        group.bench_with_input(BenchmarkId::new("schroeder", size), &size, |b, _| {
            b.iter(|| {
                for (i, s) in buffer.iter_mut().enumerate() {
                    *s = black_box(&mut reverb).sample(if i % 64 == 0 { 0.5 } else { 0.0 });
                }
            })
        });
    }

    group.finish();
}
