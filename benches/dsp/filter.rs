//! Benchmarks for fixed and swept filters.

use std::hint::black_box;

use basicsynth::dsp::{
    filter::{Biquad, FilterType, Reson, SweepKind, SweptFilter},
    noise::WhiteNoise,
    UnitGen,
};
use criterion::{BenchmarkId, Criterion};

use crate::{BLOCK_SIZES, SAMPLE_RATE};

fn noise_block(size: usize) -> Vec<f32> {
    let mut noise = WhiteNoise::new();
    (0..size).map(|_| noise.next_sample()).collect()
}

pub fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("dsp/filter");

    for &size in BLOCK_SIZES {
        let input = noise_block(size);
        let mut buffer = vec![0.0f32; size];

        let mut lp = Biquad::new(SAMPLE_RATE, FilterType::LowPass);
        lp.calc_coef(1200.0, 0.707);
        group.bench_with_input(BenchmarkId::new("biquad_lowpass", size), &size, |b, _| {
            b.iter(|| {
                for (out, &x) in buffer.iter_mut().zip(&input) {
                    *out = black_box(&mut lp).sample(x);
                }
            })
        });

        let mut reson = Reson::new(SAMPLE_RATE);
        reson.calc_coef(800.0, 10.0);
        group.bench_with_input(BenchmarkId::new("reson", size), &size, |b, _| {
            b.iter(|| {
                for (out, &x) in buffer.iter_mut().zip(&input) {
                    *out = black_box(&mut reson).sample(x);
                }
            })
        });

        // Cutoff moves every sample; coefficients refresh per stride
        for stride in [1u32, 16] {
            let mut swept = SweptFilter::new(SAMPLE_RATE, SweepKind::LowPass, stride);
            group.bench_with_input(BenchmarkId::new(format!("swept_stride_{stride}"), size), &size, |b, _| {
                b.iter(|| {
                    for (i, (out, &x)) in buffer.iter_mut().zip(&input).enumerate() {
                        let fc = 400.0 + i as f32 * 4.0;
                        *out = black_box(&mut swept).sample(x, fc, 1.0);
                    }
                })
            });
        }
    }

    group.finish();
}
