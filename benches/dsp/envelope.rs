//! Benchmarks for segment and DLS envelopes.

use std::hint::black_box;

use basicsynth::dsp::{
    envelope::{Curve, DlsEnv, DlsParams, EnvDef, SegmentEnv},
    UnitGen,
};
use criterion::{BenchmarkId, Criterion};

use crate::{BLOCK_SIZES, SAMPLE_RATE};

pub fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("dsp/envelope");

    for &size in BLOCK_SIZES {
        let mut buffer = vec![0.0f32; size];

        // Linear ADSR held in its attack/decay stages
        let mut env = SegmentEnv::new(EnvDef::adsr(1.0, 1.0, 0.5, 0.5), SAMPLE_RATE);
        group.bench_with_input(BenchmarkId::new("adsr_linear", size), &size, |b, _| {
            b.iter(|| {
                env.reset(0.0);
                for s in buffer.iter_mut() {
                    *s = black_box(&mut env).next_sample();
                }
            })
        });

        // Exponential curve: one multiply per sample
        let mut env = SegmentEnv::new(EnvDef::adsr(1.0, 1.0, 0.5, 0.5).with_curve(Curve::Exponential), SAMPLE_RATE);
        group.bench_with_input(BenchmarkId::new("adsr_exp", size), &size, |b, _| {
            b.iter(|| {
                env.reset(0.0);
                for s in buffer.iter_mut() {
                    *s = black_box(&mut env).next_sample();
                }
            })
        });

        let params = DlsParams {
            attack: 0.5,
            decay: 1.0,
            sustain: 0.5,
            release: 0.5,
            ..DlsParams::default()
        };
        let mut env = DlsEnv::new(params, SAMPLE_RATE);
        group.bench_with_input(BenchmarkId::new("dls", size), &size, |b, _| {
            b.iter(|| {
                env.reset(0.0);
                for s in buffer.iter_mut() {
                    *s = black_box(&mut env).next_sample();
                }
            })
        });
    }

    group.finish();
}
