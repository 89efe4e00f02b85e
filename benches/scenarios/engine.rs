//! Benchmarks for the instrument manager rendering many voices.

use std::hint::black_box;

use basicsynth::{
    dsp::wavetable::WT_SAW,
    instruments::{SubSynth, ToneInstr},
    io::MidiEvent,
    synth::InstrManager,
    EngineConfig,
};
use criterion::{BenchmarkId, Criterion};

use crate::{BLOCK_SIZES, SAMPLE_RATE};

fn engine(voices: u8) -> InstrManager {
    let config = EngineConfig {
        sample_rate: SAMPLE_RATE,
        ..EngineConfig::default()
    };
    let mut manager = InstrManager::new(&config);
    let ctx = manager.context().clone();
    let mut tone = ToneInstr::new(ctx.clone());
    tone.set_wavetable(WT_SAW);
    manager.add_instrument(0, Box::new(tone));
    manager.add_instrument(1, Box::new(SubSynth::new(ctx)));
    for i in 0..voices {
        manager.handle_midi(MidiEvent::NoteOn {
            channel: i % 2,
            key: 40 + i,
            velocity: 100,
        });
    }
    manager
}

pub fn bench_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenarios/engine");

    for &size in BLOCK_SIZES {
        let mut out = vec![0.0f32; size * 2];
        for voices in [8u8, 32] {
            let mut manager = engine(voices);
            group.bench_with_input(BenchmarkId::new(format!("voices_{voices}"), size), &size, |b, _| {
                b.iter(|| manager.render(black_box(&mut out)))
            });
        }
    }

    group.finish();
}
