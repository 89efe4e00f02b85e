//! Benchmarks for single instrument voices.
//!
//! Each voice is started on A2 and ticked through a StandaloneHost, so the
//! numbers include the host calls an instrument makes per sample.

use std::{hint::black_box, sync::Arc};

use basicsynth::{
    dsp::{envelope::EnvDef, filter::SweepKind, wavetable::WT_SAW},
    instruments::{AddSynth, BuzzSynth, Chuffer, FmSynth, GmPlayer, MatrixSynth, SubSynth, ToneInstr},
    soundbank::{BankRegistry, LoopMode, Sample, SbInstrument, SoundBank, Zone},
    synth::{Instrument, NoteEvent, StandaloneHost},
};
use criterion::{BenchmarkId, Criterion};

use crate::{context, BLOCK_SIZES, SAMPLE_RATE};

fn sample_bank() -> Arc<BankRegistry> {
    let data: Vec<f32> = (0..4800).map(|i| (i as f32 * 0.0577).sin()).collect();
    let sample = Sample::new("sine", SAMPLE_RATE, data).with_loop(0, 4800);
    let mut zone = Zone::new(Arc::new(sample)).with_root(57);
    zone.loop_mode = LoopMode::Continuous;
    zone.filter_fc = 9000.0;
    zone.vib_lfo_to_pitch = 15.0;
    let registry = BankRegistry::new();
    let bank = SoundBank::new("bench").with_instrument(SbInstrument::new("sine", 0, 0).with_zone(zone));
    if let Err(err) = registry.insert(bank) {
        panic!("bench bank: {err}");
    }
    registry
}

pub fn bench_voices(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenarios/voices");
    let ctx = context();
    let registry = sample_bank();

    let mut tone = ToneInstr::new(ctx.clone());
    tone.set_wavetable(WT_SAW);
    let mut sub = SubSynth::new(ctx.clone());
    sub.set_filter(SweepKind::ResonLowpass, 500.0, 4.0, 2000.0);
    sub.set_envelopes(EnvDef::adsr(0.01, 0.2, 0.6, 0.2), EnvDef::adsr(0.01, 0.4, 0.2, 0.2));
    let mut gm = GmPlayer::new(ctx.clone());
    gm.set_bank(registry.lock("bench").ok());

    let voices: Vec<(&str, Box<dyn Instrument>)> = vec![
        ("tone_saw", Box::new(tone)),
        ("tone_fm", Box::new(ToneInstr::fm(ctx.clone()))),
        ("sub_reson_lp", Box::new(sub)),
        ("fm_synth", Box::new(FmSynth::new(ctx.clone()))),
        ("buzz_synth", Box::new(BuzzSynth::new(ctx.clone()))),
        ("add_synth", Box::new(AddSynth::new(ctx.clone()))),
        ("chuffer", Box::new(Chuffer::new(ctx.clone()))),
        ("matrix_synth", Box::new(MatrixSynth::new(ctx.clone()))),
        ("gm_player", Box::new(gm)),
    ];

    for &size in BLOCK_SIZES {
        for (name, template) in &voices {
            let mut host = StandaloneHost::new();
            let mut voice = template.instantiate();
            voice.start(&mut host, &NoteEvent::start(0, 0, 45, 110.0));
            group.bench_with_input(BenchmarkId::new(*name, size), &size, |b, &n| {
                b.iter(|| {
                    for _ in 0..n {
                        voice.tick(&mut host);
                        black_box(host.take());
                    }
                })
            });
        }
    }

    group.finish();
}
