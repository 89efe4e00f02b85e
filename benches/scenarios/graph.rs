//! Benchmarks for ModSynth graphs of increasing size.

use std::hint::black_box;

use basicsynth::{
    graph::When,
    instruments::ModSynth,
    synth::{Instrument, NoteEvent, StandaloneHost},
};
use criterion::{BenchmarkId, Criterion};

use crate::{context, BLOCK_SIZES};

/// `n` oscillators summed into a low-pass, one shared envelope.
fn layered(n: usize) -> ModSynth {
    let mut synth = ModSynth::new(context());
    let g = synth.graph_mut();
    g.add_unit("ENVADSR", "env");
    g.add_unit("LOWPASS", "flt");
    g.set_input("flt.fc", 2000.0);
    for i in 0..n {
        let name = format!("osc{i}");
        g.add_unit("OSCIL", &name);
        g.move_before(&name, "flt");
        g.set_input(&format!("{name}.mul"), (i + 1) as f32);
        g.set_input(&format!("{name}.wt"), 1.0);
        g.connect("@frq", &format!("{name}.frq"), When::GEN);
        g.connect("env", &format!("{name}.amp"), When::GEN);
        g.connect(&name, "flt.in", When::GEN);
    }
    g.connect("flt", "out.in", When::GEN);
    synth
}

pub fn bench_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenarios/graph");

    for &size in BLOCK_SIZES {
        for layers in [1usize, 4, 16] {
            let template = layered(layers);
            let mut host = StandaloneHost::new();
            let mut voice = template.instantiate();
            voice.start(&mut host, &NoteEvent::start(0, 0, 45, 110.0));
            group.bench_with_input(BenchmarkId::new(format!("osc_x{layers}"), size), &size, |b, &n| {
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
