//! ModSynth: an instrument whose voice is a user-built unit graph.

use std::sync::Arc;

use crate::{
    dsp::context::SynthContext,
    error::LoadError,
    graph::{ModGraph, NoteInfo},
    patch::Element,
    synth::{
        event::{EventKind, NoteEvent},
        instrument::{apply_event_params, InstrHost, Instrument},
        mixer::PanLaw,
        param_id::{lookup, reverse},
    },
};

/// Parameters are the graph's `unit.input` names plus the event fields.
/// Pitch-wheel movement retunes `@frq`; velocity only reaches the sound
/// through edges from `@vol`. Setting `out.pan` makes the voice stereo.
#[derive(Debug, Clone)]
pub struct ModSynth {
    ctx: Arc<SynthContext>,
    graph: ModGraph,
    channel: u16,
    frequency: f32,
    volume: f32,
}

impl ModSynth {
    pub const TYPE: &'static str = "ModSynth";

    pub fn new(ctx: Arc<SynthContext>) -> Self {
        Self {
            graph: ModGraph::new(ctx.clone()),
            ctx,
            channel: 0,
            frequency: 440.0,
            volume: 1.0,
        }
    }

    pub fn graph(&self) -> &ModGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ModGraph {
        &mut self.graph
    }

    fn wheel_frequency(&self, host: &dyn InstrHost) -> f32 {
        let cents = host.pitchbend_cents(self.channel);
        if cents == 0.0 {
            self.frequency
        } else {
            self.frequency * self.ctx.params.cents_mult(cents)
        }
    }
}

impl Instrument for ModSynth {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    fn instantiate(&self) -> Box<dyn Instrument> {
        Box::new(Self {
            ctx: self.ctx.clone(),
            graph: self.graph.instantiate(),
            channel: self.channel,
            frequency: self.frequency,
            volume: self.volume,
        })
    }

    fn start(&mut self, host: &mut dyn InstrHost, evt: &NoteEvent) {
        apply_event_params(self, evt);
        self.channel = evt.channel;
        self.frequency = evt.frequency;
        self.volume = evt.amplitude();
        let note = NoteInfo {
            ctx: self.ctx.clone(),
            frequency: self.wheel_frequency(host),
            volume: self.volume,
            pitch: evt.pitch,
            duration: evt.duration_secs(self.ctx.params.sample_rate).unwrap_or(0.0),
        };
        self.graph.start(&note);
    }

    fn param(&mut self, host: &mut dyn InstrHost, evt: &NoteEvent) {
        if evt.kind != EventKind::Control {
            apply_event_params(self, evt);
            self.frequency = evt.frequency;
            self.volume = evt.amplitude();
        }
        let frequency = self.wheel_frequency(host);
        self.graph.update_note(frequency, self.volume);
    }

    fn stop(&mut self, _host: &mut dyn InstrHost) {
        self.graph.stop();
    }

    fn tick(&mut self, host: &mut dyn InstrHost) {
        let out = self.graph.tick();
        match self.graph.pan() {
            Some(pan) => {
                let (l, r) = PanLaw::Trig.gains(pan);
                host.output2(self.channel, out * l, out * r);
            }
            None => host.output(self.channel, out),
        }
    }

    fn is_finished(&self) -> bool {
        self.graph.is_finished()
    }

    fn get_param(&self, id: i16) -> Option<f32> {
        self.graph.get_param(id)
    }

    fn set_param(&mut self, id: i16, value: f32) -> bool {
        self.graph.set_param(id, value)
    }

    fn map_param_id(&self, name: &str) -> i16 {
        match self.graph.param_id(name) {
            Some(id) => id,
            None => lookup(&[], name),
        }
    }

    fn map_param_name(&self, id: i16) -> Option<String> {
        self.graph.param_name(id).or_else(|| reverse(&[], id))
    }

    fn param_names(&self) -> Vec<String> {
        self.graph.param_names()
    }

    fn load(&mut self, el: &Element) -> Result<(), LoadError> {
        if let Some(graph) = el.child("graph") {
            self.graph.load(graph);
        }
        Ok(())
    }

    fn save(&self, el: &mut Element) {
        self.graph.save(el.add_child(Element::new("graph")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{graph::When, synth::instrument::StandaloneHost};

    fn ctx() -> Arc<SynthContext> {
        Arc::new(SynthContext::with_options(8000.0, 1024, false))
    }

    /// @frq → osc, env → osc.amp, osc → out, @vol → out.vol.
    fn patch(ctx: Arc<SynthContext>) -> ModSynth {
        let mut synth = ModSynth::new(ctx);
        let g = synth.graph_mut();
        g.add_unit("ENVAR", "env").unwrap();
        g.add_unit("OSCIL", "osc").unwrap();
        g.set_input("env.atk", 0.005);
        g.set_input("env.rel", 0.02);
        assert!(g.connect("@frq", "osc.frq", When::GEN));
        assert!(g.connect("env", "osc.amp", When::GEN));
        assert!(g.connect("osc", "out.in", When::GEN));
        assert!(g.connect("@vol", "out.vol", When::INIT));
        synth
    }

    #[test]
    fn plays_and_releases() {
        let template = patch(ctx());
        let mut voice = template.instantiate();
        let mut host = StandaloneHost::new();
        voice.start(&mut host, &NoteEvent::start(0, 0, 57, 220.0).with_volume(0.5));
        let out = host.render_mono(voice.as_mut(), 800);
        let peak = out.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!((peak - 0.5).abs() < 0.02, "{peak}");
        assert!(!voice.is_finished());
        voice.stop(&mut host);
        host.render_mono(voice.as_mut(), 400);
        assert!(voice.is_finished());
    }

    #[test]
    fn out_pan_writes_a_stereo_pair() {
        let mut synth = patch(ctx());
        let mut host = StandaloneHost::new();
        synth.start(&mut host, &NoteEvent::start(0, 0, 57, 220.0));
        let frames: Vec<(f32, f32)> = (0..200)
            .map(|_| {
                synth.tick(&mut host);
                host.take()
            })
            .collect();
        assert!(frames.iter().all(|(l, r)| l == r));

        let mut panned = patch(ctx());
        assert!(panned.graph_mut().set_input("out.pan", -1.0));
        panned.start(&mut host, &NoteEvent::start(0, 0, 57, 220.0));
        let mut peak_left = 0.0f32;
        for _ in 0..200 {
            panned.tick(&mut host);
            let (l, r) = host.take();
            assert!(r.abs() < 1e-6, "{r}");
            peak_left = peak_left.max(l.abs());
        }
        assert!(peak_left > 0.5, "{peak_left}");

        let mut el = Element::new("instr");
        panned.save(&mut el);
        let mut reloaded = ModSynth::new(ctx());
        reloaded.load(&el).unwrap();
        assert_eq!(reloaded.graph().pan(), Some(-1.0));
        let mut el = Element::new("instr");
        synth.save(&mut el);
        reloaded.load(&el).unwrap();
        assert_eq!(reloaded.graph().pan(), None);
    }

    #[test]
    fn names_map_through_the_graph() {
        let synth = patch(ctx());
        for name in synth.param_names() {
            let id = synth.map_param_id(&name);
            assert!(id >= 0x100, "{name}");
            assert_eq!(synth.map_param_name(id).as_deref(), Some(name.as_str()));
        }
        assert_eq!(synth.map_param_id("frq"), 5);
        assert_eq!(synth.map_param_name(5).as_deref(), Some("frq"));
        assert_eq!(synth.map_param_id("osc.nothing"), -1);
    }

    #[test]
    fn event_params_reach_units() {
        let mut synth = patch(ctx());
        let id = synth.map_param_id("osc.wt");
        let mut host = StandaloneHost::new();
        synth.start(&mut host, &NoteEvent::start(0, 0, 57, 220.0).with_param(id, 3.0));
        assert_eq!(synth.get_param(id), Some(3.0));
    }

    #[test]
    fn save_load_rebuilds_graph() {
        let synth = patch(ctx());
        let mut el = Element::new("instr");
        synth.save(&mut el);
        let mut other = ModSynth::new(ctx());
        other.load(&el).unwrap();
        assert_eq!(other.graph().order(), synth.graph().order());
        assert_eq!(other.graph().connections(), synth.graph().connections());
        assert_eq!(other.param_names(), synth.param_names());
    }
}
