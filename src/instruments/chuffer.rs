use std::sync::Arc;

use crate::{
    dsp::{
        context::SynthContext,
        envelope::{EnvDef, SegmentEnv},
        filter::{SweepKind, SweptFilter},
        lfo::{Lfo, LfoParams},
        noise::{NoiseHold, WhiteNoise},
        oscillator::WaveOsc,
        wavetable::WT_SIN,
        UnitGen,
    },
    error::LoadError,
    instruments::common::flag,
    patch::Element,
    synth::{
        event::{EventKind, NoteEvent},
        instrument::{apply_event_params, InstrHost, Instrument},
        param_id::{lookup, reverse, table_names, ParamTable, P_GLOBAL},
    },
};

/*
Chuffer
=======

Noise shaped into steam, wind and breath sounds.

    noise ─→ (× ring sine) ─→ × chop gate ─→ bandpass ─→ × AR env ─→ out
                                               ↑
                            fc, q ramp from (1) to (2), plus LFO sweep

The chop gate is a sine folded to 0..1, so at a few Hz it gives the
periodic "chuff" of a steam engine.

The filter centre and Q move linearly from their start to end values over
`fdur` seconds, or over the note duration when `fdur` is 0. With `ftrack`
on, both centre frequencies are multiples of the note frequency instead of
Hz.
*/

const P_ATK: i16 = P_GLOBAL;
const P_CHFRQ: i16 = P_GLOBAL + 1;
const P_CHOP: i16 = P_GLOBAL + 2;
const P_FC1: i16 = P_GLOBAL + 3;
const P_FC2: i16 = P_GLOBAL + 4;
const P_FDUR: i16 = P_GLOBAL + 5;
const P_FLFO: i16 = P_GLOBAL + 6;
const P_FLFOFRQ: i16 = P_GLOBAL + 7;
const P_FQ1: i16 = P_GLOBAL + 8;
const P_FQ2: i16 = P_GLOBAL + 9;
const P_FTRACK: i16 = P_GLOBAL + 10;
const P_NMODE: i16 = P_GLOBAL + 11;
const P_NRATE: i16 = P_GLOBAL + 12;
const P_PK: i16 = P_GLOBAL + 13;
const P_REL: i16 = P_GLOBAL + 14;
const P_RMFRQ: i16 = P_GLOBAL + 15;
const P_RMOD: i16 = P_GLOBAL + 16;

static CHUFFER_PARAMS: ParamTable = ParamTable::new(&[
    ("atk", P_ATK),
    ("chfrq", P_CHFRQ),
    ("chop", P_CHOP),
    ("fc1", P_FC1),
    ("fc2", P_FC2),
    ("fdur", P_FDUR),
    ("flfo", P_FLFO),
    ("flfofrq", P_FLFOFRQ),
    ("fq1", P_FQ1),
    ("fq2", P_FQ2),
    ("ftrack", P_FTRACK),
    ("nmode", P_NMODE),
    ("nrate", P_NRATE),
    ("pk", P_PK),
    ("rel", P_REL),
    ("rmfrq", P_RMFRQ),
    ("rmod", P_RMOD),
]);

/// Noise source selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseMode {
    White,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ChufferSettings {
    noise: NoiseMode,
    noise_rate: f32,
    ring: bool,
    ring_freq: f32,
    chop: bool,
    chop_freq: f32,
    fc: [f32; 2],
    q: [f32; 2],
    sweep_secs: f32,
    track: bool,
    lfo_depth: f32,
    lfo_rate: f32,
    attack: f32,
    peak: f32,
    release: f32,
}

impl Default for ChufferSettings {
    fn default() -> Self {
        Self {
            noise: NoiseMode::White,
            noise_rate: 4000.0,
            ring: false,
            ring_freq: 100.0,
            chop: true,
            chop_freq: 4.0,
            fc: [800.0, 1200.0],
            q: [2.0, 2.0],
            sweep_secs: 0.0,
            track: false,
            lfo_depth: 0.0,
            lfo_rate: 1.0,
            attack: 0.01,
            peak: 1.0,
            release: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chuffer {
    ctx: Arc<SynthContext>,
    set: ChufferSettings,

    white: WhiteNoise,
    hold: NoiseHold,
    ring: WaveOsc,
    gate: WaveOsc,
    filter: SweptFilter,
    lfo: Lfo,
    env: SegmentEnv,

    channel: u16,
    frequency: f32,
    volume: f32,
    sweep_pos: u32,
    sweep_len: u32,
}

impl Chuffer {
    pub const TYPE: &'static str = "Chuffer";

    pub fn new(ctx: Arc<SynthContext>) -> Self {
        let set = ChufferSettings::default();
        let sr = ctx.params.sample_rate;
        Self {
            white: WhiteNoise::new(),
            hold: NoiseHold::new(sr, set.noise_rate),
            ring: WaveOsc::new(ctx.clone()).with_wavetable(WT_SIN),
            gate: WaveOsc::new(ctx.clone()).with_wavetable(WT_SIN),
            filter: SweptFilter::new(sr, SweepKind::BandPass, 1),
            lfo: Lfo::new(ctx.clone(), LfoParams::default()),
            env: SegmentEnv::new(EnvDef::ar(set.attack, set.peak, set.release), sr),
            ctx,
            set,
            channel: 0,
            frequency: 440.0,
            volume: 1.0,
            sweep_pos: 0,
            sweep_len: 1,
        }
    }

    fn sample_rate(&self) -> f32 {
        self.ctx.params.sample_rate
    }

    fn configure(&mut self, evt: &NoteEvent, init_phase: f32) {
        let sr = self.sample_rate();
        self.frequency = evt.frequency;
        self.volume = evt.amplitude();

        self.hold.set_rate(self.set.noise_rate);
        self.hold.reset(init_phase);
        self.white.reset(init_phase);
        self.ring.set_frequency(self.set.ring_freq);
        self.ring.reset(init_phase);
        self.gate.set_frequency(self.set.chop_freq);
        self.gate.reset(init_phase);

        let mut lfo = *self.lfo.params();
        lfo.rate = self.set.lfo_rate;
        lfo.depth = self.set.lfo_depth;
        self.lfo.set_params(lfo);
        self.lfo.reset(init_phase);

        let secs = if self.set.sweep_secs > 0.0 {
            Some(self.set.sweep_secs)
        } else {
            evt.duration_secs(sr)
        };
        self.sweep_len = secs.map_or(1, |s| (s * sr).max(1.0) as u32);

        let mut def = self.env.def().clone();
        def.start = 0.0;
        if let [atk, rel] = def.segments.as_mut_slice() {
            atk.rate = self.set.attack;
            atk.level = self.set.peak;
            rel.rate = self.set.release;
        } else {
            def = EnvDef::ar(self.set.attack, self.set.peak, self.set.release);
        }
        self.env.set_def(def);
    }

    fn center(&self, t: f32) -> (f32, f32) {
        let [fc1, fc2] = self.set.fc;
        let [q1, q2] = self.set.q;
        let mut fc = fc1 + (fc2 - fc1) * t;
        if self.set.track {
            fc *= self.frequency;
        }
        (fc, q1 + (q2 - q1) * t)
    }

    fn get(&self, id: i16) -> Option<f32> {
        let s = &self.set;
        Some(match id {
            P_ATK => s.attack,
            P_CHFRQ => s.chop_freq,
            P_CHOP => flag(s.chop),
            P_FC1 => s.fc[0],
            P_FC2 => s.fc[1],
            P_FDUR => s.sweep_secs,
            P_FLFO => s.lfo_depth,
            P_FLFOFRQ => s.lfo_rate,
            P_FQ1 => s.q[0],
            P_FQ2 => s.q[1],
            P_FTRACK => flag(s.track),
            P_NMODE => flag(s.noise == NoiseMode::Hold),
            P_NRATE => s.noise_rate,
            P_PK => s.peak,
            P_REL => s.release,
            P_RMFRQ => s.ring_freq,
            P_RMOD => flag(s.ring),
            _ => return None,
        })
    }
}

impl Instrument for Chuffer {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    fn instantiate(&self) -> Box<dyn Instrument> {
        Box::new(self.clone())
    }

    fn start(&mut self, _host: &mut dyn InstrHost, evt: &NoteEvent) {
        apply_event_params(self, evt);
        self.channel = evt.channel;
        self.configure(evt, 0.0);
        self.sweep_pos = 0;
        self.filter.reset(0.0);
        self.env.reset(0.0);
    }

    fn param(&mut self, _host: &mut dyn InstrHost, evt: &NoteEvent) {
        if evt.kind == EventKind::Control {
            return;
        }
        apply_event_params(self, evt);
        self.configure(evt, -1.0);
        self.env.reset(-1.0);
    }

    fn stop(&mut self, _host: &mut dyn InstrHost) {
        self.env.release();
    }

    fn tick(&mut self, host: &mut dyn InstrHost) {
        let mut x = match self.set.noise {
            NoiseMode::White => self.white.next_sample(),
            NoiseMode::Hold => self.hold.next_sample(),
        };
        if self.set.ring {
            x *= self.ring.next_sample();
        }
        if self.set.chop {
            x *= (self.gate.next_sample() + 1.0) * 0.5;
        }

        let t = self.sweep_pos as f32 / self.sweep_len as f32;
        if self.sweep_pos < self.sweep_len {
            self.sweep_pos += 1;
        }
        let (mut fc, q) = self.center(t);
        if !self.lfo.is_silent() {
            fc += self.lfo.next_sample();
        }
        let y = self.filter.sample(x, fc, q);
        host.output(self.channel, y * self.env.next_sample() * self.volume);
    }

    fn is_finished(&self) -> bool {
        self.env.is_finished()
    }

    fn get_param(&self, id: i16) -> Option<f32> {
        self.get(id)
    }

    fn set_param(&mut self, id: i16, value: f32) -> bool {
        let s = &mut self.set;
        match id {
            P_ATK => s.attack = value.max(0.0),
            P_CHFRQ => s.chop_freq = value,
            P_CHOP => s.chop = value != 0.0,
            P_FC1 => s.fc[0] = value,
            P_FC2 => s.fc[1] = value,
            P_FDUR => s.sweep_secs = value.max(0.0),
            P_FLFO => s.lfo_depth = value,
            P_FLFOFRQ => s.lfo_rate = value,
            P_FQ1 => s.q[0] = value,
            P_FQ2 => s.q[1] = value,
            P_FTRACK => s.track = value != 0.0,
            P_NMODE => {
                s.noise = if value != 0.0 {
                    NoiseMode::Hold
                } else {
                    NoiseMode::White
                }
            }
            P_NRATE => s.noise_rate = value.max(1.0),
            P_PK => s.peak = value,
            P_REL => s.release = value.max(0.0),
            P_RMFRQ => s.ring_freq = value,
            P_RMOD => s.ring = value != 0.0,
            _ => return false,
        }
        true
    }

    fn map_param_id(&self, name: &str) -> i16 {
        lookup(&[&CHUFFER_PARAMS], name)
    }

    fn map_param_name(&self, id: i16) -> Option<String> {
        reverse(&[&CHUFFER_PARAMS], id)
    }

    fn param_names(&self) -> Vec<String> {
        table_names(&[&CHUFFER_PARAMS])
    }

    fn load(&mut self, el: &Element) -> Result<(), LoadError> {
        for name in CHUFFER_PARAMS.names() {
            if let Some(v) = el.get::<f32>(name)? {
                let id = lookup(&[&CHUFFER_PARAMS], name);
                self.set_param(id, v);
            }
        }
        Ok(())
    }

    fn save(&self, el: &mut Element) {
        for name in CHUFFER_PARAMS.names() {
            if let Some(v) = CHUFFER_PARAMS.id(name).and_then(|id| self.get(id)) {
                el.set_attr(name, v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::instrument::StandaloneHost;

    fn ctx() -> Arc<SynthContext> {
        Arc::new(SynthContext::with_options(16_000.0, 1024, false))
    }

    #[test]
    fn table_is_sorted() {
        assert!(CHUFFER_PARAMS.is_sorted());
    }

    #[test]
    fn names_round_trip() {
        let ch = Chuffer::new(ctx());
        for name in ch.param_names() {
            let id = ch.map_param_id(&name);
            assert!(id >= P_GLOBAL, "{name}");
            assert_eq!(ch.map_param_name(id).as_deref(), Some(name.as_str()));
            assert!(ch.get_param(id).is_some(), "{name}");
        }
    }

    #[test]
    fn chop_gate_pulses() {
        let mut ch = Chuffer::new(ctx());
        ch.set_param(P_CHFRQ, 10.0);
        ch.set_param(P_FQ1, 0.7);
        ch.set_param(P_FQ2, 0.7);
        let mut host = StandaloneHost::new();
        ch.start(&mut host, &NoteEvent::start(0, 0, 60, 261.6));
        let out = host.render_mono(&mut ch, 16_000);

        // 10 Hz gate: energy per 12.5 ms window swings between near-silent and loud
        let windows: Vec<f32> = out.chunks(200).map(|w| w.iter().map(|v| v * v).sum()).collect();
        let max = windows.iter().cloned().fold(0.0, f32::max);
        let min = windows[2..].iter().cloned().fold(f32::MAX, f32::min);
        assert!(max > 0.0);
        assert!(min < max * 0.2, "min {min} max {max}");
    }

    #[test]
    fn sweep_reaches_end_values() {
        let mut ch = Chuffer::new(ctx());
        ch.set_param(P_FDUR, 0.1);
        ch.set_param(P_FTRACK, 1.0);
        ch.set_param(P_FC1, 2.0);
        ch.set_param(P_FC2, 4.0);
        let mut host = StandaloneHost::new();
        ch.start(&mut host, &NoteEvent::start(0, 0, 57, 220.0));
        assert_eq!(ch.center(0.0).0, 440.0);
        host.render_mono(&mut ch, 3200);
        assert_eq!(ch.sweep_pos, ch.sweep_len);
        assert_eq!(ch.center(1.0).0, 880.0);
    }

    #[test]
    fn sweep_over_note_duration() {
        let mut ch = Chuffer::new(ctx());
        let mut host = StandaloneHost::new();
        ch.start(&mut host, &NoteEvent::start(0, 0, 60, 261.6).with_duration(8000));
        assert_eq!(ch.sweep_len, 8000);
    }

    #[test]
    fn save_load_flat_attributes() {
        let mut ch = Chuffer::new(ctx());
        ch.set_param(P_NMODE, 1.0);
        ch.set_param(P_NRATE, 2000.0);
        ch.set_param(P_RMOD, 1.0);
        ch.set_param(P_FC2, 3000.0);
        let mut el = Element::new("instr");
        ch.save(&mut el);
        assert_eq!(el.attr("nmode"), Some("1"));

        let mut other = Chuffer::new(ctx());
        other.load(&el).unwrap();
        assert_eq!(other.set, ch.set);
    }

    #[test]
    fn finishes_after_release() {
        let mut ch = Chuffer::new(ctx());
        let mut host = StandaloneHost::new();
        ch.start(&mut host, &NoteEvent::start(0, 0, 60, 261.6));
        host.render_mono(&mut ch, 400);
        ch.stop(&mut host);
        host.render_mono(&mut ch, 4000);
        assert!(ch.is_finished());
    }
}
