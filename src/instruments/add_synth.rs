use std::sync::Arc;

use crate::{
    dsp::{
        context::SynthContext,
        envelope::{EnvDef, EnvField, SegmentEnv},
        oscillator::WaveOsc,
        wavetable::WT_SIN,
        UnitGen,
    },
    error::LoadError,
    instruments::common::{load_env_child, save_env_child, PitchMod},
    patch::Element,
    synth::{
        event::{EventKind, NoteEvent},
        instrument::{apply_event_params, InstrHost, Instrument},
        param_id::{lookup, reverse, split_indexed, table_names, ParamTable, LFO_PB_PARAMS, P_GLOBAL, P_INDEXED},
    },
};

/*
Additive Synthesis
==================

Sum of independently enveloped partials. Each partial is a wavetable
oscillator at a multiple of the note frequency with its own level and its
own envelope, so the spectrum can evolve: upper partials decaying faster
than the fundamental is the classic struck-string shape.

    f ─┬─ ×m0 → osc(wt0) × env0 × v0 ─┐
       ├─ ×m1 → osc(wt1) × env1 × v1 ─┼─(+)─ × volume ─→ out
       └─ ×mN → osc(wtN) × envN × vN ─┘

One LFO and one pitch bend serve all partials. The deviation is scaled by
each partial's multiple, so the partials stay in tune with each other while
the note wobbles.

Parameter Addresses
-------------------

    0x1000 | partial << 8 | field

    field 0x00..      mul, wt, vol            p{n}.mul  p{n}.wt  p{n}.vol
    field 0x80 | c    envelope field code c   p{n}.st   p{n}.sus  p{n}s{k}.rt
*/

pub const MAX_PARTIALS: usize = 16;

const P_PARTS: i16 = P_GLOBAL;
const FIELD_MUL: i16 = 0;
const FIELD_WT: i16 = 1;
const FIELD_VOL: i16 = 2;
const FIELD_ENV: i16 = 0x80;

static ADD_PARAMS: ParamTable = ParamTable::new(&[("parts", P_PARTS)]);

/// Decoded AddSynth address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddParam {
    Mul(usize),
    Wavetable(usize),
    Volume(usize),
    Env(usize, EnvField),
}

impl AddParam {
    pub fn encode(self) -> i16 {
        let (part, low) = match self {
            AddParam::Mul(p) => (p, FIELD_MUL),
            AddParam::Wavetable(p) => (p, FIELD_WT),
            AddParam::Volume(p) => (p, FIELD_VOL),
            AddParam::Env(p, f) => (p, FIELD_ENV | f.code() as i16),
        };
        P_INDEXED | (part as i16) << 8 | low
    }

    pub fn decode(id: i16) -> Option<Self> {
        if id & !0x0fff != P_INDEXED {
            return None;
        }
        let part = ((id >> 8) & 0x0f) as usize;
        let low = id & 0xff;
        match low {
            FIELD_MUL => Some(AddParam::Mul(part)),
            FIELD_WT => Some(AddParam::Wavetable(part)),
            FIELD_VOL => Some(AddParam::Volume(part)),
            l if l & FIELD_ENV != 0 => {
                EnvField::from_code((l & 0x7f) as u16).map(|f| AddParam::Env(part, f))
            }
            _ => None,
        }
    }

    pub fn name(self) -> String {
        match self {
            AddParam::Mul(p) => format!("p{p}.mul"),
            AddParam::Wavetable(p) => format!("p{p}.wt"),
            AddParam::Volume(p) => format!("p{p}.vol"),
            AddParam::Env(p, f @ (EnvField::Start | EnvField::Sustain)) => format!("p{p}.{}", f.name()),
            AddParam::Env(p, f) => format!("p{p}{}", f.name()),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let (part, rest) = split_indexed(name, "p")?;
        if part >= MAX_PARTIALS {
            return None;
        }
        match rest.strip_prefix('.') {
            Some("mul") => Some(AddParam::Mul(part)),
            Some("wt") => Some(AddParam::Wavetable(part)),
            Some("vol") => Some(AddParam::Volume(part)),
            Some(field @ ("st" | "sus")) => EnvField::parse(field).map(|f| AddParam::Env(part, f)),
            Some(_) => None,
            None => EnvField::parse(rest).map(|f| AddParam::Env(part, f)),
        }
    }
}

#[derive(Debug, Clone)]
struct AddPartial {
    mult: f32,
    wt: usize,
    volume: f32,
    osc: WaveOsc,
    env: SegmentEnv,
}

impl AddPartial {
    fn new(ctx: &Arc<SynthContext>, mult: f32) -> Self {
        Self {
            mult,
            wt: WT_SIN,
            volume: 1.0,
            osc: WaveOsc::interpolated(ctx.clone()),
            env: SegmentEnv::new(EnvDef::default(), ctx.params.sample_rate),
        }
    }
}

/// Summed partials with per-partial envelopes.
#[derive(Debug, Clone)]
pub struct AddSynth {
    ctx: Arc<SynthContext>,
    parts: Vec<AddPartial>,
    pitch: PitchMod,
    channel: u16,
    frequency: f32,
    volume: f32,
}

impl AddSynth {
    pub const TYPE: &'static str = "AddSynth";

    pub fn new(ctx: Arc<SynthContext>) -> Self {
        let mut synth = Self {
            pitch: PitchMod::new(ctx.clone()),
            ctx,
            parts: Vec::new(),
            channel: 0,
            frequency: 440.0,
            volume: 1.0,
        };
        synth.set_partial_count(1);
        synth
    }

    pub fn partial_count(&self) -> usize {
        self.parts.len()
    }

    /// New partials default to consecutive harmonics.
    pub fn set_partial_count(&mut self, count: usize) {
        let count = count.min(MAX_PARTIALS);
        while self.parts.len() < count {
            let mult = (self.parts.len() + 1) as f32;
            self.parts.push(AddPartial::new(&self.ctx, mult));
        }
        self.parts.truncate(count);
    }

    /// Configure partial `index`, growing the list if needed.
    pub fn set_partial(&mut self, index: usize, mult: f32, volume: f32, env: EnvDef) {
        if index >= MAX_PARTIALS {
            return;
        }
        if index >= self.parts.len() {
            self.set_partial_count(index + 1);
        }
        let part = &mut self.parts[index];
        part.mult = mult;
        part.volume = volume;
        part.env.set_def(env);
    }

    pub fn set_partial_wavetable(&mut self, index: usize, wt: usize) {
        if let Some(part) = self.parts.get_mut(index) {
            part.wt = wt;
        }
    }

    pub fn pitch_mod_mut(&mut self) -> &mut PitchMod {
        &mut self.pitch
    }

    fn tune(&mut self, init_phase: f32) {
        for part in &mut self.parts {
            part.osc.set_wavetable(part.wt);
            part.osc.set_frequency(self.frequency * part.mult);
            part.osc.reset(init_phase);
        }
    }
}

impl Instrument for AddSynth {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    fn instantiate(&self) -> Box<dyn Instrument> {
        Box::new(self.clone())
    }

    fn start(&mut self, host: &mut dyn InstrHost, evt: &NoteEvent) {
        apply_event_params(self, evt);
        self.channel = evt.channel;
        self.frequency = evt.frequency;
        self.volume = evt.amplitude();
        self.tune(0.0);
        for part in &mut self.parts {
            part.env.reset(0.0);
        }
        self.pitch.start(host, self.channel, self.frequency);
    }

    fn param(&mut self, host: &mut dyn InstrHost, evt: &NoteEvent) {
        if evt.kind == EventKind::Control {
            self.pitch.update_wheel(host);
            return;
        }
        apply_event_params(self, evt);
        self.frequency = evt.frequency;
        self.volume = evt.amplitude();
        self.tune(-1.0);
        for part in &mut self.parts {
            part.env.reset(-1.0);
        }
        self.pitch.retune(self.frequency);
    }

    fn stop(&mut self, _host: &mut dyn InstrHost) {
        for part in &mut self.parts {
            part.env.release();
        }
    }

    fn tick(&mut self, host: &mut dyn InstrHost) {
        let fm = self.pitch.next();
        let mut sum = 0.0;
        for part in &mut self.parts {
            if fm != 0.0 {
                part.osc.modulate_frequency(fm * part.mult);
            }
            sum += part.osc.next_sample() * part.env.next_sample() * part.volume;
        }
        host.output(self.channel, sum * self.volume);
    }

    fn is_finished(&self) -> bool {
        self.parts.iter().all(|p| p.env.is_finished())
    }

    fn get_param(&self, id: i16) -> Option<f32> {
        if id == P_PARTS {
            return Some(self.parts.len() as f32);
        }
        match AddParam::decode(id) {
            Some(addr) => {
                let part = match addr {
                    AddParam::Mul(p) | AddParam::Wavetable(p) | AddParam::Volume(p) | AddParam::Env(p, _) => {
                        self.parts.get(p)?
                    }
                };
                Some(match addr {
                    AddParam::Mul(_) => part.mult,
                    AddParam::Wavetable(_) => part.wt as f32,
                    AddParam::Volume(_) => part.volume,
                    AddParam::Env(_, f) => part.env.def().field(f),
                })
            }
            None => self.pitch.get_param(id),
        }
    }

    fn set_param(&mut self, id: i16, value: f32) -> bool {
        if id == P_PARTS {
            self.set_partial_count(value.max(0.0) as usize);
            return true;
        }
        let Some(addr) = AddParam::decode(id) else {
            return self.pitch.set_param(id, value);
        };
        let (AddParam::Mul(p) | AddParam::Wavetable(p) | AddParam::Volume(p) | AddParam::Env(p, _)) = addr;
        let Some(part) = self.parts.get_mut(p) else {
            return false;
        };
        match addr {
            AddParam::Mul(_) => part.mult = value,
            AddParam::Wavetable(_) => part.wt = value.max(0.0) as usize,
            AddParam::Volume(_) => part.volume = value,
            AddParam::Env(_, f) => part.env.def_mut().set_field(f, value),
        }
        true
    }

    fn map_param_id(&self, name: &str) -> i16 {
        match AddParam::parse(name) {
            Some(addr) => addr.encode(),
            None => lookup(&[&ADD_PARAMS, &LFO_PB_PARAMS], name),
        }
    }

    fn map_param_name(&self, id: i16) -> Option<String> {
        match AddParam::decode(id) {
            Some(addr) => Some(addr.name()),
            None => reverse(&[&ADD_PARAMS, &LFO_PB_PARAMS], id),
        }
    }

    fn param_names(&self) -> Vec<String> {
        let mut names = table_names(&[&ADD_PARAMS, &LFO_PB_PARAMS]);
        for (i, part) in self.parts.iter().enumerate() {
            names.push(AddParam::Mul(i).name());
            names.push(AddParam::Wavetable(i).name());
            names.push(AddParam::Volume(i).name());
            names.extend(EnvField::all(part.env.def().segments.len()).map(|f| AddParam::Env(i, f).name()));
        }
        names
    }

    fn load(&mut self, el: &Element) -> Result<(), LoadError> {
        let parts: Vec<&Element> = el.children_named("part").take(MAX_PARTIALS).collect();
        if !parts.is_empty() {
            self.set_partial_count(parts.len());
        }
        for (part, child) in self.parts.iter_mut().zip(parts) {
            part.mult = child.get_or("mul", part.mult)?;
            part.wt = child.get_or("wt", part.wt)?;
            part.volume = child.get_or("vol", part.volume)?;
            let mut def = part.env.def().clone();
            load_env_child(child, "env", &mut def)?;
            part.env.set_def(def);
        }
        self.pitch.load(el)
    }

    fn save(&self, el: &mut Element) {
        for part in &self.parts {
            let child = el.add_child(Element::new("part"));
            child
                .set_attr("mul", part.mult)
                .set_attr("wt", part.wt)
                .set_attr("vol", part.volume);
            save_env_child(child, "env", part.env.def());
        }
        self.pitch.save(el);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::instrument::StandaloneHost;

    fn ctx() -> Arc<SynthContext> {
        Arc::new(SynthContext::with_options(8000.0, 1024, false))
    }

    #[test]
    fn address_layout() {
        assert_eq!(AddParam::Mul(0).encode(), 0x1000);
        assert_eq!(AddParam::Volume(3).encode(), 0x1302);
        assert_eq!(AddParam::Env(1, EnvField::Rate(0)).encode(), 0x1180);
        assert_eq!(AddParam::Env(1, EnvField::Start).encode(), 0x1180 | 28);
        assert_eq!(AddParam::parse("p1s0.rt"), Some(AddParam::Env(1, EnvField::Rate(0))));
        assert_eq!(AddParam::parse("p2.sus"), Some(AddParam::Env(2, EnvField::Sustain)));
        assert_eq!(AddParam::parse("p16.mul"), None);
        assert_eq!(AddParam::parse("p1.bogus"), None);
    }

    #[test]
    fn names_round_trip() {
        let mut synth = AddSynth::new(ctx());
        synth.set_partial_count(4);
        for name in synth.param_names() {
            let id = synth.map_param_id(&name);
            assert!(id >= 0, "{name}");
            assert_eq!(synth.map_param_name(id).as_deref(), Some(name.as_str()));
        }
    }

    #[test]
    fn finishes_when_every_partial_has() {
        let mut synth = AddSynth::new(ctx());
        synth.set_partial(0, 1.0, 1.0, EnvDef::ar(0.01, 1.0, 0.01));
        synth.set_partial(1, 2.0, 0.5, EnvDef::ar(0.01, 1.0, 0.2));
        let mut host = StandaloneHost::new();
        synth.start(&mut host, &NoteEvent::start(0, 0, 57, 220.0));
        host.render_mono(&mut synth, 200);
        synth.stop(&mut host);
        host.render_mono(&mut synth, 200);
        assert!(synth.parts[0].env.is_finished());
        assert!(!synth.is_finished());
        host.render_mono(&mut synth, 2000);
        assert!(synth.is_finished());
    }

    #[test]
    fn partials_sit_at_multiples() {
        let mut synth = AddSynth::new(ctx());
        synth.set_partial_count(3);
        synth.start(&mut StandaloneHost::new(), &NoteEvent::start(0, 0, 45, 110.0));
        let freqs: Vec<f32> = synth.parts.iter().map(|p| p.osc.frequency()).collect();
        assert_eq!(freqs, vec![110.0, 220.0, 330.0]);
    }

    #[test]
    fn set_by_id_and_save_load() {
        let mut synth = AddSynth::new(ctx());
        let id = synth.map_param_id("p2.vol");
        assert!(!synth.set_param(id, 0.3), "partial 2 does not exist yet");
        synth.set_param(P_PARTS, 3.0);
        assert!(synth.set_param(id, 0.3));
        synth.set_param(synth.map_param_id("p1s1.lvl"), 0.25);

        let mut el = Element::new("instr");
        synth.save(&mut el);
        let mut other = AddSynth::new(ctx());
        other.load(&el).unwrap();
        assert_eq!(other.partial_count(), 3);
        assert_eq!(other.get_param(id), Some(0.3));
        assert_eq!(other.get_param(other.map_param_id("p1s1.lvl")), Some(0.25));
    }
}
