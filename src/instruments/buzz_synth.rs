use std::sync::Arc;

use crate::{
    dsp::{
        context::SynthContext,
        envelope::{EnvDef, EnvField, SegmentEnv},
        filter::{SweepKind, SweptFilter},
        oscillator::BuzzOsc,
        UnitGen,
    },
    error::LoadError,
    instruments::common::{flag, load_env_child, parse_short_env, save_env_child, short_env_name, PitchMod},
    patch::Element,
    synth::{
        event::{EventKind, NoteEvent},
        instrument::{apply_event_params, InstrHost, Instrument},
        param_id::{lookup, reverse, split_indexed, table_names, ParamTable, LFO_PB_PARAMS, P_GLOBAL, P_INDEXED},
    },
};

/*
Buzz Synthesis
==============

Two generators, each a classic subtractive voice built on a band-limited
pulse train:

    f × mul ─→ BuzzOsc ─→ SweptFilter ─→ × amp env × vol ─┐
                 ↑             ↑                          (+)─→ out
              mod env      mod or flt env                  │
           (harmonics)       (cutoff)     generator 2 ─────┘

The mod envelope scales the number of active harmonics. With `hmod` = 1 the
pulse starts with only the fundamental at envelope 0 and opens up to the
full count at envelope 1; `hmod` = 0 leaves the count fixed.

Filter Modes
------------

  fixed       cutoff = fc + fdepth × env                 (Hz)
  relative    cutoff = f × (fc + fdepth × env)           (multiples of the
                                                          generator pitch)

Relative mode keeps the timbre constant across the keyboard: a cutoff of
4 × the note stays four harmonics up whatever note is played.

`fenv` picks the envelope: 0 none, 1 the mod envelope, 2 the filter
envelope. LFO and pitch bend are applied to the note frequency before each
generator multiplies it.

Parameter Addresses
-------------------

    0x1000 | gen << 8 | field                 gen{n}.{field}
    0x1000 | gen << 8 | 0x80 | env << 5 | c   gen{n}.eg{a|m|f}{short env field}

gen is 1 or 2; env 0 amp, 1 mod, 2 filter.
*/

pub const BUZZ_GENERATORS: usize = 2;

const P_FSTRIDE: i16 = P_GLOBAL;

static BUZZ_PARAMS: ParamTable = ParamTable::new(&[("fstride", P_FSTRIDE)]);

const GEN_FIELDS: [&str; 13] = [
    "on", "mul", "harm", "ratio", "scale", "vol", "fc", "fq", "fmode", "fenv", "fdepth", "hmod", "ftype",
];

const ENV_TAGS: [&str; 3] = ["a", "m", "f"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuzzEnv {
    Amp,
    Mod,
    Filter,
}

impl BuzzEnv {
    fn index(self) -> usize {
        match self {
            BuzzEnv::Amp => 0,
            BuzzEnv::Mod => 1,
            BuzzEnv::Filter => 2,
        }
    }

    fn from_index(i: usize) -> Option<Self> {
        [BuzzEnv::Amp, BuzzEnv::Mod, BuzzEnv::Filter].get(i).copied()
    }
}

/// Decoded BuzzSynth address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuzzParam {
    Gen { gen: usize, field: usize },
    Env { gen: usize, env: BuzzEnv, field: EnvField },
}

impl BuzzParam {
    pub fn encode(self) -> i16 {
        match self {
            BuzzParam::Gen { gen, field } => P_INDEXED | (gen as i16) << 8 | field as i16,
            BuzzParam::Env { gen, env, field } => {
                P_INDEXED | (gen as i16) << 8 | 0x80 | (env.index() as i16) << 5 | field.code() as i16
            }
        }
    }

    pub fn decode(id: i16) -> Option<Self> {
        if id & !0x0fff != P_INDEXED {
            return None;
        }
        let gen = ((id >> 8) & 0x0f) as usize;
        if !(1..=BUZZ_GENERATORS).contains(&gen) {
            return None;
        }
        let low = (id & 0xff) as usize;
        if low & 0x80 == 0 {
            return (low < GEN_FIELDS.len()).then_some(BuzzParam::Gen { gen, field: low });
        }
        let env = BuzzEnv::from_index((low >> 5) & 3)?;
        let field = EnvField::from_code((low & 0x1f) as u16)?;
        Some(BuzzParam::Env { gen, env, field })
    }

    pub fn name(self) -> String {
        match self {
            BuzzParam::Gen { gen, field } => format!("gen{gen}.{}", GEN_FIELDS[field]),
            BuzzParam::Env { gen, env, field } => {
                format!("gen{gen}.eg{}{}", ENV_TAGS[env.index()], short_env_name(field))
            }
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let (gen, rest) = split_indexed(name, "gen")?;
        if !(1..=BUZZ_GENERATORS).contains(&gen) {
            return None;
        }
        let rest = rest.strip_prefix('.')?;
        if let Some(field) = GEN_FIELDS.iter().position(|f| *f == rest) {
            return Some(BuzzParam::Gen { gen, field });
        }
        let eg = rest.strip_prefix("eg")?;
        let env = ENV_TAGS.iter().position(|t| eg.starts_with(t))?;
        let field = parse_short_env(&eg[1..])?;
        Some(BuzzParam::Env {
            gen,
            env: BuzzEnv::from_index(env)?,
            field,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Fixed,
    Relative,
}

#[derive(Debug, Clone)]
struct BuzzGen {
    on: bool,
    mult: f32,
    harmonics: u32,
    ratio: f32,
    rolloff: f32,
    volume: f32,
    fc: f32,
    fq: f32,
    mode: FilterMode,
    fenv: u8,
    fdepth: f32,
    hmod: f32,
    kind: SweepKind,

    osc: BuzzOsc,
    filter: SweptFilter,
    amp: SegmentEnv,
    modenv: SegmentEnv,
    fltenv: SegmentEnv,
    frequency: f32,
}

impl BuzzGen {
    fn new(ctx: &Arc<SynthContext>, on: bool) -> Self {
        let sr = ctx.params.sample_rate;
        Self {
            on,
            mult: 1.0,
            harmonics: 10,
            ratio: 1.0,
            rolloff: 1.0,
            volume: 1.0,
            fc: 4.0,
            fq: std::f32::consts::FRAC_1_SQRT_2,
            mode: FilterMode::Relative,
            fenv: 0,
            fdepth: 0.0,
            hmod: 0.0,
            kind: SweepKind::LowPass,
            osc: BuzzOsc::new(ctx.clone()),
            filter: SweptFilter::new(sr, SweepKind::LowPass, 1),
            amp: SegmentEnv::new(EnvDef::default(), sr),
            modenv: SegmentEnv::new(EnvDef::adsr(0.0, 0.0, 1.0, 0.0), sr),
            fltenv: SegmentEnv::new(EnvDef::adsr(0.0, 0.0, 1.0, 0.0), sr),
            frequency: 440.0,
        }
    }

    fn env(&self, env: BuzzEnv) -> &SegmentEnv {
        match env {
            BuzzEnv::Amp => &self.amp,
            BuzzEnv::Mod => &self.modenv,
            BuzzEnv::Filter => &self.fltenv,
        }
    }

    fn env_mut(&mut self, env: BuzzEnv) -> &mut SegmentEnv {
        match env {
            BuzzEnv::Amp => &mut self.amp,
            BuzzEnv::Mod => &mut self.modenv,
            BuzzEnv::Filter => &mut self.fltenv,
        }
    }

    fn get(&self, field: usize) -> Option<f32> {
        Some(match GEN_FIELDS.get(field)? {
            &"on" => flag(self.on),
            &"mul" => self.mult,
            &"harm" => self.harmonics as f32,
            &"ratio" => self.ratio,
            &"scale" => self.rolloff,
            &"vol" => self.volume,
            &"fc" => self.fc,
            &"fq" => self.fq,
            &"fmode" => flag(self.mode == FilterMode::Relative),
            &"fenv" => f32::from(self.fenv),
            &"fdepth" => self.fdepth,
            &"hmod" => self.hmod,
            _ => self.kind.index() as f32,
        })
    }

    fn set(&mut self, field: usize, value: f32, sample_rate: f32, stride: u32) -> bool {
        let Some(name) = GEN_FIELDS.get(field) else {
            return false;
        };
        match *name {
            "on" => self.on = value != 0.0,
            "mul" => self.mult = value,
            "harm" => self.harmonics = value.max(1.0) as u32,
            "ratio" => self.ratio = value,
            "scale" => self.rolloff = value,
            "vol" => self.volume = value,
            "fc" => self.fc = value,
            "fq" => self.fq = value,
            "fmode" => {
                self.mode = if value != 0.0 {
                    FilterMode::Relative
                } else {
                    FilterMode::Fixed
                }
            }
            "fenv" => self.fenv = value.clamp(0.0, 2.0) as u8,
            "fdepth" => self.fdepth = value,
            "hmod" => self.hmod = value.clamp(0.0, 1.0),
            _ => {
                self.kind = SweepKind::from_index(value as i32);
                self.filter = SweptFilter::new(sample_rate, self.kind, stride);
            }
        }
        true
    }

    fn configure(&mut self, base: f32, init_phase: f32) {
        self.frequency = base * self.mult;
        self.osc.set_frequency(self.frequency);
        self.osc.set_harmonics(self.harmonics);
        self.osc.set_ratio(self.ratio);
        self.osc.set_rolloff(self.rolloff);
        self.osc.reset(init_phase);
    }

    fn cutoff(&self, env: f32) -> f32 {
        let fc = self.fc + self.fdepth * env;
        match self.mode {
            FilterMode::Fixed => fc,
            FilterMode::Relative => fc * self.frequency,
        }
    }

    #[inline]
    fn tick(&mut self, fm: f32) -> f32 {
        let m = self.modenv.next_sample();
        let f = self.fltenv.next_sample();
        if self.hmod > 0.0 {
            self.osc.set_harmonic_scale(1.0 - self.hmod + self.hmod * m);
        }
        if fm != 0.0 {
            self.osc.modulate_frequency(fm * self.mult);
        }
        let sweep = match self.fenv {
            1 => m,
            2 => f,
            _ => 0.0,
        };
        let x = self.osc.next_sample();
        let y = self.filter.sample(x, self.cutoff(sweep), self.fq);
        y * self.amp.next_sample() * self.volume
    }

    fn load(&mut self, el: &Element) -> Result<(), LoadError> {
        self.on = el.get_bool("on", self.on)?;
        self.mult = el.get_or("mul", self.mult)?;
        self.harmonics = el.get_or("harm", self.harmonics)?;
        self.ratio = el.get_or("ratio", self.ratio)?;
        self.rolloff = el.get_or("scale", self.rolloff)?;
        self.volume = el.get_or("vol", self.volume)?;
        self.fc = el.get_or("fc", self.fc)?;
        self.fq = el.get_or("fq", self.fq)?;
        self.mode = if el.get_bool("fmode", self.mode == FilterMode::Relative)? {
            FilterMode::Relative
        } else {
            FilterMode::Fixed
        };
        self.fenv = el.get_or("fenv", self.fenv)?.min(2);
        self.fdepth = el.get_or("fdepth", self.fdepth)?;
        self.hmod = el.get_or("hmod", self.hmod)?;
        self.kind = SweepKind::from_index(el.get_or("ftype", self.kind.index())?);
        for (env, tag) in [(BuzzEnv::Amp, "amp"), (BuzzEnv::Mod, "mod"), (BuzzEnv::Filter, "flt")] {
            let mut def = self.env(env).def().clone();
            load_env_child(el, tag, &mut def)?;
            self.env_mut(env).set_def(def);
        }
        Ok(())
    }

    fn save(&self, el: &mut Element) {
        el.set_bool("on", self.on);
        el.set_attr("mul", self.mult)
            .set_attr("harm", self.harmonics)
            .set_attr("ratio", self.ratio)
            .set_attr("scale", self.rolloff)
            .set_attr("vol", self.volume)
            .set_attr("fc", self.fc)
            .set_attr("fq", self.fq);
        el.set_bool("fmode", self.mode == FilterMode::Relative);
        el.set_attr("fenv", self.fenv)
            .set_attr("fdepth", self.fdepth)
            .set_attr("hmod", self.hmod)
            .set_attr("ftype", self.kind.index());
        save_env_child(el, "amp", self.amp.def());
        save_env_child(el, "mod", self.modenv.def());
        save_env_child(el, "flt", self.fltenv.def());
    }
}

/// Two filtered pulse generators.
#[derive(Debug, Clone)]
pub struct BuzzSynth {
    ctx: Arc<SynthContext>,
    gens: [BuzzGen; BUZZ_GENERATORS],
    stride: u32,
    pitch: PitchMod,
    channel: u16,
    frequency: f32,
    volume: f32,
}

impl BuzzSynth {
    pub const TYPE: &'static str = "BuzzSynth";

    pub fn new(ctx: Arc<SynthContext>) -> Self {
        Self {
            gens: [BuzzGen::new(&ctx, true), BuzzGen::new(&ctx, false)],
            stride: 1,
            pitch: PitchMod::new(ctx.clone()),
            ctx,
            channel: 0,
            frequency: 440.0,
            volume: 1.0,
        }
    }

    /// Coefficient refresh interval for both filters.
    pub fn set_filter_stride(&mut self, stride: u32) {
        self.stride = stride.max(1);
        for g in &mut self.gens {
            g.filter.set_stride(self.stride);
        }
    }

    pub fn pitch_mod_mut(&mut self) -> &mut PitchMod {
        &mut self.pitch
    }

    fn gen_index(gen: usize) -> usize {
        gen - 1
    }

    fn restart(&mut self, init_phase: f32) {
        for g in &mut self.gens {
            g.configure(self.frequency, init_phase);
            g.filter.reset(init_phase);
            g.amp.reset(init_phase);
            g.modenv.reset(init_phase);
            g.fltenv.reset(init_phase);
        }
    }
}

impl Instrument for BuzzSynth {
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
        self.restart(0.0);
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
        self.restart(-1.0);
        self.pitch.retune(self.frequency);
    }

    fn stop(&mut self, _host: &mut dyn InstrHost) {
        for g in &mut self.gens {
            g.amp.release();
            g.modenv.release();
            g.fltenv.release();
        }
    }

    fn tick(&mut self, host: &mut dyn InstrHost) {
        let fm = self.pitch.next();
        let mut out = 0.0;
        for g in self.gens.iter_mut().filter(|g| g.on) {
            out += g.tick(fm);
        }
        host.output(self.channel, out * self.volume);
    }

    fn is_finished(&self) -> bool {
        self.gens.iter().filter(|g| g.on).all(|g| g.amp.is_finished())
    }

    fn get_param(&self, id: i16) -> Option<f32> {
        if id == P_FSTRIDE {
            return Some(self.stride as f32);
        }
        match BuzzParam::decode(id) {
            Some(BuzzParam::Gen { gen, field }) => self.gens[Self::gen_index(gen)].get(field),
            Some(BuzzParam::Env { gen, env, field }) => {
                Some(self.gens[Self::gen_index(gen)].env(env).def().field(field))
            }
            None => self.pitch.get_param(id),
        }
    }

    fn set_param(&mut self, id: i16, value: f32) -> bool {
        if id == P_FSTRIDE {
            self.set_filter_stride(value.max(1.0) as u32);
            return true;
        }
        let sr = self.ctx.params.sample_rate;
        let stride = self.stride;
        match BuzzParam::decode(id) {
            Some(BuzzParam::Gen { gen, field }) => self.gens[Self::gen_index(gen)].set(field, value, sr, stride),
            Some(BuzzParam::Env { gen, env, field }) => {
                self.gens[Self::gen_index(gen)]
                    .env_mut(env)
                    .def_mut()
                    .set_field(field, value);
                true
            }
            None => self.pitch.set_param(id, value),
        }
    }

    fn map_param_id(&self, name: &str) -> i16 {
        match BuzzParam::parse(name) {
            Some(addr) => addr.encode(),
            None => lookup(&[&BUZZ_PARAMS, &LFO_PB_PARAMS], name),
        }
    }

    fn map_param_name(&self, id: i16) -> Option<String> {
        match BuzzParam::decode(id) {
            Some(addr) => Some(addr.name()),
            None => reverse(&[&BUZZ_PARAMS, &LFO_PB_PARAMS], id),
        }
    }

    fn param_names(&self) -> Vec<String> {
        let mut names = table_names(&[&BUZZ_PARAMS, &LFO_PB_PARAMS]);
        for (i, g) in self.gens.iter().enumerate() {
            let gen = i + 1;
            names.extend((0..GEN_FIELDS.len()).map(|field| BuzzParam::Gen { gen, field }.name()));
            for env in [BuzzEnv::Amp, BuzzEnv::Mod, BuzzEnv::Filter] {
                let segs = g.env(env).def().segments.len();
                names.extend(EnvField::all(segs).map(|field| BuzzParam::Env { gen, env, field }.name()));
            }
        }
        names
    }

    fn load(&mut self, el: &Element) -> Result<(), LoadError> {
        self.stride = el.get_or("fstride", self.stride)?.max(1);
        for child in el.children_named("gen") {
            let n: usize = child.require("n")?;
            if let Some(g) = n.checked_sub(1).and_then(|i| self.gens.get_mut(i)) {
                g.load(child)?;
            }
        }
        let sr = self.ctx.params.sample_rate;
        for g in &mut self.gens {
            g.filter = SweptFilter::new(sr, g.kind, self.stride);
        }
        self.pitch.load(el)
    }

    fn save(&self, el: &mut Element) {
        el.set_attr("fstride", self.stride);
        for (i, g) in self.gens.iter().enumerate() {
            let child = el.add_child(Element::new("gen"));
            child.set_attr("n", i + 1);
            g.save(child);
        }
        self.pitch.save(el);
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
    fn address_layout() {
        let id = BuzzParam::parse("gen2.egmr1").unwrap();
        assert_eq!(
            id,
            BuzzParam::Env {
                gen: 2,
                env: BuzzEnv::Mod,
                field: EnvField::Rate(1)
            }
        );
        assert_eq!(id.encode(), 0x1000 | 2 << 8 | 0x80 | 1 << 5 | 4);
        assert_eq!(BuzzParam::decode(id.encode()), Some(id));
        assert_eq!(BuzzParam::parse("gen3.on"), None);
        assert_eq!(BuzzParam::parse("gen1.egq1"), None);
    }

    #[test]
    fn names_round_trip() {
        let synth = BuzzSynth::new(ctx());
        let names = synth.param_names();
        assert!(names.contains(&"gen2.egmr1".to_string()));
        for name in names {
            let id = synth.map_param_id(&name);
            assert!(id >= 0, "{name}");
            assert_eq!(synth.map_param_name(id).as_deref(), Some(name.as_str()));
        }
    }

    #[test]
    fn second_generator_adds_signal() {
        let mut synth = BuzzSynth::new(ctx());
        let mut host = StandaloneHost::new();
        let evt = NoteEvent::start(0, 0, 57, 220.0);
        synth.start(&mut host, &evt);
        let one: f32 = host.render_mono(&mut synth, 2000)[1000..].iter().map(|v| v * v).sum();

        let on = synth.map_param_id("gen2.on");
        synth.set_param(on, 1.0);
        synth.set_param(synth.map_param_id("gen2.mul"), 2.0);
        synth.start(&mut host, &evt);
        let two: f32 = host.render_mono(&mut synth, 2000)[1000..].iter().map(|v| v * v).sum();
        assert!(two > one * 1.2, "one {one} two {two}");
    }

    #[test]
    fn mod_envelope_opens_harmonics() {
        let mut synth = BuzzSynth::new(ctx());
        synth.set_param(synth.map_param_id("gen1.harm"), 20.0);
        synth.set_param(synth.map_param_id("gen1.hmod"), 1.0);
        synth.gens[0].modenv.set_def(EnvDef::ar(0.1, 1.0, 0.1));
        let mut host = StandaloneHost::new();
        synth.start(&mut host, &NoteEvent::start(0, 0, 45, 110.0));
        synth.tick(&mut host);
        let early = synth.gens[0].osc.active_harmonics();
        host.render_mono(&mut synth, 3000);
        let late = synth.gens[0].osc.active_harmonics();
        assert!(early < 3, "early {early}");
        assert_eq!(late, 20);
    }

    #[test]
    fn finishes_after_release() {
        let mut synth = BuzzSynth::new(ctx());
        let mut host = StandaloneHost::new();
        synth.start(&mut host, &NoteEvent::start(0, 0, 60, 261.6));
        host.render_mono(&mut synth, 500);
        assert!(!synth.is_finished());
        synth.stop(&mut host);
        host.render_mono(&mut synth, 8000);
        assert!(synth.is_finished());
    }

    #[test]
    fn save_load_generators() {
        let mut synth = BuzzSynth::new(ctx());
        synth.set_param(synth.map_param_id("gen2.on"), 1.0);
        synth.set_param(synth.map_param_id("gen2.fc"), 1500.0);
        synth.set_param(synth.map_param_id("gen2.fmode"), 0.0);
        synth.set_param(synth.map_param_id("gen2.egfl1"), 0.3);
        synth.set_filter_stride(8);
        let mut el = Element::new("instr");
        synth.save(&mut el);

        let mut other = BuzzSynth::new(ctx());
        other.load(&el).unwrap();
        for name in ["gen2.on", "gen2.fc", "gen2.fmode", "gen2.egfl1", "fstride"] {
            let id = other.map_param_id(name);
            assert_eq!(other.get_param(id), synth.get_param(id), "{name}");
        }
    }
}
