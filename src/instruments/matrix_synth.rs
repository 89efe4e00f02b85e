use std::sync::Arc;

use tracing::warn;

use crate::{
    dsp::{
        context::SynthContext,
        envelope::{EnvDef, EnvField, SegmentEnv},
        oscillator::WaveOsc,
        wavetable::WT_SIN,
        UnitGen,
    },
    error::LoadError,
    instruments::common::{flag, parse_short_env, short_env_name, PitchMod},
    patch::Element,
    synth::{
        event::{EventKind, NoteEvent},
        instrument::{apply_event_params, InstrHost, Instrument},
        mixer::PanLaw,
        param_id::{lookup, reverse, split_indexed, table_names, LFO_PB_PARAMS, P_INDEXED},
    },
};

/*
Matrix Synthesis
================

Eight oscillators and eight envelopes, freely cross-wired:

    env 0..7 ──────────────────────────────┐ (each gen picks one by `eg`)
                                           ↓
    gen k:  f × mul ─→ WaveOsc ─→ × env[eg] ─→ gen_output[k]
               ↑          ↑
         lfo/pb (flags)   pm_term[k] = Σ gen_output[j] × mnx[j]
                                       for j in mask[k]

Each tick runs in three passes:

  1. every envelope advances once
  2. every enabled generator advances, reading last tick's pm_term
  3. pm_term is rebuilt from this tick's outputs

so a modulation path always carries one sample of delay. This makes the
result independent of generator order and lets a generator modulate
itself (feedback FM).

Routing Flags
-------------

One 32-bit word per generator; the bits below are assigned, the rest are
kept as loaded.

  on        generator runs at all
  out       gen_output × vol goes to the channel
  fx1..fx4  gen_output × fxl{n} goes to effects unit n-1
  trem      generator is a tremolo source: its output is not heard but
            scales every `tremin` generator by 1 - vol × (1 - s)/2
  tremin    generator receives tremolo
  panon     generator uses its own pan position instead of mono output
  lfoin     LFO vibrato applies
  pbin      pitch bend applies

The pitch wheel always applies.

Parameter Addresses
-------------------

    0x1000 | gen << 8 | field          gen{n}.{field}, gen{n}.mi{k}
    0x2000 | env << 8 | code           env{n}.{st|sus|r{k}|l{k}|t{k}|x{k}}

Generators and envelopes are numbered from 0. The 16-bit modulation mask
leaves room for 16 generators; bits above 7 are ignored.
*/

pub const MATRIX_GENS: usize = 8;
pub const MATRIX_ENVS: usize = 8;

const P_ENV_BASE: i16 = 0x2000;

/// Routing flag bits.
pub mod flags {
    pub const OUT: u32 = 0x001;
    pub const FX1: u32 = 0x002;
    pub const FX2: u32 = 0x004;
    pub const FX3: u32 = 0x008;
    pub const FX4: u32 = 0x010;
    pub const TREM: u32 = 0x020;
    pub const TREMIN: u32 = 0x040;
    pub const PAN: u32 = 0x080;
    pub const ON: u32 = 0x100;
    pub const LFOIN: u32 = 0x200;
    pub const PBIN: u32 = 0x400;

    pub const FX: [u32; 4] = [FX1, FX2, FX3, FX4];
    pub const FX_ANY: u32 = FX1 | FX2 | FX3 | FX4;
}

const FLAG_NAMES: [(&str, u32); 11] = [
    ("out", flags::OUT),
    ("fx1", flags::FX1),
    ("fx2", flags::FX2),
    ("fx3", flags::FX3),
    ("fx4", flags::FX4),
    ("trem", flags::TREM),
    ("tremin", flags::TREMIN),
    ("panon", flags::PAN),
    ("on", flags::ON),
    ("lfoin", flags::LFOIN),
    ("pbin", flags::PBIN),
];

const F_MUL: usize = 0;
const F_WT: usize = 1;
const F_VOL: usize = 2;
const F_MNX: usize = 3;
const F_EG: usize = 4;
const F_PAN: usize = 5;
const F_FXL1: usize = 6;
const F_MASK: usize = 10;
const F_FLAG0: usize = 16;
const F_MI0: usize = 0x40;

const VALUE_NAMES: [&str; 11] = ["mul", "wt", "vol", "mnx", "eg", "pan", "fxl1", "fxl2", "fxl3", "fxl4", "mask"];

/// Decoded MatrixSynth address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixParam {
    /// A numeric generator setting.
    Gen { gen: usize, field: usize },
    /// One routing flag.
    Flag { gen: usize, flag: u32 },
    /// One bit of the modulation-input mask.
    ModIn { gen: usize, from: usize },
    Env { env: usize, field: EnvField },
}

impl MatrixParam {
    pub fn encode(self) -> i16 {
        match self {
            MatrixParam::Gen { gen, field } => P_INDEXED | (gen as i16) << 8 | field as i16,
            MatrixParam::Flag { gen, flag } => {
                let bit = flag.trailing_zeros() as i16;
                P_INDEXED | (gen as i16) << 8 | (F_FLAG0 as i16 + bit)
            }
            MatrixParam::ModIn { gen, from } => P_INDEXED | (gen as i16) << 8 | (F_MI0 + from) as i16,
            MatrixParam::Env { env, field } => P_ENV_BASE | (env as i16) << 8 | field.code() as i16,
        }
    }

    pub fn decode(id: i16) -> Option<Self> {
        let index = ((id >> 8) & 0x0f) as usize;
        let low = (id & 0xff) as usize;
        match id & !0x0fff {
            P_INDEXED if index < MATRIX_GENS => {
                let gen = index;
                match low {
                    l if l < VALUE_NAMES.len() => Some(MatrixParam::Gen { gen, field: l }),
                    l if (F_FLAG0..F_FLAG0 + FLAG_NAMES.len()).contains(&l) => Some(MatrixParam::Flag {
                        gen,
                        flag: 1 << (l - F_FLAG0),
                    }),
                    l if (F_MI0..F_MI0 + MATRIX_GENS).contains(&l) => Some(MatrixParam::ModIn { gen, from: l - F_MI0 }),
                    _ => None,
                }
            }
            P_ENV_BASE if index < MATRIX_ENVS => {
                let field = EnvField::from_code(low as u16)?;
                Some(MatrixParam::Env { env: index, field })
            }
            _ => None,
        }
    }

    pub fn name(self) -> String {
        match self {
            MatrixParam::Gen { gen, field } => format!("gen{gen}.{}", VALUE_NAMES[field]),
            MatrixParam::Flag { gen, flag } => {
                let name = FLAG_NAMES.iter().find(|(_, f)| *f == flag).map_or("?", |(n, _)| n);
                format!("gen{gen}.{name}")
            }
            MatrixParam::ModIn { gen, from } => format!("gen{gen}.mi{from}"),
            MatrixParam::Env { env, field } => format!("env{env}.{}", short_env_name(field)),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        if let Some((env, rest)) = split_indexed(name, "env") {
            let field = parse_short_env(rest.strip_prefix('.')?)?;
            return (env < MATRIX_ENVS).then_some(MatrixParam::Env { env, field });
        }
        let (gen, rest) = split_indexed(name, "gen")?;
        if gen >= MATRIX_GENS {
            return None;
        }
        let rest = rest.strip_prefix('.')?;
        if let Some(field) = VALUE_NAMES.iter().position(|n| *n == rest) {
            return Some(MatrixParam::Gen { gen, field });
        }
        if let Some((_, flag)) = FLAG_NAMES.iter().find(|(n, _)| *n == rest) {
            return Some(MatrixParam::Flag { gen, flag: *flag });
        }
        let from: usize = rest.strip_prefix("mi")?.parse().ok()?;
        (from < MATRIX_GENS).then_some(MatrixParam::ModIn { gen, from })
    }
}

#[derive(Debug, Clone)]
struct MatrixGen {
    flags: u32,
    mult: f32,
    wt: usize,
    volume: f32,
    mod_level: f32,
    env: usize,
    pan: f32,
    fx: [f32; 4],
    mask: u16,
    osc: WaveOsc,
}

impl MatrixGen {
    fn new(ctx: &Arc<SynthContext>) -> Self {
        Self {
            flags: 0,
            mult: 1.0,
            wt: WT_SIN,
            volume: 1.0,
            mod_level: 0.0,
            env: 0,
            pan: 0.0,
            fx: [0.0; 4],
            mask: 0,
            osc: WaveOsc::new(ctx.clone()),
        }
    }

    fn has(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    fn get(&self, field: usize) -> Option<f32> {
        Some(match field {
            F_MUL => self.mult,
            F_WT => self.wt as f32,
            F_VOL => self.volume,
            F_MNX => self.mod_level,
            F_EG => self.env as f32,
            F_PAN => self.pan,
            f if (F_FXL1..F_FXL1 + 4).contains(&f) => self.fx[f - F_FXL1],
            F_MASK => f32::from(self.mask),
            _ => return None,
        })
    }

    fn set(&mut self, field: usize, value: f32) -> bool {
        match field {
            F_MUL => self.mult = value,
            F_WT => self.wt = value.max(0.0) as usize,
            F_VOL => self.volume = value,
            F_MNX => self.mod_level = value,
            F_EG => self.env = (value.max(0.0) as usize).min(MATRIX_ENVS - 1),
            F_PAN => self.pan = value.clamp(-1.0, 1.0),
            f if (F_FXL1..F_FXL1 + 4).contains(&f) => self.fx[f - F_FXL1] = value,
            F_MASK => self.mask = value.clamp(0.0, f32::from(u16::MAX)) as u16,
            _ => return false,
        }
        true
    }
}

/// Eight generators by eight envelopes with a modulation matrix.
#[derive(Debug, Clone)]
pub struct MatrixSynth {
    gens: [MatrixGen; MATRIX_GENS],
    envs: [SegmentEnv; MATRIX_ENVS],
    env_out: [f32; MATRIX_ENVS],
    gen_out: [f32; MATRIX_GENS],
    pm_term: [f32; MATRIX_GENS],
    pitch: PitchMod,
    channel: u16,
    frequency: f32,
    volume: f32,
}

impl MatrixSynth {
    pub const TYPE: &'static str = "MatrixSynth";

    /// Generator 0 on and routed to the output, the rest off.
    pub fn new(ctx: Arc<SynthContext>) -> Self {
        let sr = ctx.params.sample_rate;
        let mut gens: [MatrixGen; MATRIX_GENS] = std::array::from_fn(|_| MatrixGen::new(&ctx));
        gens[0].flags = flags::ON | flags::OUT;
        Self {
            gens,
            envs: std::array::from_fn(|_| SegmentEnv::new(EnvDef::default(), sr)),
            env_out: [0.0; MATRIX_ENVS],
            gen_out: [0.0; MATRIX_GENS],
            pm_term: [0.0; MATRIX_GENS],
            pitch: PitchMod::new(ctx),
            channel: 0,
            frequency: 440.0,
            volume: 1.0,
        }
    }

    pub fn set_flags(&mut self, gen: usize, flags: u32) {
        if let Some(g) = self.gens.get_mut(gen) {
            g.flags = flags;
        } else {
            warn!(gen, "MatrixSynth generator out of range");
        }
    }

    /// Frequency multiple, output volume and modulation index of a generator.
    pub fn set_gen(&mut self, gen: usize, mult: f32, volume: f32, mod_level: f32) {
        if let Some(g) = self.gens.get_mut(gen) {
            g.mult = mult;
            g.volume = volume;
            g.mod_level = mod_level;
        }
    }

    /// `gen` takes phase modulation from every generator whose bit is set.
    pub fn set_mod_mask(&mut self, gen: usize, mask: u16) {
        if let Some(g) = self.gens.get_mut(gen) {
            g.mask = mask;
        }
    }

    pub fn set_gen_envelope(&mut self, gen: usize, env: usize) {
        if let Some(g) = self.gens.get_mut(gen) {
            g.env = env.min(MATRIX_ENVS - 1);
        }
    }

    pub fn set_envelope(&mut self, env: usize, def: EnvDef) {
        if let Some(e) = self.envs.get_mut(env) {
            e.set_def(def);
        }
    }

    /// Phase modulation (radians) `gen` will read on the next tick.
    pub fn phase_mod_term(&self, gen: usize) -> f32 {
        self.pm_term.get(gen).copied().unwrap_or(0.0)
    }

    /// Oscillator × envelope output of `gen` on the last tick.
    pub fn gen_output(&self, gen: usize) -> f32 {
        self.gen_out.get(gen).copied().unwrap_or(0.0)
    }

    pub fn pitch_mod_mut(&mut self) -> &mut PitchMod {
        &mut self.pitch
    }

    fn configure(&mut self, init_phase: f32) {
        for g in &mut self.gens {
            g.osc.set_wavetable(g.wt);
            g.osc.set_frequency(self.frequency * g.mult);
            g.osc.reset(init_phase);
        }
        for e in &mut self.envs {
            e.reset(init_phase);
        }
        if init_phase >= 0.0 {
            self.pm_term = [0.0; MATRIX_GENS];
            self.gen_out = [0.0; MATRIX_GENS];
        }
    }

    /// Envelopes used by audible generators.
    fn audible_envs(&self) -> impl Iterator<Item = usize> + '_ {
        self.gens
            .iter()
            .filter(|g| g.has(flags::ON) && g.flags & (flags::OUT | flags::FX_ANY) != 0)
            .map(|g| g.env)
    }
}

impl Instrument for MatrixSynth {
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
        self.configure(0.0);
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
        self.configure(-1.0);
        self.pitch.retune(self.frequency);
    }

    fn stop(&mut self, _host: &mut dyn InstrHost) {
        for e in &mut self.envs {
            e.release();
        }
    }

    fn tick(&mut self, host: &mut dyn InstrHost) {
        for (out, env) in self.env_out.iter_mut().zip(&mut self.envs) {
            *out = env.next_sample();
        }

        let (wheel, lfo, pb) = self.pitch.next_parts();
        let mut trem = 0.0;
        for (k, g) in self.gens.iter_mut().enumerate() {
            if !g.has(flags::ON) {
                self.gen_out[k] = 0.0;
                continue;
            }
            let mut fm = wheel;
            if g.has(flags::LFOIN) {
                fm += lfo;
            }
            if g.has(flags::PBIN) {
                fm += pb;
            }
            if fm != 0.0 {
                g.osc.modulate_frequency(fm * g.mult);
            }
            if self.pm_term[k] != 0.0 {
                g.osc.phase_mod_wt(self.pm_term[k]);
            }
            let s = g.osc.next_sample();
            self.gen_out[k] = s * self.env_out[g.env];
            if g.has(flags::TREM) {
                trem += g.volume * self.env_out[g.env] * (1.0 - s) * 0.5;
            }
        }

        for (k, g) in self.gens.iter().enumerate() {
            let mut pm = 0.0;
            if g.mask != 0 {
                for j in 0..MATRIX_GENS {
                    if g.mask & (1 << j) != 0 {
                        pm += self.gen_out[j] * self.gens[j].mod_level;
                    }
                }
            }
            self.pm_term[k] = pm;
        }

        let trem_gain = (1.0 - trem).max(0.0);
        let mut mono = 0.0;
        let (mut left, mut right) = (0.0, 0.0);
        for (k, g) in self.gens.iter().enumerate() {
            if !g.has(flags::ON) || g.has(flags::TREM) {
                continue;
            }
            let mut v = self.gen_out[k] * self.volume;
            if g.has(flags::TREMIN) {
                v *= trem_gain;
            }
            if g.has(flags::OUT) {
                if g.has(flags::PAN) {
                    let (l, r) = PanLaw::Trig.gains(g.pan);
                    left += v * g.volume * l;
                    right += v * g.volume * r;
                } else {
                    mono += v * g.volume;
                }
            }
            for (unit, bit) in flags::FX.iter().enumerate() {
                if g.has(*bit) {
                    host.fx_send(unit, v * g.fx[unit]);
                }
            }
        }
        host.output(self.channel, mono);
        if left != 0.0 || right != 0.0 {
            host.output2(self.channel, left, right);
        }
    }

    fn is_finished(&self) -> bool {
        self.audible_envs().all(|e| self.envs[e].is_finished())
    }

    fn get_param(&self, id: i16) -> Option<f32> {
        match MatrixParam::decode(id) {
            Some(MatrixParam::Gen { gen, field }) => self.gens[gen].get(field),
            Some(MatrixParam::Flag { gen, flag: f }) => Some(flag(self.gens[gen].has(f))),
            Some(MatrixParam::ModIn { gen, from }) => Some(flag(self.gens[gen].mask & (1 << from) != 0)),
            Some(MatrixParam::Env { env, field }) => Some(self.envs[env].def().field(field)),
            None => self.pitch.get_param(id),
        }
    }

    fn set_param(&mut self, id: i16, value: f32) -> bool {
        match MatrixParam::decode(id) {
            Some(MatrixParam::Gen { gen, field }) => return self.gens[gen].set(field, value),
            Some(MatrixParam::Flag { gen, flag }) => {
                let g = &mut self.gens[gen];
                if value != 0.0 {
                    g.flags |= flag;
                } else {
                    g.flags &= !flag;
                }
            }
            Some(MatrixParam::ModIn { gen, from }) => {
                let g = &mut self.gens[gen];
                if value != 0.0 {
                    g.mask |= 1 << from;
                } else {
                    g.mask &= !(1 << from);
                }
            }
            Some(MatrixParam::Env { env, field }) => self.envs[env].def_mut().set_field(field, value),
            None => return self.pitch.set_param(id, value),
        }
        true
    }

    fn map_param_id(&self, name: &str) -> i16 {
        match MatrixParam::parse(name) {
            Some(addr) => addr.encode(),
            None => lookup(&[&LFO_PB_PARAMS], name),
        }
    }

    fn map_param_name(&self, id: i16) -> Option<String> {
        match MatrixParam::decode(id) {
            Some(addr) => Some(addr.name()),
            None => reverse(&[&LFO_PB_PARAMS], id),
        }
    }

    fn param_names(&self) -> Vec<String> {
        let mut names = table_names(&[&LFO_PB_PARAMS]);
        for gen in 0..MATRIX_GENS {
            names.extend((0..VALUE_NAMES.len()).map(|field| MatrixParam::Gen { gen, field }.name()));
            names.extend(FLAG_NAMES.iter().map(|(_, flag)| MatrixParam::Flag { gen, flag: *flag }.name()));
            names.extend((0..MATRIX_GENS).map(|from| MatrixParam::ModIn { gen, from }.name()));
        }
        for (env, e) in self.envs.iter().enumerate() {
            names.extend(EnvField::all(e.def().segments.len()).map(|field| MatrixParam::Env { env, field }.name()));
        }
        names
    }

    fn load(&mut self, el: &Element) -> Result<(), LoadError> {
        for child in el.children_named("gen") {
            let n: usize = child.require("n")?;
            let Some(g) = self.gens.get_mut(n) else {
                warn!(n, "MatrixSynth generator out of range, skipped");
                continue;
            };
            g.mult = child.get_or("mul", g.mult)?;
            g.wt = child.get_or("wt", g.wt)?;
            g.volume = child.get_or("vol", g.volume)?;
            g.mod_level = child.get_or("mnx", g.mod_level)?;
            g.env = child.get_or("eg", g.env)?.min(MATRIX_ENVS - 1);
            g.pan = child.get_or("pan", g.pan)?;
            for (i, fx) in g.fx.iter_mut().enumerate() {
                *fx = child.get_or(&format!("fxl{}", i + 1), *fx)?;
            }
            g.mask = child.get_or("mask", g.mask)?;
            g.flags = child.get_or("flags", g.flags)?;
        }
        for child in el.children_named("env") {
            let n: usize = child.require("n")?;
            match self.envs.get_mut(n) {
                Some(e) => e.set_def(EnvDef::load(child)?),
                None => warn!(n, "MatrixSynth envelope out of range, skipped"),
            }
        }
        self.pitch.load(el)
    }

    fn save(&self, el: &mut Element) {
        for (n, g) in self.gens.iter().enumerate() {
            let child = el.add_child(Element::new("gen"));
            child
                .set_attr("n", n)
                .set_attr("mul", g.mult)
                .set_attr("wt", g.wt)
                .set_attr("vol", g.volume)
                .set_attr("mnx", g.mod_level)
                .set_attr("eg", g.env)
                .set_attr("pan", g.pan);
            for (i, fx) in g.fx.iter().enumerate() {
                child.set_attr(&format!("fxl{}", i + 1), fx);
            }
            child.set_attr("mask", g.mask).set_attr("flags", g.flags);
        }
        for (n, e) in self.envs.iter().enumerate() {
            let child = el.add_child(Element::new("env"));
            child.set_attr("n", n);
            e.def().save(child);
        }
        self.pitch.save(el);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::instrument::StandaloneHost;

    fn ctx() -> Arc<SynthContext> {
        Arc::new(SynthContext::with_options(16_000.0, 2048, false))
    }

    #[test]
    fn address_layout() {
        let mi = MatrixParam::parse("gen3.mi1").unwrap();
        assert_eq!(mi, MatrixParam::ModIn { gen: 3, from: 1 });
        assert_eq!(mi.encode(), 0x1000 | 3 << 8 | 0x41);
        let env = MatrixParam::parse("env4.r2").unwrap();
        assert_eq!(
            env,
            MatrixParam::Env {
                env: 4,
                field: EnvField::Rate(2)
            }
        );
        assert_eq!(env.encode(), 0x2000 | 4 << 8 | 8);
        assert_eq!(MatrixParam::parse("gen8.mul"), None);
        assert_eq!(MatrixParam::parse("gen0.mi8"), None);
    }

    #[test]
    fn names_round_trip() {
        let m = MatrixSynth::new(ctx());
        let names = m.param_names();
        assert!(names.contains(&"gen7.pbin".to_string()));
        for name in names {
            let id = m.map_param_id(&name);
            assert!(id >= 0, "{name}");
            assert_eq!(m.map_param_name(id).as_deref(), Some(name.as_str()), "{id:#x}");
        }
    }

    #[test]
    fn modulation_lands_on_next_tick() {
        let mut m = MatrixSynth::new(ctx());
        m.set_flags(1, flags::ON);
        m.set_gen(1, 2.0, 0.0, 3.0);
        m.set_mod_mask(0, 0b10);
        let mut host = StandaloneHost::new();
        m.start(&mut host, &NoteEvent::start(0, 0, 60, 261.6));

        assert_eq!(m.phase_mod_term(0), 0.0);
        for _ in 0..50 {
            m.tick(&mut host);
            let expected = m.gen_output(1) * 3.0;
            assert!((m.phase_mod_term(0) - expected).abs() < 1e-6);
        }
        assert!(m.gen_output(1) != 0.0);
        assert_eq!(m.phase_mod_term(1), 0.0);
    }

    #[test]
    fn flags_by_name() {
        let mut m = MatrixSynth::new(ctx());
        let id = m.map_param_id("gen2.tremin");
        assert!(m.set_param(id, 1.0));
        assert_eq!(m.gens[2].flags, flags::TREMIN);
        assert_eq!(m.get_param(id), Some(1.0));
        let mi = m.map_param_id("gen2.mi5");
        m.set_param(mi, 1.0);
        assert_eq!(m.get_param(m.map_param_id("gen2.mask")), Some(32.0));
    }

    #[test]
    fn fx_routing_sends() {
        let mut m = MatrixSynth::new(ctx());
        m.set_flags(0, flags::ON | flags::FX2);
        m.gens[0].fx[1] = 0.5;
        let mut host = StandaloneHost::new();
        m.start(&mut host, &NoteEvent::start(0, 0, 69, 440.0));
        let mut fx = 0.0;
        let mut dry = 0.0;
        for _ in 0..400 {
            m.tick(&mut host);
            fx += host.take_fx(1).abs();
            dry += host.take().0.abs();
        }
        assert!(fx > 0.0);
        assert_eq!(dry, 0.0);
    }

    #[test]
    fn tremolo_dips_output() {
        let note = NoteEvent::start(0, 0, 69, 440.0);
        let mut host = StandaloneHost::new();
        let mut plain = MatrixSynth::new(ctx());
        plain.start(&mut host, &note);
        let a = host.render_mono(&mut plain, 4000);

        let mut trem = MatrixSynth::new(ctx());
        trem.set_flags(0, flags::ON | flags::OUT | flags::TREMIN);
        trem.set_flags(1, flags::ON | flags::TREM);
        trem.set_gen(1, 0.01, 1.0, 0.0);
        trem.start(&mut host, &note);
        let b = host.render_mono(&mut trem, 4000);

        let e = |x: &[f32]| x.iter().map(|v| v * v).sum::<f32>();
        assert!(e(&b) < e(&a) * 0.9);
    }

    #[test]
    fn finishes_with_audible_envelopes() {
        let mut m = MatrixSynth::new(ctx());
        m.set_envelope(0, EnvDef::ar(0.001, 1.0, 0.01));
        m.set_flags(3, flags::ON);
        m.set_gen_envelope(3, 5);
        let mut host = StandaloneHost::new();
        m.start(&mut host, &NoteEvent::start(0, 0, 60, 261.6));
        host.render_mono(&mut m, 100);
        m.stop(&mut host);
        host.render_mono(&mut m, 400);
        // env 5 drives a silent modulator only
        assert!(m.is_finished());
    }

    #[test]
    fn save_load_matrix() {
        let mut m = MatrixSynth::new(ctx());
        m.set_flags(4, flags::ON | flags::PAN | flags::OUT | 1 << 24);
        m.set_mod_mask(4, 0b101);
        m.set_gen_envelope(4, 6);
        m.set_envelope(6, EnvDef::ar(0.3, 0.6, 0.9));
        let mut el = Element::new("instr");
        m.save(&mut el);

        let mut other = MatrixSynth::new(ctx());
        other.load(&el).unwrap();
        assert_eq!(other.gens[4].flags, m.gens[4].flags);
        assert_eq!(other.gens[4].flags >> 24, 1);
        assert_eq!(other.gens[4].mask, 0b101);
        assert_eq!(other.gens[4].env, 6);
        assert_eq!(other.envs[6].def(), m.envs[6].def());
    }
}
