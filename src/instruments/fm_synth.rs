use std::sync::Arc;

use tracing::warn;

use crate::{
    dsp::{
        context::SynthContext,
        delay::AllPassDelay,
        envelope::{EnvDef, EnvField, SegmentEnv},
        noise::NoiseHold,
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
        mixer::PanLaw,
        param_id::{lookup, reverse, split_indexed, table_names, ParamTable, LFO_PB_PARAMS, P_GLOBAL, P_INDEXED},
    },
};

/*
Three-Operator FM
=================

Operator 1 is always a carrier. Operators 2 and 3 are carriers or
modulators depending on the algorithm:

    Stack     3 → 2 → 1 → out
    Stack2    3 → 2 → 1 → out,  3 → out     (stack plus the top as a tone)
    Wye       2 → 1 → out,      3 → 1       (two modulators in parallel)
    Delta     3 → 1 → out,      3 → 2 → out (one modulator, two carriers)

For a carrier, `vol` is the output level. For a modulator it is the peak
modulation index in radians, so the operator's envelope shapes the
brightness over the note.

Modulator output feeds the target's phase (`phase_mod_wt`) on the same
tick: operators run top-down, 3 then 2 then 1.

After the operators:

    noise × noise env × nvol ──┐
                              (+)─→ all-pass delay (optional) ─→ pan ─→ out
    operators ─────────────────┘

The all-pass delay adds a short metallic ring (bells, plates). Panning is
internal: with `panon` set the voice writes both sides itself.

Parameter Addresses
-------------------

    0x1000 | op << 8 | field            op{n}.mul  op{n}.wt  op{n}.vol
    0x1000 | op << 8 | 0x80 | code      op{n}.env.{field}
    0x1000 | 0x80 | code                noise.env.{field}

op is 1..=3; op 0 is the noise layer.
*/

pub const FM_OPERATORS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FmAlgorithm {
    #[default]
    Stack,
    Stack2,
    Wye,
    Delta,
}

impl FmAlgorithm {
    pub fn from_index(index: i32) -> Self {
        match index {
            1 => FmAlgorithm::Stack2,
            2 => FmAlgorithm::Wye,
            3 => FmAlgorithm::Delta,
            _ => FmAlgorithm::Stack,
        }
    }

    pub fn index(self) -> i32 {
        match self {
            FmAlgorithm::Stack => 0,
            FmAlgorithm::Stack2 => 1,
            FmAlgorithm::Wye => 2,
            FmAlgorithm::Delta => 3,
        }
    }

    /// Is operator `op` (1-based) heard directly?
    pub fn is_carrier(self, op: usize) -> bool {
        match self {
            FmAlgorithm::Stack | FmAlgorithm::Wye => op == 1,
            FmAlgorithm::Stack2 => op == 1 || op == 3,
            FmAlgorithm::Delta => op == 1 || op == 2,
        }
    }
}

const P_ALG: i16 = P_GLOBAL;
const P_DLYD: i16 = P_GLOBAL + 1;
const P_DLYM: i16 = P_GLOBAL + 2;
const P_DLYT: i16 = P_GLOBAL + 3;
const P_NRT: i16 = P_GLOBAL + 4;
const P_NVOL: i16 = P_GLOBAL + 5;
const P_PAN: i16 = P_GLOBAL + 6;
const P_PANON: i16 = P_GLOBAL + 7;

static FM_PARAMS: ParamTable = ParamTable::new(&[
    ("alg", P_ALG),
    ("dlyd", P_DLYD),
    ("dlym", P_DLYM),
    ("dlyt", P_DLYT),
    ("nrt", P_NRT),
    ("nvol", P_NVOL),
    ("pan", P_PAN),
    ("panon", P_PANON),
]);

const OP_FIELDS: [&str; 3] = ["mul", "wt", "vol"];

/// Decoded FMSynth address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmParam {
    Op { op: usize, field: usize },
    OpEnv { op: usize, field: EnvField },
    NoiseEnv(EnvField),
}

impl FmParam {
    pub fn encode(self) -> i16 {
        match self {
            FmParam::Op { op, field } => P_INDEXED | (op as i16) << 8 | field as i16,
            FmParam::OpEnv { op, field } => P_INDEXED | (op as i16) << 8 | 0x80 | field.code() as i16,
            FmParam::NoiseEnv(field) => P_INDEXED | 0x80 | field.code() as i16,
        }
    }

    pub fn decode(id: i16) -> Option<Self> {
        if id & !0x0fff != P_INDEXED {
            return None;
        }
        let op = ((id >> 8) & 0x0f) as usize;
        let low = id & 0xff;
        if op > FM_OPERATORS {
            return None;
        }
        if low & 0x80 != 0 {
            let field = EnvField::from_code((low & 0x7f) as u16)?;
            return Some(if op == 0 {
                FmParam::NoiseEnv(field)
            } else {
                FmParam::OpEnv { op, field }
            });
        }
        let field = low as usize;
        (op > 0 && field < OP_FIELDS.len()).then_some(FmParam::Op { op, field })
    }

    pub fn name(self) -> String {
        match self {
            FmParam::Op { op, field } => format!("op{op}.{}", OP_FIELDS[field]),
            FmParam::OpEnv { op, field } => format!("op{op}.env.{}", field.name()),
            FmParam::NoiseEnv(field) => format!("noise.env.{}", field.name()),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        if let Some(rest) = name.strip_prefix("noise.env.") {
            return EnvField::parse(rest).map(FmParam::NoiseEnv);
        }
        let (op, rest) = split_indexed(name, "op")?;
        if !(1..=FM_OPERATORS).contains(&op) {
            return None;
        }
        let rest = rest.strip_prefix('.')?;
        if let Some(env) = rest.strip_prefix("env.") {
            return EnvField::parse(env).map(|field| FmParam::OpEnv { op, field });
        }
        let field = OP_FIELDS.iter().position(|f| *f == rest)?;
        Some(FmParam::Op { op, field })
    }
}

#[derive(Debug, Clone)]
struct Operator {
    mult: f32,
    wt: usize,
    volume: f32,
    osc: WaveOsc,
    env: SegmentEnv,
}

impl Operator {
    fn new(ctx: &Arc<SynthContext>, mult: f32, volume: f32) -> Self {
        Self {
            mult,
            wt: WT_SIN,
            volume,
            osc: WaveOsc::new(ctx.clone()),
            env: SegmentEnv::new(EnvDef::default(), ctx.params.sample_rate),
        }
    }

    fn get(&self, field: usize) -> Option<f32> {
        match field {
            0 => Some(self.mult),
            1 => Some(self.wt as f32),
            2 => Some(self.volume),
            _ => None,
        }
    }

    fn set(&mut self, field: usize, value: f32) -> bool {
        match field {
            0 => self.mult = value,
            1 => self.wt = value.max(0.0) as usize,
            2 => self.volume = value,
            _ => return false,
        }
        true
    }

    #[inline]
    fn tick(&mut self, pm: f32, fm: f32) -> f32 {
        if pm != 0.0 {
            self.osc.phase_mod_wt(pm);
        }
        if fm != 0.0 {
            self.osc.modulate_frequency(fm * self.mult);
        }
        self.osc.next_sample() * self.env.next_sample() * self.volume
    }
}

/// Three operators, four algorithms, a noise layer and a resonant tail.
#[derive(Debug, Clone)]
pub struct FmSynth {
    ctx: Arc<SynthContext>,
    algorithm: FmAlgorithm,
    ops: [Operator; FM_OPERATORS],

    noise_vol: f32,
    noise_rate: f32,
    noise: NoiseHold,
    noise_env: SegmentEnv,

    delay_time: f32,
    delay_decay: f32,
    delay_mix: f32,
    delay: Option<AllPassDelay>,

    pan_on: bool,
    pan: f32,

    pitch: PitchMod,
    channel: u16,
    frequency: f32,
    volume: f32,
}

impl FmSynth {
    pub const TYPE: &'static str = "FMSynth";

    pub fn new(ctx: Arc<SynthContext>) -> Self {
        let sr = ctx.params.sample_rate;
        Self {
            algorithm: FmAlgorithm::Stack,
            ops: [
                Operator::new(&ctx, 1.0, 1.0),
                Operator::new(&ctx, 1.0, 2.0),
                Operator::new(&ctx, 2.0, 0.0),
            ],
            noise_vol: 0.0,
            noise_rate: 0.0,
            noise: NoiseHold::new(sr, sr),
            noise_env: SegmentEnv::new(EnvDef::ar(0.001, 1.0, 0.05), sr),
            delay_time: 0.0,
            delay_decay: 0.5,
            delay_mix: 0.0,
            delay: None,
            pan_on: false,
            pan: 0.0,
            pitch: PitchMod::new(ctx.clone()),
            ctx,
            channel: 0,
            frequency: 440.0,
            volume: 1.0,
        }
    }

    pub fn algorithm(&self) -> FmAlgorithm {
        self.algorithm
    }

    pub fn set_algorithm(&mut self, algorithm: FmAlgorithm) {
        self.algorithm = algorithm;
    }

    /// Configure operator `op` (1-based).
    pub fn set_operator(&mut self, op: usize, mult: f32, volume: f32, env: EnvDef) {
        let Some(o) = op.checked_sub(1).and_then(|i| self.ops.get_mut(i)) else {
            warn!(op, "FMSynth operator out of range");
            return;
        };
        o.mult = mult;
        o.volume = volume;
        o.env.set_def(env);
    }

    pub fn set_noise(&mut self, volume: f32, rate: f32, env: EnvDef) {
        self.noise_vol = volume;
        self.noise_rate = rate;
        self.noise_env.set_def(env);
    }

    /// All-pass delay tail. `seconds` of 0 turns it off.
    pub fn set_delay(&mut self, seconds: f32, decay: f32, mix: f32) {
        self.delay_time = seconds;
        self.delay_decay = decay;
        self.delay_mix = mix;
    }

    pub fn set_pan(&mut self, on: bool, pan: f32) {
        self.pan_on = on;
        self.pan = pan.clamp(-1.0, 1.0);
    }

    pub fn pitch_mod_mut(&mut self) -> &mut PitchMod {
        &mut self.pitch
    }

    fn configure(&mut self, init_phase: f32) {
        let sr = self.ctx.params.sample_rate;
        for op in &mut self.ops {
            op.osc.set_wavetable(op.wt);
            op.osc.set_frequency(self.frequency * op.mult);
            op.osc.reset(init_phase);
            op.env.reset(init_phase);
        }
        self.noise.set_rate(if self.noise_rate > 0.0 { self.noise_rate } else { sr });
        self.noise.reset(init_phase);
        self.noise_env.reset(init_phase);
        if init_phase >= 0.0 {
            // reallocate only when a note starts
            self.delay = (self.delay_time > 0.0 && self.delay_mix > 0.0)
                .then(|| AllPassDelay::new(self.delay_time, self.delay_decay, sr));
        }
    }

    fn operators_out(&mut self, fm: f32) -> f32 {
        let [o1, o2, o3] = &mut self.ops;
        match self.algorithm {
            FmAlgorithm::Stack => {
                let m3 = o3.tick(0.0, fm);
                let m2 = o2.tick(m3, fm);
                o1.tick(m2, fm)
            }
            FmAlgorithm::Stack2 => {
                let m3 = o3.tick(0.0, fm);
                let m2 = o2.tick(m3, fm);
                o1.tick(m2, fm) + m3
            }
            FmAlgorithm::Wye => {
                let m3 = o3.tick(0.0, fm);
                let m2 = o2.tick(0.0, fm);
                o1.tick(m2 + m3, fm)
            }
            FmAlgorithm::Delta => {
                let m3 = o3.tick(0.0, fm);
                o2.tick(m3, fm) + o1.tick(m3, fm)
            }
        }
    }

    fn get(&self, id: i16) -> Option<f32> {
        Some(match id {
            P_ALG => self.algorithm.index() as f32,
            P_DLYD => self.delay_decay,
            P_DLYM => self.delay_mix,
            P_DLYT => self.delay_time,
            P_NRT => self.noise_rate,
            P_NVOL => self.noise_vol,
            P_PAN => self.pan,
            P_PANON => f32::from(u8::from(self.pan_on)),
            _ => return None,
        })
    }
}

impl Instrument for FmSynth {
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
        for op in &mut self.ops {
            op.env.release();
        }
        self.noise_env.release();
    }

    fn tick(&mut self, host: &mut dyn InstrHost) {
        let fm = self.pitch.next();
        let mut out = self.operators_out(fm);
        if self.noise_vol != 0.0 {
            out += self.noise.next_sample() * self.noise_env.next_sample() * self.noise_vol;
        }
        if let Some(ap) = &mut self.delay {
            out += ap.sample(out) * self.delay_mix;
        }
        out *= self.volume;
        if self.pan_on {
            let (l, r) = PanLaw::Trig.gains(self.pan);
            host.output2(self.channel, out * l, out * r);
        } else {
            host.output(self.channel, out);
        }
    }

    fn is_finished(&self) -> bool {
        let carriers_done = self
            .ops
            .iter()
            .enumerate()
            .filter(|(i, _)| self.algorithm.is_carrier(i + 1))
            .all(|(_, op)| op.env.is_finished());
        carriers_done && (self.noise_vol == 0.0 || self.noise_env.is_finished())
    }

    fn get_param(&self, id: i16) -> Option<f32> {
        match FmParam::decode(id) {
            Some(FmParam::Op { op, field }) => self.ops[op - 1].get(field),
            Some(FmParam::OpEnv { op, field }) => Some(self.ops[op - 1].env.def().field(field)),
            Some(FmParam::NoiseEnv(field)) => Some(self.noise_env.def().field(field)),
            None => self.get(id).or_else(|| self.pitch.get_param(id)),
        }
    }

    fn set_param(&mut self, id: i16, value: f32) -> bool {
        match FmParam::decode(id) {
            Some(FmParam::Op { op, field }) => return self.ops[op - 1].set(field, value),
            Some(FmParam::OpEnv { op, field }) => self.ops[op - 1].env.def_mut().set_field(field, value),
            Some(FmParam::NoiseEnv(field)) => self.noise_env.def_mut().set_field(field, value),
            None => match id {
                P_ALG => self.algorithm = FmAlgorithm::from_index(value as i32),
                P_DLYD => self.delay_decay = value.max(0.0),
                P_DLYM => self.delay_mix = value,
                P_DLYT => self.delay_time = value.max(0.0),
                P_NRT => self.noise_rate = value.max(0.0),
                P_NVOL => self.noise_vol = value,
                P_PAN => self.pan = value.clamp(-1.0, 1.0),
                P_PANON => self.pan_on = value != 0.0,
                _ => return self.pitch.set_param(id, value),
            },
        }
        true
    }

    fn map_param_id(&self, name: &str) -> i16 {
        match FmParam::parse(name) {
            Some(addr) => addr.encode(),
            None => lookup(&[&FM_PARAMS, &LFO_PB_PARAMS], name),
        }
    }

    fn map_param_name(&self, id: i16) -> Option<String> {
        match FmParam::decode(id) {
            Some(addr) => Some(addr.name()),
            None => reverse(&[&FM_PARAMS, &LFO_PB_PARAMS], id),
        }
    }

    fn param_names(&self) -> Vec<String> {
        let mut names = table_names(&[&FM_PARAMS, &LFO_PB_PARAMS]);
        for (i, o) in self.ops.iter().enumerate() {
            let op = i + 1;
            names.extend((0..OP_FIELDS.len()).map(|field| FmParam::Op { op, field }.name()));
            names.extend(
                EnvField::all(o.env.def().segments.len()).map(|field| FmParam::OpEnv { op, field }.name()),
            );
        }
        names.extend(EnvField::all(self.noise_env.def().segments.len()).map(|f| FmParam::NoiseEnv(f).name()));
        names
    }

    fn load(&mut self, el: &Element) -> Result<(), LoadError> {
        self.algorithm = FmAlgorithm::from_index(el.get_or("alg", self.algorithm.index())?);
        for child in el.children_named("op") {
            let n: usize = child.require("n")?;
            let Some(op) = n.checked_sub(1).and_then(|i| self.ops.get_mut(i)) else {
                warn!(n, "FMSynth operator out of range, skipped");
                continue;
            };
            op.mult = child.get_or("mul", op.mult)?;
            op.wt = child.get_or("wt", op.wt)?;
            op.volume = child.get_or("vol", op.volume)?;
            let mut def = op.env.def().clone();
            load_env_child(child, "env", &mut def)?;
            op.env.set_def(def);
        }
        if let Some(nz) = el.child("noise") {
            self.noise_vol = nz.get_or("vol", self.noise_vol)?;
            self.noise_rate = nz.get_or("rt", self.noise_rate)?;
            let mut def = self.noise_env.def().clone();
            load_env_child(nz, "env", &mut def)?;
            self.noise_env.set_def(def);
        }
        if let Some(d) = el.child("delay") {
            self.delay_time = d.get_or("t", self.delay_time)?;
            self.delay_decay = d.get_or("d", self.delay_decay)?;
            self.delay_mix = d.get_or("m", self.delay_mix)?;
        }
        self.pan_on = el.get_bool("panon", self.pan_on)?;
        self.pan = el.get_or("pan", self.pan)?;
        self.pitch.load(el)
    }

    fn save(&self, el: &mut Element) {
        el.set_attr("alg", self.algorithm.index()).set_attr("pan", self.pan);
        el.set_bool("panon", self.pan_on);
        for (i, op) in self.ops.iter().enumerate() {
            let child = el.add_child(Element::new("op"));
            child
                .set_attr("n", i + 1)
                .set_attr("mul", op.mult)
                .set_attr("wt", op.wt)
                .set_attr("vol", op.volume);
            save_env_child(child, "env", op.env.def());
        }
        let nz = el.add_child(Element::new("noise"));
        nz.set_attr("vol", self.noise_vol).set_attr("rt", self.noise_rate);
        save_env_child(nz, "env", self.noise_env.def());
        el.add_child(Element::new("delay"))
            .set_attr("t", self.delay_time)
            .set_attr("d", self.delay_decay)
            .set_attr("m", self.delay_mix);
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

    fn energy(x: &[f32]) -> f32 {
        x.iter().map(|v| v * v).sum()
    }

    #[test]
    fn table_is_sorted() {
        assert!(FM_PARAMS.is_sorted());
    }

    #[test]
    fn names_round_trip() {
        let fm = FmSynth::new(ctx());
        let names = fm.param_names();
        assert!(names.contains(&"op3.env.s1.rt".to_string()));
        assert!(names.contains(&"noise.env.st".to_string()));
        for name in names {
            let id = fm.map_param_id(&name);
            assert!(id >= 0, "{name}");
            assert_eq!(fm.map_param_name(id).as_deref(), Some(name.as_str()));
        }
        assert_eq!(fm.map_param_id("op4.mul"), -1);
        assert_eq!(fm.map_param_id("op1.bogus"), -1);
    }

    #[test]
    fn carriers_per_algorithm() {
        assert!(FmAlgorithm::Stack.is_carrier(1));
        assert!(!FmAlgorithm::Stack.is_carrier(2));
        assert!(FmAlgorithm::Stack2.is_carrier(3));
        assert!(FmAlgorithm::Delta.is_carrier(2));
        assert!(!FmAlgorithm::Wye.is_carrier(3));
    }

    #[test]
    fn modulation_index_changes_waveform() {
        let note = NoteEvent::start(0, 0, 57, 220.0);
        let mut host = StandaloneHost::new();

        let mut plain = FmSynth::new(ctx());
        plain.set_operator(2, 1.0, 0.0, EnvDef::adsr(0.0, 0.0, 1.0, 0.1));
        plain.start(&mut host, &note);
        let a = host.render_mono(&mut plain, 1600);

        let mut bright = FmSynth::new(ctx());
        bright.set_operator(2, 1.0, 3.0, EnvDef::adsr(0.0, 0.0, 1.0, 0.1));
        bright.start(&mut host, &note);
        let b = host.render_mono(&mut bright, 1600);

        let diff: f32 = a.iter().zip(&b).map(|(x, y)| (x - y).abs()).sum();
        assert!(diff > 10.0, "diff {diff}");
    }

    #[test]
    fn internal_pan_writes_both_sides() {
        let mut fm = FmSynth::new(ctx());
        fm.set_pan(true, -1.0);
        let mut host = StandaloneHost::new();
        fm.start(&mut host, &NoteEvent::start(0, 0, 60, 261.6));
        let mut left = 0.0;
        let mut right = 0.0;
        for _ in 0..800 {
            fm.tick(&mut host);
            let (l, r) = host.take();
            left += l * l;
            right += r * r;
        }
        assert!(left > 0.0);
        assert!(right < left * 1e-6);
    }

    #[test]
    fn delay_tail_rings_on() {
        let note = NoteEvent::start(0, 0, 69, 440.0);
        let short = EnvDef::ar(0.001, 1.0, 0.01);
        let mut host = StandaloneHost::new();
        let mut tail = |fm: &mut FmSynth| {
            fm.set_operator(1, 1.0, 1.0, short.clone());
            fm.start(&mut host, &note);
            host.render_mono(fm, 100);
            fm.stop(&mut host);
            host.render_mono(fm, 1000)[400..].to_vec()
        };

        let mut dry = FmSynth::new(ctx());
        let mut wet = FmSynth::new(ctx());
        wet.set_delay(0.02, 0.5, 0.8);
        assert_eq!(energy(&tail(&mut dry)), 0.0);
        assert!(energy(&tail(&mut wet)) > 1e-3);
    }

    #[test]
    fn noise_layer_keeps_voice_alive() {
        let mut fm = FmSynth::new(ctx());
        fm.set_operator(1, 1.0, 1.0, EnvDef::ar(0.001, 1.0, 0.001));
        fm.set_noise(0.5, 0.0, EnvDef::ar(0.001, 1.0, 0.2));
        let mut host = StandaloneHost::new();
        fm.start(&mut host, &NoteEvent::start(0, 0, 60, 261.6));
        host.render_mono(&mut fm, 100);
        fm.stop(&mut host);
        host.render_mono(&mut fm, 200);
        assert!(!fm.is_finished());
        host.render_mono(&mut fm, 4000);
        assert!(fm.is_finished());
    }

    #[test]
    fn save_load_operators() {
        let mut fm = FmSynth::new(ctx());
        fm.set_algorithm(FmAlgorithm::Delta);
        fm.set_operator(3, 3.5, 1.25, EnvDef::ar(0.2, 0.7, 0.4));
        fm.set_delay(0.03, 1.0, 0.3);
        fm.set_pan(true, 0.25);
        let mut el = Element::new("instr");
        fm.save(&mut el);

        let mut other = FmSynth::new(ctx());
        other.load(&el).unwrap();
        assert_eq!(other.algorithm(), FmAlgorithm::Delta);
        for name in ["op3.mul", "op3.vol", "op3.env.s0.rt", "dlyt", "dlym", "pan", "panon"] {
            let id = fm.map_param_id(name);
            assert_eq!(other.get_param(id), fm.get_param(id), "{name}");
        }
    }
}
