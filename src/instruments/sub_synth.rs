//! SubSynth: the classic one-oscillator subtractive voice.

use std::sync::Arc;

use crate::{
    dsp::{
        context::SynthContext,
        envelope::{EnvDef, EnvField, SegmentEnv},
        filter::{SweepKind, SweptFilter},
        noise::WhiteNoise,
        oscillator::WaveOsc,
        wavetable::WT_SAW,
        UnitGen,
    },
    error::LoadError,
    instruments::common::{env_param_names, load_env_child, save_env_child, PitchMod},
    patch::Element,
    synth::{
        event::{EventKind, NoteEvent},
        instrument::{apply_event_params, InstrHost, Instrument},
        param_id::{lookup, reverse, table_names, ParamTable, LFO_PB_PARAMS, P_GLOBAL, P_INDEXED},
    },
};

/*
    osc ──× mix ──────┐
                     (+)─→ SweptFilter ─→ × amp env ─→ out
    noise ──× (1-mix)─┘        ↑
                        fc + frange × filter env

LFO and pitch bend move the oscillator only; the noise and the filter do
not follow them. `mix` = 1 is pure oscillator.
*/

const P_FC: i16 = P_GLOBAL;
const P_FQ: i16 = P_GLOBAL + 1;
const P_FRANGE: i16 = P_GLOBAL + 2;
const P_FSTRIDE: i16 = P_GLOBAL + 3;
const P_FTYPE: i16 = P_GLOBAL + 4;
const P_MIX: i16 = P_GLOBAL + 5;
const P_WT: i16 = P_GLOBAL + 6;

static SUB_PARAMS: ParamTable = ParamTable::new(&[
    ("fc", P_FC),
    ("fq", P_FQ),
    ("frange", P_FRANGE),
    ("fstride", P_FSTRIDE),
    ("ftype", P_FTYPE),
    ("mix", P_MIX),
    ("wt", P_WT),
]);

const AMP_ENV: i16 = P_INDEXED | 0x100;
const FLT_ENV: i16 = P_INDEXED | 0x200;

/// Decoded SubSynth address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubParam {
    Global(i16),
    AmpEnv(EnvField),
    FltEnv(EnvField),
}

impl SubParam {
    pub fn encode(self) -> i16 {
        match self {
            SubParam::Global(id) => id,
            SubParam::AmpEnv(f) => AMP_ENV | f.code() as i16,
            SubParam::FltEnv(f) => FLT_ENV | f.code() as i16,
        }
    }

    pub fn decode(id: i16) -> Self {
        let field = || EnvField::from_code((id & 0xff) as u16);
        match id & !0xff {
            AMP_ENV => field().map_or(SubParam::Global(id), SubParam::AmpEnv),
            FLT_ENV => field().map_or(SubParam::Global(id), SubParam::FltEnv),
            _ => SubParam::Global(id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubSynth {
    ctx: Arc<SynthContext>,
    wt: usize,
    mix: f32,
    kind: SweepKind,
    fc: f32,
    fq: f32,
    frange: f32,
    stride: u32,

    osc: WaveOsc,
    noise: WhiteNoise,
    filter: SweptFilter,
    amp: SegmentEnv,
    flt: SegmentEnv,
    pitch: PitchMod,

    channel: u16,
    frequency: f32,
    volume: f32,
}

impl SubSynth {
    pub const TYPE: &'static str = "SubSynth";

    pub fn new(ctx: Arc<SynthContext>) -> Self {
        let sr = ctx.params.sample_rate;
        Self {
            wt: WT_SAW,
            mix: 1.0,
            kind: SweepKind::LowPass,
            fc: 500.0,
            fq: 1.0,
            frange: 2000.0,
            stride: 1,
            osc: WaveOsc::interpolated(ctx.clone()),
            noise: WhiteNoise::new(),
            filter: SweptFilter::new(sr, SweepKind::LowPass, 1),
            amp: SegmentEnv::new(EnvDef::default(), sr),
            flt: SegmentEnv::new(EnvDef::adsr(0.05, 0.3, 0.3, 0.2), sr),
            pitch: PitchMod::new(ctx.clone()),
            ctx,
            channel: 0,
            frequency: 440.0,
            volume: 1.0,
        }
    }

    pub fn set_filter(&mut self, kind: SweepKind, fc: f32, q: f32, range: f32) {
        self.kind = kind;
        self.fc = fc;
        self.fq = q;
        self.frange = range;
        self.rebuild_filter();
    }

    pub fn set_envelopes(&mut self, amp: EnvDef, flt: EnvDef) {
        self.amp.set_def(amp);
        self.flt.set_def(flt);
    }

    pub fn filter_kind(&self) -> SweepKind {
        self.kind
    }

    pub fn pitch_mod_mut(&mut self) -> &mut PitchMod {
        &mut self.pitch
    }

    fn rebuild_filter(&mut self) {
        self.filter = SweptFilter::new(self.ctx.params.sample_rate, self.kind, self.stride);
    }

    fn restart(&mut self, init_phase: f32) {
        self.osc.set_wavetable(self.wt);
        self.osc.set_frequency(self.frequency);
        self.osc.reset(init_phase);
        self.noise.reset(init_phase);
        self.filter.reset(init_phase);
        self.amp.reset(init_phase);
        self.flt.reset(init_phase);
    }

    fn global(&self, id: i16) -> Option<f32> {
        Some(match id {
            P_FC => self.fc,
            P_FQ => self.fq,
            P_FRANGE => self.frange,
            P_FSTRIDE => self.stride as f32,
            P_FTYPE => self.kind.index() as f32,
            P_MIX => self.mix,
            P_WT => self.wt as f32,
            _ => return self.pitch.get_param(id),
        })
    }
}

impl Instrument for SubSynth {
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
        self.amp.release();
        self.flt.release();
    }

    fn tick(&mut self, host: &mut dyn InstrHost) {
        let fm = self.pitch.next();
        if fm != 0.0 {
            self.osc.modulate_frequency(fm);
        }
        let mut x = 0.0;
        if self.mix > 0.0 {
            x += self.osc.next_sample() * self.mix;
        }
        if self.mix < 1.0 {
            x += self.noise.next_sample() * (1.0 - self.mix);
        }
        let fc = self.fc + self.frange * self.flt.next_sample();
        let y = self.filter.sample(x, fc, self.fq);
        host.output(self.channel, y * self.amp.next_sample() * self.volume);
    }

    fn is_finished(&self) -> bool {
        self.amp.is_finished()
    }

    fn get_param(&self, id: i16) -> Option<f32> {
        match SubParam::decode(id) {
            SubParam::AmpEnv(f) => Some(self.amp.def().field(f)),
            SubParam::FltEnv(f) => Some(self.flt.def().field(f)),
            SubParam::Global(id) => self.global(id),
        }
    }

    fn set_param(&mut self, id: i16, value: f32) -> bool {
        match SubParam::decode(id) {
            SubParam::AmpEnv(f) => self.amp.def_mut().set_field(f, value),
            SubParam::FltEnv(f) => self.flt.def_mut().set_field(f, value),
            SubParam::Global(id) => match id {
                P_FC => self.fc = value,
                P_FQ => self.fq = value,
                P_FRANGE => self.frange = value,
                P_FSTRIDE => {
                    self.stride = value.max(1.0) as u32;
                    self.filter.set_stride(self.stride);
                }
                P_FTYPE => {
                    self.kind = SweepKind::from_index(value as i32);
                    self.rebuild_filter();
                }
                P_MIX => self.mix = value.clamp(0.0, 1.0),
                P_WT => self.wt = value.max(0.0) as usize,
                _ => return self.pitch.set_param(id, value),
            },
        }
        true
    }

    fn map_param_id(&self, name: &str) -> i16 {
        let env = |rest: &str, wrap: fn(EnvField) -> SubParam| EnvField::parse(rest).map_or(-1, |f| wrap(f).encode());
        if let Some(rest) = name.strip_prefix("amp.") {
            return env(rest, SubParam::AmpEnv);
        }
        if let Some(rest) = name.strip_prefix("flt.") {
            return env(rest, SubParam::FltEnv);
        }
        lookup(&[&SUB_PARAMS, &LFO_PB_PARAMS], name)
    }

    fn map_param_name(&self, id: i16) -> Option<String> {
        match SubParam::decode(id) {
            SubParam::AmpEnv(f) => Some(format!("amp.{}", f.name())),
            SubParam::FltEnv(f) => Some(format!("flt.{}", f.name())),
            SubParam::Global(id) => reverse(&[&SUB_PARAMS, &LFO_PB_PARAMS], id),
        }
    }

    fn param_names(&self) -> Vec<String> {
        let mut names = table_names(&[&SUB_PARAMS, &LFO_PB_PARAMS]);
        names.extend(env_param_names("amp", self.amp.def()));
        names.extend(env_param_names("flt", self.flt.def()));
        names
    }

    fn load(&mut self, el: &Element) -> Result<(), LoadError> {
        if let Some(osc) = el.child("osc") {
            self.wt = osc.get_or("wt", self.wt)?;
            self.mix = osc.get_or("mix", self.mix)?.clamp(0.0, 1.0);
        }
        if let Some(f) = el.child("filter") {
            self.kind = SweepKind::from_index(f.get_or("type", self.kind.index())?);
            self.fc = f.get_or("fc", self.fc)?;
            self.fq = f.get_or("q", self.fq)?;
            self.frange = f.get_or("range", self.frange)?;
            self.stride = f.get_or("stride", self.stride)?.max(1);
            self.rebuild_filter();
        }
        let mut amp = self.amp.def().clone();
        load_env_child(el, "amp", &mut amp)?;
        let mut flt = self.flt.def().clone();
        load_env_child(el, "flt", &mut flt)?;
        self.set_envelopes(amp, flt);
        self.pitch.load(el)
    }

    fn save(&self, el: &mut Element) {
        el.add_child(Element::new("osc"))
            .set_attr("wt", self.wt)
            .set_attr("mix", self.mix);
        el.add_child(Element::new("filter"))
            .set_attr("type", self.kind.index())
            .set_attr("fc", self.fc)
            .set_attr("q", self.fq)
            .set_attr("range", self.frange)
            .set_attr("stride", self.stride);
        save_env_child(el, "amp", self.amp.def());
        save_env_child(el, "flt", self.flt.def());
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

    fn energy(x: &[f32]) -> f32 {
        x.iter().map(|v| v * v).sum()
    }

    #[test]
    fn names_round_trip() {
        assert!(SUB_PARAMS.is_sorted());
        let sub = SubSynth::new(ctx());
        for name in sub.param_names() {
            let id = sub.map_param_id(&name);
            assert!(id >= 0, "{name}");
            assert_eq!(sub.map_param_name(id).as_deref(), Some(name.as_str()));
        }
        assert_eq!(sub.map_param_id("flt.s9.rt"), -1);
    }

    #[test]
    fn filter_envelope_opens_the_sound() {
        let note = NoteEvent::start(0, 0, 45, 110.0);
        let mut host = StandaloneHost::new();

        let mut closed = SubSynth::new(ctx());
        closed.set_filter(SweepKind::LowPass, 150.0, 0.7, 0.0);
        closed.start(&mut host, &note);
        let a = host.render_mono(&mut closed, 4000);

        let mut open = SubSynth::new(ctx());
        open.set_filter(SweepKind::LowPass, 150.0, 0.7, 4000.0);
        open.set_envelopes(EnvDef::default(), EnvDef::adsr(0.0, 0.0, 1.0, 0.1));
        open.start(&mut host, &note);
        let b = host.render_mono(&mut open, 4000);
        assert!(energy(&b[2000..]) > energy(&a[2000..]) * 1.5);
    }

    #[test]
    fn pure_noise_ignores_pitch() {
        let mut sub = SubSynth::new(ctx());
        sub.set_param(P_MIX, 0.0);
        sub.set_filter(SweepKind::HighPass, 100.0, 0.7, 0.0);
        let mut host = StandaloneHost::new();
        sub.start(&mut host, &NoteEvent::start(0, 0, 60, 261.6));
        let a = host.render_mono(&mut sub, 500);
        sub.start(&mut host, &NoteEvent::start(0, 0, 72, 523.2));
        let b = host.render_mono(&mut sub, 500);
        assert_eq!(a, b);
    }

    #[test]
    fn changing_type_rebuilds_filter() {
        let mut sub = SubSynth::new(ctx());
        let id = sub.map_param_id("ftype");
        sub.set_param(id, 3.0);
        assert_eq!(sub.filter_kind(), SweepKind::Reson);
        assert_eq!(sub.filter.kind(), SweepKind::Reson);
    }

    #[test]
    fn save_load_round_trip() {
        let mut sub = SubSynth::new(ctx());
        sub.set_filter(SweepKind::BandPass, 300.0, 4.0, 1200.0);
        sub.set_param(P_MIX, 0.25);
        sub.set_param(sub.map_param_id("flt.s1.lvl"), 0.6);
        let mut el = Element::new("instr");
        sub.save(&mut el);

        let mut other = SubSynth::new(ctx());
        other.load(&el).unwrap();
        for name in ["fc", "fq", "frange", "ftype", "mix", "flt.s1.lvl"] {
            let id = sub.map_param_id(name);
            assert_eq!(other.get_param(id), sub.get_param(id), "{name}");
        }
        assert_eq!(other.filter.kind(), SweepKind::BandPass);
    }
}
