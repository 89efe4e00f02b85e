//! Tone and ToneFM: one oscillator (or FM pair), one envelope, vibrato.

use std::sync::Arc;

use crate::{
    dsp::{
        context::SynthContext,
        envelope::{EnvDef, EnvField, SegmentEnv},
        oscillator::{FmOsc, WaveOsc},
        wavetable::WT_SIN,
        UnitGen,
    },
    error::LoadError,
    instruments::common::{env_param_id, env_param_names, load_env_child, save_env_child, PitchMod},
    patch::Element,
    synth::{
        event::{EventKind, NoteEvent},
        instrument::{apply_event_params, InstrHost, Instrument},
        param_id::{lookup, reverse, table_names, ParamTable, LFO_PB_PARAMS, P_GLOBAL, P_INDEXED},
    },
};

const P_WT: i16 = P_GLOBAL;
const P_MUL: i16 = P_GLOBAL + 1;
const P_MNX: i16 = P_GLOBAL + 2;
const P_MWT: i16 = P_GLOBAL + 3;

static TONE_PARAMS: ParamTable = ParamTable::new(&[("wt", P_WT)]);

static TONE_FM_PARAMS: ParamTable = ParamTable::new(&[
    ("mnx", P_MNX),
    ("mul", P_MUL),
    ("mwt", P_MWT),
    ("wt", P_WT),
]);

#[derive(Debug, Clone)]
enum ToneOsc {
    Wave(WaveOsc),
    Fm(FmOsc),
}

/// The reference instrument.
#[derive(Debug, Clone)]
pub struct ToneInstr {
    osc: ToneOsc,
    wt: usize,
    mod_wt: usize,
    ratio: f32,
    mod_index: f32,
    env: SegmentEnv,
    pitch: PitchMod,
    channel: u16,
    frequency: f32,
    volume: f32,
}

impl ToneInstr {
    pub const TYPE: &'static str = "Tone";
    pub const FM_TYPE: &'static str = "ToneFM";

    pub fn new(ctx: Arc<SynthContext>) -> Self {
        Self::with_osc(ctx.clone(), ToneOsc::Wave(WaveOsc::interpolated(ctx)))
    }

    /// Two-operator variant with a fixed modulation index.
    pub fn fm(ctx: Arc<SynthContext>) -> Self {
        Self::with_osc(ctx.clone(), ToneOsc::Fm(FmOsc::new(ctx)))
    }

    fn with_osc(ctx: Arc<SynthContext>, osc: ToneOsc) -> Self {
        let sr = ctx.params.sample_rate;
        Self {
            osc,
            wt: WT_SIN,
            mod_wt: WT_SIN,
            ratio: 1.0,
            mod_index: 1.0,
            env: SegmentEnv::new(EnvDef::default(), sr),
            pitch: PitchMod::new(ctx),
            channel: 0,
            frequency: 440.0,
            volume: 1.0,
        }
    }

    pub fn is_fm(&self) -> bool {
        matches!(self.osc, ToneOsc::Fm(_))
    }

    pub fn envelope(&self) -> &EnvDef {
        self.env.def()
    }

    pub fn set_envelope(&mut self, def: EnvDef) {
        self.env.set_def(def);
    }

    pub fn set_wavetable(&mut self, wt: usize) {
        self.wt = wt;
    }

    /// Modulator frequency multiple and peak index (ToneFM only).
    pub fn set_fm(&mut self, ratio: f32, index: f32) {
        self.ratio = ratio;
        self.mod_index = index;
    }

    pub fn pitch_mod_mut(&mut self) -> &mut PitchMod {
        &mut self.pitch
    }

    fn table(&self) -> &'static ParamTable {
        if self.is_fm() {
            &TONE_FM_PARAMS
        } else {
            &TONE_PARAMS
        }
    }

    fn configure_osc(&mut self, init_phase: f32) {
        match &mut self.osc {
            ToneOsc::Wave(osc) => {
                osc.set_wavetable(self.wt);
                osc.set_frequency(self.frequency);
                osc.reset(init_phase);
            }
            ToneOsc::Fm(osc) => {
                osc.set_wavetables(self.wt, self.mod_wt);
                osc.set_ratio(self.ratio);
                osc.set_index(self.mod_index);
                osc.set_frequency(self.frequency);
                osc.reset(init_phase);
            }
        }
    }

    fn env_field(id: i16) -> Option<EnvField> {
        if id & !0x1f != P_INDEXED {
            return None;
        }
        EnvField::from_code((id & 0x1f) as u16)
    }
}

impl Instrument for ToneInstr {
    fn type_name(&self) -> &'static str {
        if self.is_fm() {
            Self::FM_TYPE
        } else {
            Self::TYPE
        }
    }

    fn instantiate(&self) -> Box<dyn Instrument> {
        Box::new(self.clone())
    }

    fn start(&mut self, host: &mut dyn InstrHost, evt: &NoteEvent) {
        apply_event_params(self, evt);
        self.channel = evt.channel;
        self.frequency = evt.frequency;
        self.volume = evt.amplitude();
        self.configure_osc(0.0);
        self.env.reset(0.0);
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
        self.configure_osc(-1.0);
        self.env.reset(-1.0);
        self.pitch.retune(self.frequency);
    }

    fn stop(&mut self, _host: &mut dyn InstrHost) {
        self.env.release();
    }

    fn tick(&mut self, host: &mut dyn InstrHost) {
        let fm = self.pitch.next();
        let osc = match &mut self.osc {
            ToneOsc::Wave(osc) => {
                osc.modulate_frequency(fm);
                osc.next_sample()
            }
            ToneOsc::Fm(osc) => {
                osc.modulate_frequency(fm);
                osc.next_sample()
            }
        };
        let out = osc * self.env.next_sample() * self.volume;
        host.output(self.channel, out);
    }

    fn is_finished(&self) -> bool {
        self.env.is_finished()
    }

    fn get_param(&self, id: i16) -> Option<f32> {
        if let Some(field) = Self::env_field(id) {
            return Some(self.env.def().field(field));
        }
        match id {
            P_WT => Some(self.wt as f32),
            P_MUL if self.is_fm() => Some(self.ratio),
            P_MNX if self.is_fm() => Some(self.mod_index),
            P_MWT if self.is_fm() => Some(self.mod_wt as f32),
            _ => self.pitch.get_param(id),
        }
    }

    fn set_param(&mut self, id: i16, value: f32) -> bool {
        if let Some(field) = Self::env_field(id) {
            self.env.def_mut().set_field(field, value);
            return true;
        }
        match id {
            P_WT => self.wt = value.max(0.0) as usize,
            P_MUL if self.is_fm() => self.ratio = value,
            P_MNX if self.is_fm() => self.mod_index = value,
            P_MWT if self.is_fm() => self.mod_wt = value.max(0.0) as usize,
            _ => return self.pitch.set_param(id, value),
        }
        true
    }

    fn map_param_id(&self, name: &str) -> i16 {
        if let Some(rest) = name.strip_prefix("env.") {
            return EnvField::parse(rest).map_or(-1, |f| env_param_id(P_INDEXED, f));
        }
        lookup(&[self.table(), &LFO_PB_PARAMS], name)
    }

    fn map_param_name(&self, id: i16) -> Option<String> {
        if let Some(field) = Self::env_field(id) {
            return Some(format!("env.{}", field.name()));
        }
        reverse(&[self.table(), &LFO_PB_PARAMS], id)
    }

    fn param_names(&self) -> Vec<String> {
        let mut names = table_names(&[self.table(), &LFO_PB_PARAMS]);
        names.extend(env_param_names("env", self.env.def()));
        names
    }

    fn load(&mut self, el: &Element) -> Result<(), LoadError> {
        if let Some(osc) = el.child("osc") {
            self.wt = osc.get_or("wt", self.wt)?;
            if self.is_fm() {
                self.mod_wt = osc.get_or("mwt", self.mod_wt)?;
                self.ratio = osc.get_or("mul", self.ratio)?;
                self.mod_index = osc.get_or("mnx", self.mod_index)?;
            }
        }
        let mut def = self.env.def().clone();
        load_env_child(el, "env", &mut def)?;
        self.env.set_def(def);
        self.pitch.load(el)
    }

    fn save(&self, el: &mut Element) {
        let osc = el.add_child(Element::new("osc"));
        osc.set_attr("wt", self.wt);
        if self.is_fm() {
            osc.set_attr("mwt", self.mod_wt)
                .set_attr("mul", self.ratio)
                .set_attr("mnx", self.mod_index);
        }
        save_env_child(el, "env", self.env.def());
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

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0f32, |a, v| a.max(v.abs()))
    }

    #[test]
    fn plays_sustains_and_releases() {
        let mut tone = ToneInstr::new(ctx());
        tone.set_envelope(EnvDef::adsr(0.01, 0.01, 0.5, 0.05));
        let mut host = StandaloneHost::new();
        let mut voice = tone.instantiate();
        voice.start(&mut host, &NoteEvent::start(0, 0, 69, 440.0));

        let held = host.render_mono(voice.as_mut(), 800);
        assert!(peak(&held[400..]) > 0.45 && peak(&held[400..]) < 0.55);
        assert!(!voice.is_finished());

        voice.stop(&mut host);
        host.render_mono(voice.as_mut(), 400);
        assert!(voice.is_finished());
    }

    #[test]
    fn param_event_keeps_envelope_phase() {
        let mut tone = ToneInstr::new(ctx());
        tone.set_envelope(EnvDef::adsr(0.1, 0.1, 1.0, 0.1));
        let mut host = StandaloneHost::new();
        let mut evt = NoteEvent::start(0, 0, 60, 261.6);
        tone.start(&mut host, &evt);
        host.render_mono(&mut tone, 400);
        let level = tone.env.level();
        evt.kind = EventKind::Param;
        evt.frequency = 523.2;
        tone.param(&mut host, &evt);
        assert_eq!(tone.env.level(), level);
    }

    #[test]
    fn fm_variant_names_round_trip() {
        let tone = ToneInstr::fm(ctx());
        assert_eq!(tone.type_name(), "ToneFM");
        for name in tone.param_names() {
            let id = tone.map_param_id(&name);
            assert!(id >= 0, "{name}");
            assert_eq!(tone.map_param_name(id).as_deref(), Some(name.as_str()));
        }
        // plain tone has no modulator
        assert_eq!(ToneInstr::new(ctx()).map_param_id("mnx"), -1);
    }

    #[test]
    fn envelope_fields_by_id() {
        let mut tone = ToneInstr::new(ctx());
        let id = tone.map_param_id("env.s2.rt");
        assert!(tone.set_param(id, 0.75));
        assert_eq!(tone.get_param(id), Some(0.75));
        assert_eq!(tone.envelope().segments[2].rate, 0.75);
    }

    #[test]
    fn save_load_keeps_settings() {
        let mut tone = ToneInstr::fm(ctx());
        tone.set_fm(3.0, 2.5);
        tone.set_wavetable(2);
        tone.set_envelope(EnvDef::ar(0.02, 0.9, 0.3));
        let mut el = Element::new("instr");
        tone.save(&mut el);

        let mut other = ToneInstr::fm(ctx());
        other.load(&el).unwrap();
        assert_eq!(other.ratio, 3.0);
        assert_eq!(other.mod_index, 2.5);
        assert_eq!(other.wt, 2);
        assert_eq!(other.envelope(), tone.envelope());
    }
}
