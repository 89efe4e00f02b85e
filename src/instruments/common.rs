use std::sync::Arc;

use crate::{
    dsp::{
        context::SynthContext,
        envelope::{EnvDef, EnvField},
        lfo::{Lfo, LfoParams},
        pitch_bend::{PitchBend, PitchBendParams},
        UnitGen,
    },
    error::LoadError,
    patch::Element,
    synth::{
        instrument::InstrHost,
        param_id::{lfo_get, lfo_set, pb_get, pb_set, P_LFO_AMP, P_LFO_FRQ, P_PB_A3, P_PB_ON},
    },
};

/*
Pitch Modulation
================

Most instruments move their oscillator frequency with the same three sources:

    lfo     vibrato, depth in semitones around the note
    pb      the segment pitch-bend generator
    wheel   the channel pitch wheel, read from the host

All three are summed as a deviation in Hz from the note frequency, so an
instrument with several oscillators at multiples of the note just scales the
sum by each multiple.

    delta = lfo(t) + pb(t) + (f · cm(wheel) − f)

The wheel term only changes when a Control event arrives, so it is converted
once there and not per sample.
*/

/// LFO + pitch bend + pitch wheel, as one Hz deviation per sample.
#[derive(Debug, Clone)]
pub struct PitchMod {
    ctx: Arc<SynthContext>,
    lfo: Lfo,
    pb: PitchBend,
    channel: u16,
    frequency: f32,
    wheel_cents: f32,
    wheel_hz: f32,
}

impl PitchMod {
    pub fn new(ctx: Arc<SynthContext>) -> Self {
        Self {
            lfo: Lfo::new(ctx.clone(), LfoParams::default()),
            pb: PitchBend::new(ctx.clone(), PitchBendParams::default()),
            ctx,
            channel: 0,
            frequency: 440.0,
            wheel_cents: 0.0,
            wheel_hz: 0.0,
        }
    }

    pub fn lfo_params(&self) -> &LfoParams {
        self.lfo.params()
    }

    pub fn set_lfo_params(&mut self, params: LfoParams) {
        self.lfo.set_params(params);
    }

    pub fn pb_params(&self) -> &PitchBendParams {
        self.pb.params()
    }

    pub fn set_pb_params(&mut self, params: PitchBendParams) {
        self.pb.set_params(params);
    }

    /// LFO output alone, for instruments that route it somewhere other than pitch.
    pub fn lfo_mut(&mut self) -> &mut Lfo {
        &mut self.lfo
    }

    /// Restart for a new note.
    pub fn start(&mut self, host: &dyn InstrHost, channel: u16, frequency: f32) {
        self.channel = channel;
        self.frequency = frequency;
        self.lfo.set_sig_freq(frequency);
        self.pb.set_sig_freq(frequency);
        self.lfo.reset(0.0);
        self.pb.reset(0.0);
        self.update_wheel(host);
    }

    /// New note frequency without restarting the LFO or the bend.
    pub fn retune(&mut self, frequency: f32) {
        self.frequency = frequency;
        self.lfo.set_sig_freq(frequency);
        self.pb.set_sig_freq(frequency);
        self.lfo.reset(-1.0);
        self.pb.reset(-1.0);
        self.wheel_hz = self.wheel_delta(self.wheel_cents);
    }

    pub fn update_wheel(&mut self, host: &dyn InstrHost) {
        self.wheel_cents = host.pitchbend_cents(self.channel);
        self.wheel_hz = self.wheel_delta(self.wheel_cents);
    }

    fn wheel_delta(&self, cents: f32) -> f32 {
        if cents == 0.0 {
            0.0
        } else {
            self.frequency * self.ctx.params.cents_mult(cents) - self.frequency
        }
    }

    pub fn is_active(&self) -> bool {
        !self.lfo.is_silent() || self.pb.is_on() || self.wheel_hz != 0.0
    }

    /// Frequency deviation in Hz for this sample.
    #[inline]
    pub fn next(&mut self) -> f32 {
        let (wheel, lfo, pb) = self.next_parts();
        wheel + lfo + pb
    }

    /// The three sources separately, as `(wheel, lfo, pb)` in Hz.
    #[inline]
    pub fn next_parts(&mut self) -> (f32, f32, f32) {
        let lfo = if self.lfo.is_silent() {
            0.0
        } else {
            self.lfo.next_sample()
        };
        let pb = if self.pb.is_on() { self.pb.next_sample() } else { 0.0 };
        (self.wheel_hz, lfo, pb)
    }

    pub fn get_param(&self, id: i16) -> Option<f32> {
        match id {
            P_LFO_FRQ..=P_LFO_AMP => lfo_get(self.lfo.params(), id),
            P_PB_ON..=P_PB_A3 => pb_get(self.pb.params(), id),
            _ => None,
        }
    }

    pub fn set_param(&mut self, id: i16, value: f32) -> bool {
        match id {
            P_LFO_FRQ..=P_LFO_AMP => {
                let mut p = *self.lfo.params();
                let ok = lfo_set(&mut p, id, value);
                self.lfo.set_params(p);
                ok
            }
            P_PB_ON..=P_PB_A3 => {
                let mut p = *self.pb.params();
                let ok = pb_set(&mut p, id, value);
                self.pb.set_params(p);
                ok
            }
            _ => false,
        }
    }

    /// Read `<lfo>` and `<pb>` children when present.
    pub fn load(&mut self, el: &Element) -> Result<(), LoadError> {
        if let Some(lfo) = el.child("lfo") {
            self.lfo.set_params(LfoParams::load(lfo)?);
        }
        if let Some(pb) = el.child("pb") {
            self.pb.set_params(PitchBendParams::load(pb)?);
        }
        Ok(())
    }

    pub fn save(&self, el: &mut Element) {
        self.lfo.params().save(el.add_child(Element::new("lfo")));
        self.pb.params().save(el.add_child(Element::new("pb")));
    }
}

/// Envelope parameter ID: `base | field code`.
pub fn env_param_id(base: i16, field: EnvField) -> i16 {
    base | field.code() as i16
}

/// Dotted names for every field of an envelope definition under `prefix`.
pub fn env_param_names(prefix: &str, def: &EnvDef) -> impl Iterator<Item = String> {
    let prefix = prefix.to_string();
    EnvField::all(def.segments.len()).map(move |f| format!("{prefix}.{}", f.name()))
}

/// Short field names used inside generator addresses: `st`, `sus`, and
/// `r{k}` `l{k}` `t{k}` `x{k}` for rate, level, curve type and fixed flag
/// of segment k. `gen2.egmr1` is the rate of segment 1 of gen 2's mod envelope.
pub fn short_env_name(field: EnvField) -> String {
    match field {
        EnvField::Start => "st".to_string(),
        EnvField::Sustain => "sus".to_string(),
        EnvField::Rate(s) => format!("r{s}"),
        EnvField::Level(s) => format!("l{s}"),
        EnvField::Curve(s) => format!("t{s}"),
        EnvField::Fixed(s) => format!("x{s}"),
    }
}

pub fn parse_short_env(name: &str) -> Option<EnvField> {
    match name {
        "st" => return Some(EnvField::Start),
        "sus" => return Some(EnvField::Sustain),
        _ => {}
    }
    let mut chars = name.chars();
    let kind = chars.next()?;
    let seg: usize = chars.as_str().parse().ok()?;
    if seg >= crate::dsp::envelope::MAX_SEGMENTS || chars.as_str().starts_with('+') {
        return None;
    }
    match kind {
        'r' => Some(EnvField::Rate(seg)),
        'l' => Some(EnvField::Level(seg)),
        't' => Some(EnvField::Curve(seg)),
        'x' => Some(EnvField::Fixed(seg)),
        _ => None,
    }
}

/// Load `<tag>` into `def` when the child exists.
pub fn load_env_child(el: &Element, tag: &str, def: &mut EnvDef) -> Result<(), LoadError> {
    if let Some(child) = el.child(tag) {
        *def = EnvDef::load(child)?;
    }
    Ok(())
}

pub fn save_env_child(el: &mut Element, tag: &str, def: &EnvDef) {
    def.save(el.add_child(Element::new(tag)));
}

/// Bool-as-float for parameter values.
pub(crate) fn flag(on: bool) -> f32 {
    if on {
        1.0
    } else {
        0.0
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
    fn wheel_bends_by_cents() {
        let mut pm = PitchMod::new(ctx());
        let mut host = StandaloneHost::new();
        host.wheel_cents = 1200.0;
        pm.start(&host, 0, 220.0);
        assert!(pm.is_active());
        assert!((pm.next() - 220.0).abs() < 0.1);
        host.wheel_cents = 0.0;
        pm.update_wheel(&host);
        assert_eq!(pm.next(), 0.0);
        assert!(!pm.is_active());
    }

    #[test]
    fn lfo_params_by_id() {
        let mut pm = PitchMod::new(ctx());
        assert!(pm.set_param(P_LFO_AMP, 0.5));
        assert_eq!(pm.get_param(P_LFO_AMP), Some(0.5));
        assert!(pm.set_param(P_PB_ON, 1.0));
        assert_eq!(pm.get_param(P_PB_ON), Some(1.0));
        assert!(!pm.set_param(40, 1.0));
    }

    #[test]
    fn save_load_children() {
        let mut pm = PitchMod::new(ctx());
        pm.set_param(P_LFO_FRQ, 6.5);
        pm.set_param(P_PB_A3, -25.0);
        let mut el = Element::new("instr");
        pm.save(&mut el);
        let mut other = PitchMod::new(ctx());
        other.load(&el).unwrap();
        assert_eq!(other.lfo_params().rate, 6.5);
        assert_eq!(other.pb_params().a3, -25.0);
    }

    #[test]
    fn short_envelope_names() {
        for field in EnvField::all(crate::dsp::envelope::MAX_SEGMENTS) {
            assert_eq!(parse_short_env(&short_env_name(field)), Some(field));
        }
        assert_eq!(parse_short_env("r1"), Some(EnvField::Rate(1)));
        assert_eq!(parse_short_env("r7"), None);
        assert_eq!(parse_short_env("q1"), None);
        assert_eq!(parse_short_env("r"), None);
    }

    #[test]
    fn envelope_names_cover_every_field() {
        let def = EnvDef::adsr(0.1, 0.2, 0.5, 0.3);
        let names: Vec<String> = env_param_names("env", &def).collect();
        assert!(names.contains(&"env.st".to_string()));
        assert!(names.contains(&"env.s2.rt".to_string()));
        assert_eq!(names.len(), 2 + 4 * def.segments.len());
    }
}
