use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    dsp::{context::SynthContext, oscillator::WaveOsc, wavetable::WT_SIN, UnitGen},
    error::LoadError,
    patch::Element,
    synth::{
        event::{EventKind, NoteEvent},
        instrument::{apply_event_params, InstrHost, Instrument},
        mixer::Mixer,
        param_id::{lookup, reverse, table_names, ParamTable, P_GLOBAL},
    },
};

/*
Mixer Automation
================

MixerControl is scheduled like a note but makes no sound. While it plays
it writes one mixer setting each sample:

  set     write `from` once, then finish
  ramp    move linearly from `from` to `to` over `time` seconds (or the
          note duration when `time` is 0), then hold `to` and finish
  oscil   from + amp × sin(2π frq t) until the note stops

Targets:

  vol     channel volume        (ch)
  pan     channel pan           (ch)
  send    fx send level         (ch → fx)
  recv    fx return level       (fx)
  fxpan   fx return pan         (fx)

With no mixer reachable the voice logs once and finishes.
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MixerFunc {
    #[default]
    Set,
    Ramp,
    Oscil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MixerTarget {
    #[default]
    Volume,
    Pan,
    FxSend,
    FxReceive,
    FxPan,
}

impl MixerFunc {
    fn from_index(i: i32) -> Self {
        match i {
            1 => MixerFunc::Ramp,
            2 => MixerFunc::Oscil,
            _ => MixerFunc::Set,
        }
    }

    fn index(self) -> i32 {
        self as i32
    }
}

impl MixerTarget {
    fn from_index(i: i32) -> Self {
        match i {
            1 => MixerTarget::Pan,
            2 => MixerTarget::FxSend,
            3 => MixerTarget::FxReceive,
            4 => MixerTarget::FxPan,
            _ => MixerTarget::Volume,
        }
    }

    fn index(self) -> i32 {
        self as i32
    }
}

const P_AMP: i16 = P_GLOBAL;
const P_CH: i16 = P_GLOBAL + 1;
const P_FROM: i16 = P_GLOBAL + 2;
const P_FRQ: i16 = P_GLOBAL + 3;
const P_FUNC: i16 = P_GLOBAL + 4;
const P_FX: i16 = P_GLOBAL + 5;
const P_TARGET: i16 = P_GLOBAL + 6;
const P_TIME: i16 = P_GLOBAL + 7;
const P_TO: i16 = P_GLOBAL + 8;

static MIXER_CONTROL_PARAMS: ParamTable = ParamTable::new(&[
    ("amp", P_AMP),
    ("ch", P_CH),
    ("from", P_FROM),
    ("frq", P_FRQ),
    ("func", P_FUNC),
    ("fx", P_FX),
    ("target", P_TARGET),
    ("time", P_TIME),
    ("to", P_TO),
]);

#[derive(Debug, Clone)]
pub struct MixerControl {
    ctx: Arc<SynthContext>,
    func: MixerFunc,
    target: MixerTarget,
    channel: usize,
    fx: usize,
    from: f32,
    to: f32,
    time: f32,
    frequency: f32,
    amp: f32,

    osc: WaveOsc,
    pos: u32,
    len: u32,
    running: bool,
}

impl MixerControl {
    pub const TYPE: &'static str = "MixerControl";

    pub fn new(ctx: Arc<SynthContext>) -> Self {
        Self {
            osc: WaveOsc::new(ctx.clone()).with_wavetable(WT_SIN),
            ctx,
            func: MixerFunc::Set,
            target: MixerTarget::Volume,
            channel: 0,
            fx: 0,
            from: 1.0,
            to: 1.0,
            time: 0.0,
            frequency: 1.0,
            amp: 0.0,
            pos: 0,
            len: 1,
            running: false,
        }
    }

    pub fn set_function(&mut self, func: MixerFunc, target: MixerTarget) {
        self.func = func;
        self.target = target;
    }

    /// Channel for vol/pan/send, fx unit for send/recv/fxpan.
    pub fn set_route(&mut self, channel: usize, fx: usize) {
        self.channel = channel;
        self.fx = fx;
    }

    pub fn set_ramp(&mut self, from: f32, to: f32, seconds: f32) {
        self.from = from;
        self.to = to;
        self.time = seconds;
    }

    pub fn set_oscil(&mut self, center: f32, depth: f32, frequency: f32) {
        self.from = center;
        self.amp = depth;
        self.frequency = frequency;
    }

    fn write(&self, mixer: &mut dyn Mixer, value: f32) {
        match self.target {
            MixerTarget::Volume => mixer.set_channel_volume(self.channel, value),
            MixerTarget::Pan => mixer.set_channel_pan(self.channel, value),
            MixerTarget::FxSend => mixer.set_fx_send(self.fx, self.channel, value),
            MixerTarget::FxReceive => mixer.set_fx_receive(self.fx, value),
            MixerTarget::FxPan => mixer.set_fx_pan(self.fx, value),
        }
    }

    fn get(&self, id: i16) -> Option<f32> {
        Some(match id {
            P_AMP => self.amp,
            P_CH => self.channel as f32,
            P_FROM => self.from,
            P_FRQ => self.frequency,
            P_FUNC => self.func.index() as f32,
            P_FX => self.fx as f32,
            P_TARGET => self.target.index() as f32,
            P_TIME => self.time,
            P_TO => self.to,
            _ => return None,
        })
    }
}

impl Instrument for MixerControl {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    fn instantiate(&self) -> Box<dyn Instrument> {
        Box::new(self.clone())
    }

    fn start(&mut self, host: &mut dyn InstrHost, evt: &NoteEvent) {
        apply_event_params(self, evt);
        let sr = self.ctx.params.sample_rate;
        let secs = if self.time > 0.0 {
            Some(self.time)
        } else {
            evt.duration_secs(sr)
        };
        self.len = secs.map_or(1, |s| (s * sr).max(1.0) as u32);
        self.pos = 0;
        self.osc.set_frequency(self.frequency);
        self.osc.reset(0.0);
        self.running = true;
        if host.mixer().is_none() {
            warn!("MixerControl started without a mixer");
            self.running = false;
            return;
        }
        debug!(func = ?self.func, target = ?self.target, ch = self.channel, fx = self.fx, "mixer automation");
    }

    fn param(&mut self, _host: &mut dyn InstrHost, evt: &NoteEvent) {
        if evt.kind != EventKind::Control {
            apply_event_params(self, evt);
        }
    }

    fn stop(&mut self, _host: &mut dyn InstrHost) {
        self.running = false;
    }

    fn tick(&mut self, host: &mut dyn InstrHost) {
        if !self.running {
            return;
        }
        let value = match self.func {
            MixerFunc::Set => {
                self.running = false;
                self.from
            }
            MixerFunc::Ramp => {
                self.pos = (self.pos + 1).min(self.len);
                if self.pos >= self.len {
                    self.running = false;
                }
                self.from + (self.to - self.from) * (self.pos as f32 / self.len as f32)
            }
            MixerFunc::Oscil => self.from + self.amp * self.osc.next_sample(),
        };
        if let Some(mixer) = host.mixer() {
            self.write(mixer, value);
        }
    }

    fn is_finished(&self) -> bool {
        !self.running
    }

    fn get_param(&self, id: i16) -> Option<f32> {
        self.get(id)
    }

    fn set_param(&mut self, id: i16, value: f32) -> bool {
        match id {
            P_AMP => self.amp = value,
            P_CH => self.channel = value.max(0.0) as usize,
            P_FROM => self.from = value,
            P_FRQ => self.frequency = value,
            P_FUNC => self.func = MixerFunc::from_index(value as i32),
            P_FX => self.fx = value.max(0.0) as usize,
            P_TARGET => self.target = MixerTarget::from_index(value as i32),
            P_TIME => self.time = value.max(0.0),
            P_TO => self.to = value,
            _ => return false,
        }
        true
    }

    fn map_param_id(&self, name: &str) -> i16 {
        lookup(&[&MIXER_CONTROL_PARAMS], name)
    }

    fn map_param_name(&self, id: i16) -> Option<String> {
        reverse(&[&MIXER_CONTROL_PARAMS], id)
    }

    fn param_names(&self) -> Vec<String> {
        table_names(&[&MIXER_CONTROL_PARAMS])
    }

    fn load(&mut self, el: &Element) -> Result<(), LoadError> {
        for name in MIXER_CONTROL_PARAMS.names() {
            if let (Some(v), Some(id)) = (el.get::<f32>(name)?, MIXER_CONTROL_PARAMS.id(name)) {
                self.set_param(id, v);
            }
        }
        Ok(())
    }

    fn save(&self, el: &mut Element) {
        for name in MIXER_CONTROL_PARAMS.names() {
            if let Some(v) = MIXER_CONTROL_PARAMS.id(name).and_then(|id| self.get(id)) {
                el.set_attr(name, v);
            }
        }
    }
}
