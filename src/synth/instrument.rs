use crate::{
    error::LoadError,
    patch::Element,
    synth::{
        event::{NoteEvent, VoiceId},
        mixer::Mixer,
    },
};

/*
Instrument Contract
===================

Every instrument type, from the one-oscillator Tone to the soundbank players,
is driven through the same handful of calls:

    template ──instantiate──→ voice
                               │
                  start(evt) ──┤   read note + template, reset every generator
                  param(evt) ──┤   live change; envelopes keep their phase
                        tick ──┤   exactly one sample (or stereo pair) → host
                        stop ──┤   release envelopes
                 is_finished ──┤   every audible envelope done
                        drop ──┘   Destroy

The template is never played. `instantiate` clones it into a voice that owns
all of its generators; only wavetables and soundbank data are shared.

Vocabulary
----------

  host        The manager side of the contract (`InstrHost`). Instruments
              write samples into it and read channel state (pitch wheel,
              controllers, bank/program) from it.

  param ID    16-bit address of one setting. 0..=7 are event fields, 16..=25
              the shared LFO and pitch-bend blocks, everything above is
              instrument specific. IDs are stored in projects, so layouts
              never change.

  exclusive   A (channel, group) pair. Starting a voice in a group makes the
  group       manager drop any other voice in that group before the new one
              ticks.
*/

/// Voice-stealing class: one sounding voice per (channel, group).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExclKey {
    pub channel: u16,
    pub group: u16,
}

/// Callback surface the manager offers to a playing voice.
pub trait InstrHost {
    /// Mono sample into a mixer channel.
    fn output(&mut self, channel: u16, value: f32);
    /// Stereo pair into a mixer channel.
    fn output2(&mut self, channel: u16, left: f32, right: f32);
    /// Stereo pair straight to the master bus.
    fn output_direct(&mut self, left: f32, right: f32);
    /// Sample into an effects unit.
    fn fx_send(&mut self, unit: usize, value: f32);

    /// Current pitch-wheel position of a channel in cents.
    fn pitchbend_cents(&self, channel: u16) -> f32;
    /// Raw controller value 0..=127.
    fn cc(&self, channel: u16, controller: u8) -> u8;

    /// Controller value normalised to 0..=1.
    fn ccn(&self, channel: u16, controller: u8) -> f32 {
        f32::from(self.cc(channel, controller)) / 127.0
    }

    /// Switch controllers (pedals) are on at 64 and above.
    fn switch(&self, channel: u16, controller: u8) -> bool {
        self.cc(channel, controller) >= 64
    }

    fn bank(&self, channel: u16) -> u16;
    fn patch(&self, channel: u16) -> u16;

    fn excl_note_on(&mut self, key: ExclKey, voice: VoiceId);
    fn excl_note_off(&mut self, key: ExclKey, voice: VoiceId);

    fn mixer(&mut self) -> Option<&mut dyn Mixer>;
}

/// One instrument type, usable both as a template and as a playing voice.
pub trait Instrument: Send {
    /// Stable type name used in project files.
    fn type_name(&self) -> &'static str;

    /// Clone this template into a fresh voice.
    fn instantiate(&self) -> Box<dyn Instrument>;

    fn start(&mut self, host: &mut dyn InstrHost, evt: &NoteEvent);
    fn param(&mut self, host: &mut dyn InstrHost, evt: &NoteEvent);
    fn stop(&mut self, host: &mut dyn InstrHost);

    /// Stop without waiting for pedals or long releases.
    fn cancel(&mut self, host: &mut dyn InstrHost) {
        self.stop(host);
    }

    fn tick(&mut self, host: &mut dyn InstrHost);
    fn is_finished(&self) -> bool;

    fn get_param(&self, id: i16) -> Option<f32>;
    /// `false` when the ID does not address anything on this type.
    fn set_param(&mut self, id: i16, value: f32) -> bool;

    /// `-1` when the name is unknown.
    fn map_param_id(&self, name: &str) -> i16;
    fn map_param_name(&self, id: i16) -> Option<String>;
    /// Every name this instrument answers to in its current configuration.
    fn param_names(&self) -> Vec<String>;

    fn load(&mut self, el: &Element) -> Result<(), LoadError>;
    fn save(&self, el: &mut Element);
}

/// Apply the instrument parameters an event carries.
pub fn apply_event_params(instr: &mut dyn Instrument, evt: &NoteEvent) {
    for (id, value) in evt.instrument_params() {
        if !instr.set_param(id, value) {
            tracing::debug!(id, instrument = instr.type_name(), "event parameter ignored");
        }
    }
}

/// Host for playing a voice outside a manager.
///
/// Everything written to it is summed into one stereo frame that
/// [`StandaloneHost::take`] hands back and clears. Mono output lands on both
/// sides at full level. Controller state is settable for tests and offline
/// rendering.
#[derive(Debug, Clone)]
pub struct StandaloneHost {
    left: f32,
    right: f32,
    fx: [f32; 4],
    pub wheel_cents: f32,
    pub controllers: [u8; 128],
    pub bank: u16,
    pub patch: u16,
    /// `(key, voice, on)` in call order.
    pub exclusive: Vec<(ExclKey, VoiceId, bool)>,
}

impl Default for StandaloneHost {
    fn default() -> Self {
        Self {
            left: 0.0,
            right: 0.0,
            fx: [0.0; 4],
            wheel_cents: 0.0,
            controllers: [0; 128],
            bank: 0,
            patch: 0,
            exclusive: Vec::new(),
        }
    }
}

impl StandaloneHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// The frame accumulated since the last call.
    pub fn take(&mut self) -> (f32, f32) {
        let frame = (self.left, self.right);
        self.left = 0.0;
        self.right = 0.0;
        frame
    }

    /// Effects send accumulated since the last call.
    pub fn take_fx(&mut self, unit: usize) -> f32 {
        self.fx.get_mut(unit).map_or(0.0, std::mem::take)
    }

    /// Render `frames` ticks of one voice, left channel only.
    pub fn render_mono(&mut self, voice: &mut dyn Instrument, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|_| {
                voice.tick(self);
                self.take().0
            })
            .collect()
    }
}

impl InstrHost for StandaloneHost {
    fn output(&mut self, _channel: u16, value: f32) {
        self.left += value;
        self.right += value;
    }

    fn output2(&mut self, _channel: u16, left: f32, right: f32) {
        self.left += left;
        self.right += right;
    }

    fn output_direct(&mut self, left: f32, right: f32) {
        self.left += left;
        self.right += right;
    }

    fn fx_send(&mut self, unit: usize, value: f32) {
        if let Some(slot) = self.fx.get_mut(unit) {
            *slot += value;
        }
    }

    fn pitchbend_cents(&self, _channel: u16) -> f32 {
        self.wheel_cents
    }

    fn cc(&self, _channel: u16, controller: u8) -> u8 {
        self.controllers[usize::from(controller & 0x7f)]
    }

    fn bank(&self, _channel: u16) -> u16 {
        self.bank
    }

    fn patch(&self, _channel: u16) -> u16 {
        self.patch
    }

    fn excl_note_on(&mut self, key: ExclKey, voice: VoiceId) {
        self.exclusive.push((key, voice, true));
    }

    fn excl_note_off(&mut self, key: ExclKey, voice: VoiceId) {
        self.exclusive.push((key, voice, false));
    }

    fn mixer(&mut self) -> Option<&mut dyn Mixer> {
        None
    }
}
