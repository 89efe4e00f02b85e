//! GMPlayer: plays whatever the channel's bank and program select.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    dsp::context::SynthContext,
    error::LoadError,
    patch::Element,
    soundbank::{BankHandle, BankRegistry, SbInstrument, ZonePlayer, PERCUSSION_BANK},
    synth::{
        event::{EventKind, NoteEvent, VoiceId},
        instrument::{apply_event_params, ExclKey, InstrHost, Instrument},
        manager::{CC_SOSTENUTO, CC_SUSTAIN},
        param_id::{lookup, reverse, table_names, ParamTable, P_GLOBAL},
    },
};

pub(crate) const P_BANK: i16 = P_GLOBAL;
pub(crate) const P_DIRECT: i16 = P_GLOBAL + 1;
pub(crate) const P_PRESET: i16 = P_GLOBAL + 2;
pub(crate) const P_RVB: i16 = P_GLOBAL + 3;

static GM_PARAMS: ParamTable = ParamTable::new(&[("direct", P_DIRECT), ("rvb", P_RVB)]);

/// MIDI channel 10 plays percussion.
const DRUM_CHANNEL: u16 = 9;

/// Settings and pedal handling shared by both soundbank players.
#[derive(Debug, Clone)]
pub(crate) struct SamplerOutput {
    pub channel: u16,
    pub amplitude: f32,
    /// Bypass the mixer and write to the master bus.
    pub direct: bool,
    /// Scales the zones' reverb send.
    pub reverb: f32,
    pub pending_stop: bool,
    pub voice: VoiceId,
}

impl Default for SamplerOutput {
    fn default() -> Self {
        Self {
            channel: 0,
            amplitude: 1.0,
            direct: false,
            reverb: 1.0,
            pending_stop: false,
            voice: 0,
        }
    }
}

impl SamplerOutput {
    pub fn begin(&mut self, evt: &NoteEvent) {
        self.channel = evt.channel;
        self.amplitude = evt.amplitude();
        self.voice = evt.voice;
        self.pending_stop = false;
    }

    pub fn pedal_down(&self, host: &dyn InstrHost) -> bool {
        host.switch(self.channel, CC_SUSTAIN) || host.switch(self.channel, CC_SOSTENUTO)
    }

    /// Release now, or once the pedals come up. True when released now.
    pub fn request_stop(&mut self, host: &dyn InstrHost) -> bool {
        if self.pedal_down(host) {
            self.pending_stop = true;
            false
        } else {
            self.pending_stop = false;
            true
        }
    }

    /// A controller moved: true when a deferred stop is now due.
    pub fn pedal_released(&mut self, host: &dyn InstrHost) -> bool {
        if self.pending_stop && !self.pedal_down(host) {
            self.pending_stop = false;
            true
        } else {
            false
        }
    }

    pub fn claim_exclusive(&self, host: &mut dyn InstrHost, classes: impl Iterator<Item = u16>) {
        for group in classes {
            host.excl_note_on(
                ExclKey {
                    channel: self.channel,
                    group,
                },
                self.voice,
            );
        }
    }

    pub fn drop_exclusive(&self, host: &mut dyn InstrHost, classes: impl Iterator<Item = u16>) {
        for group in classes {
            host.excl_note_off(
                ExclKey {
                    channel: self.channel,
                    group,
                },
                self.voice,
            );
        }
    }

    #[inline]
    pub fn write(&self, host: &mut dyn InstrHost, frame: (f32, f32), reverb_send: f32) {
        let (l, r) = (frame.0 * self.amplitude, frame.1 * self.amplitude);
        if self.direct {
            host.output_direct(l, r);
            return;
        }
        host.output2(self.channel, l, r);
        let send = reverb_send * self.reverb;
        if send > 0.0 {
            host.fx_send(0, (l + r) * 0.5 * send);
        }
    }

    pub fn get(&self, id: i16) -> Option<f32> {
        match id {
            P_DIRECT => Some(if self.direct { 1.0 } else { 0.0 }),
            P_RVB => Some(self.reverb),
            _ => None,
        }
    }

    pub fn set(&mut self, id: i16, value: f32) -> bool {
        match id {
            P_DIRECT => self.direct = value != 0.0,
            P_RVB => self.reverb = value.max(0.0),
            _ => return false,
        }
        true
    }

    pub fn load(&mut self, el: &Element) -> Result<(), LoadError> {
        self.direct = el.get_bool("direct", self.direct)?;
        self.reverb = el.get_or("rvb", self.reverb)?;
        Ok(())
    }

    pub fn save(&self, el: &mut Element) {
        el.set_bool("direct", self.direct);
        el.set_attr("rvb", self.reverb);
    }
}

/// Lock `name` in `registry`; `None` (logged) when that fails.
pub(crate) fn lock_bank(registry: Option<&Arc<BankRegistry>>, name: &str) -> Option<BankHandle> {
    let Some(registry) = registry else {
        warn!(bank = name, "no soundbank registry; player will be silent");
        return None;
    };
    match registry.lock(name) {
        Ok(handle) => Some(handle),
        Err(err) => {
            warn!(%err, "soundbank unavailable; player will be silent");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct GmPlayer {
    registry: Option<Arc<BankRegistry>>,
    bank: Option<BankHandle>,
    player: ZonePlayer,
    out: SamplerOutput,
}

impl GmPlayer {
    pub const TYPE: &'static str = "GMPlayer";

    pub fn new(ctx: Arc<SynthContext>) -> Self {
        Self {
            registry: None,
            bank: None,
            player: ZonePlayer::new(ctx),
            out: SamplerOutput::default(),
        }
    }

    /// Bank names in saved files resolve through this registry.
    pub fn with_registry(mut self, registry: Arc<BankRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn set_bank(&mut self, bank: Option<BankHandle>) {
        self.bank = bank;
    }

    pub fn bank(&self) -> Option<&BankHandle> {
        self.bank.as_ref()
    }

    pub fn zone_count(&self) -> usize {
        self.player.zone_count()
    }

    fn find<'a>(bank: Option<&'a BankHandle>, host: &dyn InstrHost, channel: u16) -> Option<&'a SbInstrument> {
        let bank_num = if channel == DRUM_CHANNEL {
            PERCUSSION_BANK
        } else {
            host.bank(channel)
        };
        bank?.find_instrument(bank_num, host.patch(channel))
    }
}

impl Instrument for GmPlayer {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    fn instantiate(&self) -> Box<dyn Instrument> {
        Box::new(self.clone())
    }

    fn start(&mut self, host: &mut dyn InstrHost, evt: &NoteEvent) {
        apply_event_params(self, evt);
        self.out.begin(evt);
        let velocity = evt.velocity.clamp(0.0, 127.0) as u8;
        match Self::find(self.bank.as_ref(), host, evt.channel) {
            Some(instr) => {
                self.player.start(instr, evt.pitch, velocity);
            }
            None => {
                debug!(channel = evt.channel, "no soundbank instrument for channel");
                self.player.clear();
            }
        }
        self.out.claim_exclusive(host, self.player.exclusive_classes());
    }

    fn param(&mut self, host: &mut dyn InstrHost, evt: &NoteEvent) {
        if evt.kind == EventKind::Control {
            if self.out.pedal_released(host) {
                self.player.release();
            }
            return;
        }
        apply_event_params(self, evt);
        self.out.amplitude = evt.amplitude();
        if evt.pitch != self.player.key() {
            self.player.retune(evt.pitch);
        }
    }

    fn stop(&mut self, host: &mut dyn InstrHost) {
        if self.out.request_stop(host) {
            self.player.release();
        }
    }

    fn cancel(&mut self, host: &mut dyn InstrHost) {
        self.out.pending_stop = false;
        self.out.drop_exclusive(host, self.player.exclusive_classes());
        self.player.fast_release();
    }

    fn tick(&mut self, host: &mut dyn InstrHost) {
        let frame = self.player.tick(host.pitchbend_cents(self.out.channel));
        self.out.write(host, frame, self.player.reverb_send());
    }

    fn is_finished(&self) -> bool {
        self.player.is_finished()
    }

    fn get_param(&self, id: i16) -> Option<f32> {
        self.out.get(id)
    }

    fn set_param(&mut self, id: i16, value: f32) -> bool {
        self.out.set(id, value)
    }

    fn map_param_id(&self, name: &str) -> i16 {
        lookup(&[&GM_PARAMS], name)
    }

    fn map_param_name(&self, id: i16) -> Option<String> {
        reverse(&[&GM_PARAMS], id)
    }

    fn param_names(&self) -> Vec<String> {
        table_names(&[&GM_PARAMS])
    }

    fn load(&mut self, el: &Element) -> Result<(), LoadError> {
        self.out.load(el)?;
        if let Some(name) = el.attr("sb") {
            self.bank = lock_bank(self.registry.as_ref(), name);
        }
        Ok(())
    }

    fn save(&self, el: &mut Element) {
        self.out.save(el);
        if let Some(bank) = &self.bank {
            el.set_attr("sb", bank.name());
        }
    }
}
