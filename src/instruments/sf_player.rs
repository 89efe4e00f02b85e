//! SFPlayer: plays one fixed bank/preset of a soundbank.

use std::{mem, sync::Arc};

use tracing::debug;

use crate::{
    dsp::context::SynthContext,
    error::LoadError,
    patch::Element,
    soundbank::{BankHandle, BankRegistry, SbInstrument, ZonePlayer},
    synth::{
        event::{EventKind, NoteEvent},
        instrument::{apply_event_params, InstrHost, Instrument},
        param_id::{lookup, reverse, table_names, ParamTable},
    },
};

use super::gm_player::{lock_bank, SamplerOutput, P_BANK, P_DIRECT, P_PRESET, P_RVB};

static SF_PARAMS: ParamTable = ParamTable::new(&[
    ("bank", P_BANK),
    ("direct", P_DIRECT),
    ("preset", P_PRESET),
    ("rvb", P_RVB),
]);

/// Length of the crossfade when a pitch change leaves the playing zones.
const CROSSFADE_SECS: f32 = 0.05;

/*
Pitch Changes
=============

    new key inside every playing zone ──→ retune in place
    new key outside a zone            ──→ start a second zone list at the
                                          new key and crossfade

    gain   1 ┤╲            ╱ new
             │  ╲        ╱
             │    ╲    ╱
             │     ╲ ╱
             │     ╱ ╲
           0 ┤───╱─────╲── old
             0        fade_len

The old list keeps ticking until the fade completes and is then dropped.
*/
#[derive(Debug, Clone)]
pub struct SfPlayer {
    ctx: Arc<SynthContext>,
    registry: Option<Arc<BankRegistry>>,
    bank: Option<BankHandle>,
    bank_num: u16,
    preset: u16,
    player: ZonePlayer,
    fading: Option<ZonePlayer>,
    fade_pos: u32,
    fade_len: u32,
    out: SamplerOutput,
}

impl SfPlayer {
    pub const TYPE: &'static str = "SFPlayer";

    pub fn new(ctx: Arc<SynthContext>) -> Self {
        Self {
            player: ZonePlayer::new(ctx.clone()),
            fade_len: ctx.params.samples(CROSSFADE_SECS).max(1),
            ctx,
            registry: None,
            bank: None,
            bank_num: 0,
            preset: 0,
            fading: None,
            fade_pos: 0,
            out: SamplerOutput::default(),
        }
    }

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

    pub fn set_preset(&mut self, bank: u16, preset: u16) {
        self.bank_num = bank;
        self.preset = preset;
    }

    pub fn preset(&self) -> (u16, u16) {
        (self.bank_num, self.preset)
    }

    pub fn is_crossfading(&self) -> bool {
        self.fading.is_some()
    }

    fn instrument(&self) -> Option<&SbInstrument> {
        self.bank.as_ref()?.find_instrument(self.bank_num, self.preset)
    }

    /// A new zone list takes over the exclusive groups of the old one.
    fn change_key(&mut self, host: &mut dyn InstrHost, key: i32) {
        if self.player.covers(key) {
            self.player.retune(key);
            return;
        }
        let Some(instr) = self.bank.as_ref().and_then(|b| b.find_instrument(self.bank_num, self.preset)) else {
            self.player.retune(key);
            return;
        };
        let mut next = ZonePlayer::new(self.ctx.clone());
        if next.start(instr, key, self.player.velocity()) == 0 {
            debug!(key, "no zone for new key; keeping current zones");
            self.player.retune(key);
            return;
        }
        self.fading = Some(mem::replace(&mut self.player, next));
        self.fade_pos = 0;
        if let Some(old) = &self.fading {
            let next = &self.player;
            let dropped = old.exclusive_classes().filter(|c| !next.exclusive_classes().any(|n| n == *c));
            self.out.drop_exclusive(host, dropped);
        }
        self.out.claim_exclusive(host, self.player.exclusive_classes());
    }
}

impl Instrument for SfPlayer {
    fn type_name(&self) -> &'static str {
        Self::TYPE
    }

    fn instantiate(&self) -> Box<dyn Instrument> {
        Box::new(self.clone())
    }

    fn start(&mut self, host: &mut dyn InstrHost, evt: &NoteEvent) {
        apply_event_params(self, evt);
        self.out.begin(evt);
        self.fading = None;
        let velocity = evt.velocity.clamp(0.0, 127.0) as u8;
        match self.bank.as_ref().and_then(|b| b.find_instrument(self.bank_num, self.preset)) {
            Some(instr) => {
                self.player.start(instr, evt.pitch, velocity);
            }
            None => {
                debug!(bank = self.bank_num, preset = self.preset, "no soundbank preset");
                self.player.clear();
            }
        }
        self.out.claim_exclusive(host, self.player.exclusive_classes());
    }

    fn param(&mut self, host: &mut dyn InstrHost, evt: &NoteEvent) {
        if evt.kind == EventKind::Control {
            if self.out.pedal_released(host) {
                self.player.release();
                if let Some(old) = &mut self.fading {
                    old.release();
                }
            }
            return;
        }
        apply_event_params(self, evt);
        self.out.amplitude = evt.amplitude();
        if evt.pitch != self.player.key() {
            self.change_key(host, evt.pitch);
        }
    }

    fn stop(&mut self, host: &mut dyn InstrHost) {
        if self.out.request_stop(host) {
            self.player.release();
            if let Some(old) = &mut self.fading {
                old.release();
            }
        }
    }

    fn cancel(&mut self, host: &mut dyn InstrHost) {
        self.out.pending_stop = false;
        self.out.drop_exclusive(host, self.player.exclusive_classes());
        self.player.fast_release();
        if let Some(old) = &mut self.fading {
            old.fast_release();
        }
    }

    fn tick(&mut self, host: &mut dyn InstrHost) {
        let wheel = host.pitchbend_cents(self.out.channel);
        let mut frame = self.player.tick(wheel);
        if let Some(old) = &mut self.fading {
            let prev = old.tick(wheel);
            self.fade_pos += 1;
            let w = self.fade_pos as f32 / self.fade_len as f32;
            frame = (prev.0 + (frame.0 - prev.0) * w, prev.1 + (frame.1 - prev.1) * w);
            if self.fade_pos >= self.fade_len {
                self.fading = None;
            }
        }
        self.out.write(host, frame, self.player.reverb_send());
    }

    fn is_finished(&self) -> bool {
        self.player.is_finished() && self.fading.as_ref().map_or(true, ZonePlayer::is_finished)
    }

    fn get_param(&self, id: i16) -> Option<f32> {
        match id {
            P_BANK => Some(f32::from(self.bank_num)),
            P_PRESET => Some(f32::from(self.preset)),
            _ => self.out.get(id),
        }
    }

    fn set_param(&mut self, id: i16, value: f32) -> bool {
        match id {
            P_BANK => self.bank_num = value.clamp(0.0, 16_383.0) as u16,
            P_PRESET => self.preset = value.clamp(0.0, 127.0) as u16,
            _ => return self.out.set(id, value),
        }
        true
    }

    fn map_param_id(&self, name: &str) -> i16 {
        lookup(&[&SF_PARAMS], name)
    }

    fn map_param_name(&self, id: i16) -> Option<String> {
        reverse(&[&SF_PARAMS], id)
    }

    fn param_names(&self) -> Vec<String> {
        table_names(&[&SF_PARAMS])
    }

    fn load(&mut self, el: &Element) -> Result<(), LoadError> {
        self.out.load(el)?;
        self.bank_num = el.get_or("bank", self.bank_num)?;
        self.preset = el.get_or("preset", self.preset)?;
        if let Some(name) = el.attr("sb") {
            self.bank = lock_bank(self.registry.as_ref(), name);
        }
        if self.bank.is_some() && self.instrument().is_none() {
            debug!(bank = self.bank_num, preset = self.preset, "preset not in soundbank");
        }
        Ok(())
    }

    fn save(&self, el: &mut Element) {
        self.out.save(el);
        el.set_attr("bank", self.bank_num).set_attr("preset", self.preset);
        if let Some(bank) = &self.bank {
            el.set_attr("sb", bank.name());
        }
    }
}
