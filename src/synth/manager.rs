use std::{collections::BTreeMap, sync::Arc};

use crate::{
    config::EngineConfig,
    dsp::context::SynthContext,
    io::midi::MidiEvent,
    synth::{
        event::{CommandReceiver, ControlChange, EngineCommand, EventKind, NoteEvent, VoiceId},
        instrument::{ExclKey, InstrHost, Instrument},
        mixer::{ChannelMixer, Mixer},
    },
};

/*
Instrument Manager
==================

The manager is the audio-thread side of the engine. It owns the instrument
templates, the playing voices, per-channel controller state and the mixer.
A tick runs every voice once, collects their samples in the mixer and hands
back one stereo frame.

    control thread                     audio thread
    ──────────────                     ────────────
    EngineCommand ──rtrb queue──→ drain_commands ─→ start / param / stop
                                       │
                                  tick ─┼─→ voice.tick(host) ×N ─→ mixer.out()
                                       │
                                  finished voices dropped

Channel State
-------------

  wheel      Pitch-wheel position, kept in cents (raw 14-bit value scaled by
             the channel's wheel range, 200 cents by default).

  cc[128]    Last value of every controller. 64 (sustain) and 66 (sostenuto)
             are read by the soundbank players to defer note-off.

  bank/prog  Selected with CC 0 and program change. GMPlayer reads them.

Note Length
-----------

An event with a finite `duration` stops itself: the voice counts the
samples down and calls `stop` when it reaches zero. Open-ended notes
(`u32::MAX`) wait for an explicit stop or note-off.

Exclusive Groups
----------------

A voice that starts in an exclusive group reports `(channel, group)` through
`excl_note_on`. If another voice already owns that key it is queued for
removal and dropped right after the new voice's `start`, before anything
ticks again.
*/

const DEFAULT_WHEEL_RANGE: f32 = 200.0;
const MIDI_CHANNELS: usize = 16;

pub const CC_BANK_SELECT: u8 = 0;
pub const CC_VOLUME: u8 = 7;
pub const CC_PAN: u8 = 10;
pub const CC_SUSTAIN: u8 = 64;
pub const CC_SOSTENUTO: u8 = 66;
pub const CC_ALL_SOUND_OFF: u8 = 120;
pub const CC_ALL_NOTES_OFF: u8 = 123;

#[derive(Debug, Clone)]
struct ChannelState {
    wheel_cents: f32,
    wheel_range: f32,
    controllers: [u8; 128],
    bank: u16,
    patch: u16,
}

impl Default for ChannelState {
    fn default() -> Self {
        let mut controllers = [0; 128];
        controllers[usize::from(CC_VOLUME)] = 100;
        controllers[usize::from(CC_PAN)] = 64;
        Self {
            wheel_cents: 0.0,
            wheel_range: DEFAULT_WHEEL_RANGE,
            controllers,
            bank: 0,
            patch: 0,
        }
    }
}

/// Everything a voice can reach during a call.
struct HostState {
    mixer: ChannelMixer,
    channels: Vec<ChannelState>,
    exclusive: Vec<(ExclKey, VoiceId)>,
    pending_kill: Vec<VoiceId>,
}

impl HostState {
    fn channel(&self, ch: u16) -> Option<&ChannelState> {
        self.channels.get(usize::from(ch))
    }
}

impl InstrHost for HostState {
    #[inline]
    fn output(&mut self, channel: u16, value: f32) {
        self.mixer.channel_in(usize::from(channel), value);
    }

    #[inline]
    fn output2(&mut self, channel: u16, left: f32, right: f32) {
        self.mixer.channel_in2(usize::from(channel), left, right);
    }

    #[inline]
    fn output_direct(&mut self, left: f32, right: f32) {
        self.mixer.direct_in(left, right);
    }

    #[inline]
    fn fx_send(&mut self, unit: usize, value: f32) {
        self.mixer.fx_in(unit, value);
    }

    fn pitchbend_cents(&self, channel: u16) -> f32 {
        self.channel(channel).map_or(0.0, |c| c.wheel_cents)
    }

    fn cc(&self, channel: u16, controller: u8) -> u8 {
        self.channel(channel)
            .map_or(0, |c| c.controllers[usize::from(controller & 0x7f)])
    }

    fn bank(&self, channel: u16) -> u16 {
        self.channel(channel).map_or(0, |c| c.bank)
    }

    fn patch(&self, channel: u16) -> u16 {
        self.channel(channel).map_or(0, |c| c.patch)
    }

    fn excl_note_on(&mut self, key: ExclKey, voice: VoiceId) {
        match self.exclusive.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => {
                if slot.1 != voice {
                    self.pending_kill.push(slot.1);
                    slot.1 = voice;
                }
            }
            None => self.exclusive.push((key, voice)),
        }
    }

    fn excl_note_off(&mut self, key: ExclKey, voice: VoiceId) {
        self.exclusive.retain(|(k, v)| !(*k == key && *v == voice));
    }

    fn mixer(&mut self) -> Option<&mut dyn Mixer> {
        Some(&mut self.mixer)
    }
}

struct Voice {
    id: VoiceId,
    inum: u16,
    channel: u16,
    pitch: i32,
    released: bool,
    /// Samples until an automatic stop, `u32::MAX` for open-ended notes.
    remaining: u32,
    instr: Box<dyn Instrument>,
}

/// Templates, voices and channel state for one engine.
pub struct InstrManager {
    ctx: Arc<SynthContext>,
    templates: BTreeMap<u16, Box<dyn Instrument>>,
    voices: Vec<Voice>,
    host: HostState,
    channel_instruments: [u16; MIDI_CHANNELS],
    next_id: VoiceId,
}

impl InstrManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_mixer(Arc::new(config.context()), ChannelMixer::from_config(config))
    }

    pub fn with_mixer(ctx: Arc<SynthContext>, mixer: ChannelMixer) -> Self {
        let channels = mixer.channels().max(MIDI_CHANNELS);
        let mut channel_instruments = [0; MIDI_CHANNELS];
        for (ch, inum) in channel_instruments.iter_mut().enumerate() {
            *inum = ch as u16;
        }
        Self {
            ctx,
            templates: BTreeMap::new(),
            voices: Vec::with_capacity(64),
            host: HostState {
                mixer,
                channels: vec![ChannelState::default(); channels],
                exclusive: Vec::with_capacity(16),
                pending_kill: Vec::with_capacity(8),
            },
            channel_instruments,
            next_id: 1,
        }
    }

    pub fn context(&self) -> &Arc<SynthContext> {
        &self.ctx
    }

    pub fn mixer(&self) -> &ChannelMixer {
        &self.host.mixer
    }

    pub fn mixer_mut(&mut self) -> &mut ChannelMixer {
        &mut self.host.mixer
    }

    /// Register a template under an instrument number, replacing any previous one.
    pub fn add_instrument(&mut self, inum: u16, template: Box<dyn Instrument>) {
        tracing::debug!(inum, kind = template.type_name(), "instrument added");
        self.templates.insert(inum, template);
    }

    pub fn remove_instrument(&mut self, inum: u16) -> Option<Box<dyn Instrument>> {
        self.templates.remove(&inum)
    }

    pub fn instrument(&self, inum: u16) -> Option<&dyn Instrument> {
        self.templates.get(&inum).map(|t| t.as_ref())
    }

    /// Edit a template. Voices already playing keep their own copy.
    pub fn instrument_mut(&mut self, inum: u16) -> Option<&mut (dyn Instrument + 'static)> {
        self.templates.get_mut(&inum).map(|t| t.as_mut())
    }

    /// Instrument number MIDI notes on a channel play.
    pub fn set_channel_instrument(&mut self, channel: u8, inum: u16) {
        if let Some(slot) = self.channel_instruments.get_mut(usize::from(channel)) {
            *slot = inum;
        }
    }

    /// Pitch-wheel range for a channel in cents at full deflection.
    pub fn set_wheel_range(&mut self, channel: u16, cents: f32) {
        if let Some(c) = self.host.channels.get_mut(usize::from(channel)) {
            c.wheel_range = cents;
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn voice_ids(&self) -> impl Iterator<Item = VoiceId> + '_ {
        self.voices.iter().map(|v| v.id)
    }

    pub fn voice(&self, id: VoiceId) -> Option<&dyn Instrument> {
        self.voices.iter().find(|v| v.id == id).map(|v| v.instr.as_ref())
    }

    /// Start a voice of the event's instrument. Returns `None` when no
    /// template is registered under `evt.inum`.
    pub fn start(&mut self, mut evt: NoteEvent) -> Option<VoiceId> {
        let Some(template) = self.templates.get(&evt.inum) else {
            tracing::warn!(inum = evt.inum, "start for unknown instrument skipped");
            return None;
        };
        let id = if evt.voice != 0 {
            evt.voice
        } else {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1).max(1);
            id
        };
        evt.voice = id;
        evt.kind = EventKind::Start;

        let mut instr = template.instantiate();
        instr.start(&mut self.host, &evt);
        self.reap_pending();
        tracing::debug!(voice = id, inum = evt.inum, pitch = evt.pitch, "voice started");

        self.voices.push(Voice {
            id,
            inum: evt.inum,
            channel: evt.channel,
            pitch: evt.pitch,
            released: false,
            remaining: evt.duration,
            instr,
        });
        Some(id)
    }

    /// Live parameter change for one voice.
    pub fn param(&mut self, evt: &NoteEvent) {
        let host = &mut self.host;
        if let Some(v) = self.voices.iter_mut().find(|v| v.id == evt.voice) {
            v.instr.param(host, evt);
        }
        self.reap_pending();
    }

    pub fn stop(&mut self, id: VoiceId) {
        let host = &mut self.host;
        if let Some(v) = self.voices.iter_mut().find(|v| v.id == id && !v.released) {
            v.released = true;
            v.instr.stop(host);
        }
    }

    pub fn all_notes_off(&mut self) {
        let host = &mut self.host;
        for v in self.voices.iter_mut().filter(|v| !v.released) {
            v.released = true;
            v.instr.stop(host);
        }
    }

    /// Drop every voice immediately.
    pub fn all_sound_off(&mut self) {
        self.voices.clear();
        self.host.exclusive.clear();
        self.host.mixer.reset();
    }

    /// Update channel controller state and forward it to the channel's voices.
    ///
    /// Pitch-wheel values are signed 14-bit (-8192..=8191); controller values
    /// are 0..=127.
    pub fn control(&mut self, channel: u16, change: ControlChange, value: i32) {
        let Some(state) = self.host.channels.get_mut(usize::from(channel)) else {
            return;
        };
        match change {
            ControlChange::PitchWheel => {
                state.wheel_cents = value.clamp(-8192, 8191) as f32 / 8192.0 * state.wheel_range;
            }
            ControlChange::Controller(n) => {
                let n = n & 0x7f;
                let v = value.clamp(0, 127) as u8;
                state.controllers[usize::from(n)] = v;
                match n {
                    CC_BANK_SELECT => state.bank = u16::from(v),
                    CC_ALL_SOUND_OFF => {
                        self.channel_sound_off(channel);
                        return;
                    }
                    CC_ALL_NOTES_OFF => {
                        self.channel_notes_off(channel);
                        return;
                    }
                    _ => {}
                }
            }
        }

        let evt = NoteEvent {
            kind: EventKind::Control,
            channel,
            control: Some(change),
            ..NoteEvent::default()
        };
        let host = &mut self.host;
        for v in self.voices.iter_mut().filter(|v| v.channel == channel) {
            v.instr.param(host, &evt);
        }
    }

    pub fn program_change(&mut self, channel: u16, program: u8) {
        if let Some(state) = self.host.channels.get_mut(usize::from(channel)) {
            state.patch = u16::from(program & 0x7f);
        }
    }

    fn channel_notes_off(&mut self, channel: u16) {
        let host = &mut self.host;
        for v in self
            .voices
            .iter_mut()
            .filter(|v| v.channel == channel && !v.released)
        {
            v.released = true;
            v.instr.stop(host);
        }
    }

    fn channel_sound_off(&mut self, channel: u16) {
        let host = &mut self.host;
        for v in self.voices.iter_mut().filter(|v| v.channel == channel) {
            v.released = true;
            v.instr.cancel(host);
        }
    }

    pub fn handle_midi(&mut self, event: MidiEvent) {
        match event {
            MidiEvent::NoteOn {
                channel,
                key,
                velocity,
            } if velocity > 0 => {
                let ch = channel & 0x0f;
                let inum = self.channel_instruments[usize::from(ch)];
                let pitch = i32::from(key & 0x7f);
                let evt = NoteEvent {
                    velocity: f32::from(velocity),
                    ..NoteEvent::start(inum, u16::from(ch), pitch, self.ctx.params.pitch_frequency(pitch))
                };
                self.start(evt);
            }
            MidiEvent::NoteOn { channel, key, .. } | MidiEvent::NoteOff { channel, key, .. } => {
                let ch = u16::from(channel & 0x0f);
                let pitch = i32::from(key & 0x7f);
                let host = &mut self.host;
                for v in self
                    .voices
                    .iter_mut()
                    .filter(|v| v.channel == ch && v.pitch == pitch && !v.released)
                {
                    v.released = true;
                    v.instr.stop(host);
                }
            }
            MidiEvent::ControlChange {
                channel,
                controller,
                value,
            } => self.control(
                u16::from(channel & 0x0f),
                ControlChange::Controller(controller),
                i32::from(value),
            ),
            MidiEvent::PitchBend { channel, value } => self.control(
                u16::from(channel & 0x0f),
                ControlChange::PitchWheel,
                i32::from(value),
            ),
            MidiEvent::ProgramChange { channel, program } => {
                self.program_change(u16::from(channel & 0x0f), program)
            }
        }
    }

    /// Apply every queued command.
    pub fn drain_commands<R: CommandReceiver + ?Sized>(&mut self, rx: &mut R) {
        while let Some(cmd) = rx.pop() {
            match cmd {
                EngineCommand::Start(evt) => {
                    self.start(evt);
                }
                EngineCommand::Param(evt) => self.param(&evt),
                EngineCommand::Stop(id) => self.stop(id),
                EngineCommand::Midi(m) => self.handle_midi(m),
                EngineCommand::AllNotesOff => self.all_notes_off(),
            }
        }
    }

    /// Run every voice for one sample and return the mixed frame.
    pub fn tick(&mut self) -> (f32, f32) {
        let host = &mut self.host;
        for v in &mut self.voices {
            if v.remaining != u32::MAX && !v.released {
                if v.remaining == 0 {
                    v.released = true;
                    v.instr.stop(host);
                } else {
                    v.remaining -= 1;
                }
            }
            v.instr.tick(host);
        }
        self.remove_finished();
        self.host.mixer.out()
    }

    /// Fill an interleaved stereo buffer.
    pub fn render(&mut self, out: &mut [f32]) {
        for frame in out.chunks_exact_mut(2) {
            let (l, r) = self.tick();
            frame[0] = l;
            frame[1] = r;
        }
    }

    fn remove_finished(&mut self) {
        if !self.voices.iter().any(|v| v.instr.is_finished()) {
            return;
        }
        let exclusive = &mut self.host.exclusive;
        self.voices.retain(|v| {
            if v.instr.is_finished() {
                exclusive.retain(|(_, owner)| *owner != v.id);
                tracing::debug!(voice = v.id, inum = v.inum, "voice finished");
                false
            } else {
                true
            }
        });
    }

    fn reap_pending(&mut self) {
        if self.host.pending_kill.is_empty() {
            return;
        }
        let pending = &mut self.host.pending_kill;
        self.voices.retain(|v| {
            let kill = pending.contains(&v.id);
            if kill {
                tracing::debug!(voice = v.id, "voice stolen by exclusive group");
            }
            !kill
        });
        pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::LoadError, patch::Element};

    /// Emits a constant until stopped, then finishes after `tail` ticks.
    #[derive(Clone)]
    struct Dc {
        level: f32,
        channel: u16,
        group: u16,
        id: VoiceId,
        tail: Option<u32>,
        wheel: f32,
    }

    impl Dc {
        fn new(level: f32) -> Self {
            Self {
                level,
                channel: 0,
                group: 0,
                id: 0,
                tail: None,
                wheel: 0.0,
            }
        }
    }

    impl Instrument for Dc {
        fn type_name(&self) -> &'static str {
            "Dc"
        }
        fn instantiate(&self) -> Box<dyn Instrument> {
            Box::new(self.clone())
        }
        fn start(&mut self, host: &mut dyn InstrHost, evt: &NoteEvent) {
            self.channel = evt.channel;
            self.id = evt.voice;
            if self.group != 0 {
                host.excl_note_on(
                    ExclKey {
                        channel: self.channel,
                        group: self.group,
                    },
                    self.id,
                );
            }
        }
        fn param(&mut self, host: &mut dyn InstrHost, evt: &NoteEvent) {
            if evt.kind == EventKind::Control {
                self.wheel = host.pitchbend_cents(self.channel);
            }
        }
        fn stop(&mut self, _host: &mut dyn InstrHost) {
            self.tail = Some(2);
        }
        fn tick(&mut self, host: &mut dyn InstrHost) {
            if let Some(t) = self.tail.as_mut() {
                *t = t.saturating_sub(1);
            }
            host.output(self.channel, self.level);
        }
        fn is_finished(&self) -> bool {
            self.tail == Some(0)
        }
        fn get_param(&self, _id: i16) -> Option<f32> {
            None
        }
        fn set_param(&mut self, _id: i16, _value: f32) -> bool {
            false
        }
        fn map_param_id(&self, _name: &str) -> i16 {
            -1
        }
        fn map_param_name(&self, _id: i16) -> Option<String> {
            None
        }
        fn param_names(&self) -> Vec<String> {
            Vec::new()
        }
        fn load(&mut self, _el: &Element) -> Result<(), LoadError> {
            Ok(())
        }
        fn save(&self, _el: &mut Element) {}
    }

    fn manager() -> InstrManager {
        let ctx = Arc::new(SynthContext::with_options(8000.0, 256, false));
        let mixer = ChannelMixer::new(8000.0, 4, 0, 1.0, crate::synth::mixer::PanLaw::Linear);
        InstrManager::with_mixer(ctx, mixer)
    }

    #[test]
    fn unknown_instrument_is_skipped() {
        let mut mgr = manager();
        assert_eq!(mgr.start(NoteEvent::start(9, 0, 60, 261.6)), None);
        assert_eq!(mgr.active_voices(), 0);
    }

    #[test]
    fn voices_mix_and_finish() {
        let mut mgr = manager();
        mgr.add_instrument(1, Box::new(Dc::new(0.5)));
        let a = mgr.start(NoteEvent::start(1, 0, 60, 261.6)).unwrap();
        let b = mgr.start(NoteEvent::start(1, 0, 64, 329.6)).unwrap();
        assert_ne!(a, b);
        let (l, r) = mgr.tick();
        assert!((l - 0.5).abs() < 1e-6 && (r - 0.5).abs() < 1e-6);

        mgr.stop(a);
        mgr.tick();
        mgr.tick();
        assert_eq!(mgr.active_voices(), 1);
        assert!(mgr.voice(a).is_none());
        assert!(mgr.voice(b).is_some());
    }

    #[test]
    fn exclusive_group_drops_previous_voice_before_tick() {
        let mut mgr = manager();
        let mut dc = Dc::new(1.0);
        dc.group = 3;
        mgr.add_instrument(1, Box::new(dc));
        let first = mgr.start(NoteEvent::start(1, 0, 42, 92.5)).unwrap();
        let second = mgr.start(NoteEvent::start(1, 0, 44, 103.8)).unwrap();
        assert!(mgr.voice(first).is_none());
        assert_eq!(mgr.voice_ids().collect::<Vec<_>>(), vec![second]);
        // only the new voice reaches the mixer
        let (l, _) = mgr.tick();
        assert!((l - 0.5).abs() < 1e-6);

        // a different channel is a different group
        mgr.start(NoteEvent::start(1, 1, 44, 103.8)).unwrap();
        assert_eq!(mgr.active_voices(), 2);
    }

    #[test]
    fn pitch_wheel_reaches_channel_voices() {
        let mut mgr = manager();
        mgr.add_instrument(1, Box::new(Dc::new(0.0)));
        mgr.start(NoteEvent::start(1, 2, 60, 261.6));
        mgr.control(2, ControlChange::PitchWheel, 4096);
        assert!((mgr.host.pitchbend_cents(2) - 100.0).abs() < 1e-3);
        assert_eq!(mgr.host.pitchbend_cents(0), 0.0);
    }

    #[test]
    fn midi_note_off_releases_matching_voice() {
        let mut mgr = manager();
        mgr.add_instrument(0, Box::new(Dc::new(0.1)));
        mgr.handle_midi(MidiEvent::NoteOn {
            channel: 0,
            key: 60,
            velocity: 100,
        });
        mgr.handle_midi(MidiEvent::NoteOn {
            channel: 0,
            key: 62,
            velocity: 100,
        });
        mgr.handle_midi(MidiEvent::NoteOn {
            channel: 0,
            key: 60,
            velocity: 0,
        });
        for _ in 0..3 {
            mgr.tick();
        }
        assert_eq!(mgr.active_voices(), 1);
    }

    #[test]
    fn controllers_and_program() {
        let mut mgr = manager();
        mgr.handle_midi(MidiEvent::ControlChange {
            channel: 1,
            controller: CC_BANK_SELECT,
            value: 2,
        });
        mgr.handle_midi(MidiEvent::ProgramChange {
            channel: 1,
            program: 33,
        });
        mgr.handle_midi(MidiEvent::ControlChange {
            channel: 1,
            controller: CC_SUSTAIN,
            value: 127,
        });
        assert_eq!(mgr.host.bank(1), 2);
        assert_eq!(mgr.host.patch(1), 33);
        assert!(mgr.host.switch(1, CC_SUSTAIN));
        assert!(!mgr.host.switch(0, CC_SUSTAIN));
    }

    #[test]
    fn finite_duration_stops_itself() {
        let mut mgr = manager();
        mgr.add_instrument(1, Box::new(Dc::new(0.5)));
        mgr.start(NoteEvent::start(1, 0, 60, 261.6).with_duration(4));
        mgr.start(NoteEvent::start(1, 0, 64, 329.6));
        for _ in 0..5 {
            mgr.tick();
        }
        assert_eq!(mgr.active_voices(), 2);
        // stop on tick 5, then the two-tick tail
        mgr.tick();
        mgr.tick();
        assert_eq!(mgr.active_voices(), 1);
    }

    #[test]
    fn render_interleaves_frames() {
        let mut mgr = manager();
        mgr.add_instrument(1, Box::new(Dc::new(0.5)));
        mgr.start(NoteEvent::start(1, 0, 60, 261.6));
        let mut out = [0.0; 8];
        mgr.render(&mut out);
        assert!(out.iter().all(|v| (v - 0.25).abs() < 1e-6));
    }
}
