#[cfg(feature = "rtrb")]
use rtrb::Consumer;

use crate::io::midi::MidiEvent;

/// Manager-assigned handle for a playing voice.
pub type VoiceId = u32;

/// Parameter IDs 0..=7 address the event's own fields.
pub const P_INUM: i16 = 0;
pub const P_CHNL: i16 = 1;
pub const P_START: i16 = 2;
pub const P_DUR: i16 = 3;
pub const P_PITCH: i16 = 4;
pub const P_FREQ: i16 = 5;
pub const P_VOLUME: i16 = 6;
pub const P_VELOC: i16 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Start,
    Stop,
    /// Re-apply settable parameters without restarting envelopes.
    Param,
    /// A continuous controller moved (pitch wheel, CC, pedal).
    Control,
}

/// Which controller a `Control` event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlChange {
    PitchWheel,
    Controller(u8),
}

/// A performance event routed to one voice.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEvent {
    pub kind: EventKind,
    pub voice: VoiceId,
    pub inum: u16,
    pub channel: u16,
    /// Sample time the event is scheduled for (informational).
    pub start: u32,
    pub pitch: i32,
    pub frequency: f32,
    pub volume: f32,
    /// MIDI-style 0..=127.
    pub velocity: f32,
    /// Note length in samples; `u32::MAX` when open-ended.
    pub duration: u32,
    pub control: Option<ControlChange>,
    pub params: Vec<(i16, f32)>,
}

impl Default for NoteEvent {
    fn default() -> Self {
        Self {
            kind: EventKind::Start,
            voice: 0,
            inum: 0,
            channel: 0,
            start: 0,
            pitch: 69,
            frequency: 440.0,
            volume: 1.0,
            velocity: 127.0,
            duration: u32::MAX,
            control: None,
            params: Vec::new(),
        }
    }
}

impl NoteEvent {
    pub fn start(inum: u16, channel: u16, pitch: i32, frequency: f32) -> Self {
        Self {
            inum,
            channel,
            pitch,
            frequency,
            ..Self::default()
        }
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_velocity(mut self, velocity: f32) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_duration(mut self, samples: u32) -> Self {
        self.duration = samples;
        self
    }

    pub fn with_param(mut self, id: i16, value: f32) -> Self {
        self.set_param(id, value);
        self
    }

    /// Volume scaled by velocity: the amplitude a voice should peak at.
    pub fn amplitude(&self) -> f32 {
        self.volume * (self.velocity / 127.0).clamp(0.0, 1.0)
    }

    /// Duration in seconds, `None` when open-ended.
    pub fn duration_secs(&self, sample_rate: f32) -> Option<f32> {
        (self.duration != u32::MAX).then(|| self.duration as f32 / sample_rate)
    }

    /// Set an event field (IDs 0..=7) or append an instrument parameter.
    pub fn set_param(&mut self, id: i16, value: f32) {
        match id {
            P_INUM => self.inum = value.max(0.0) as u16,
            P_CHNL => self.channel = value.max(0.0) as u16,
            P_START => self.start = value.max(0.0) as u32,
            P_DUR => self.duration = value.max(0.0) as u32,
            P_PITCH => self.pitch = value as i32,
            P_FREQ => self.frequency = value,
            P_VOLUME => self.volume = value,
            P_VELOC => self.velocity = value,
            _ => match self.params.iter_mut().find(|(k, _)| *k == id) {
                Some(slot) => slot.1 = value,
                None => self.params.push((id, value)),
            },
        }
    }

    pub fn get_param(&self, id: i16) -> Option<f32> {
        Some(match id {
            P_INUM => self.inum as f32,
            P_CHNL => self.channel as f32,
            P_START => self.start as f32,
            P_DUR => self.duration as f32,
            P_PITCH => self.pitch as f32,
            P_FREQ => self.frequency,
            P_VOLUME => self.volume,
            P_VELOC => self.velocity,
            _ => return self.params.iter().find(|(k, _)| *k == id).map(|(_, v)| *v),
        })
    }

    /// Instrument parameters carried by the event (IDs ≥ 16).
    pub fn instrument_params(&self) -> impl Iterator<Item = (i16, f32)> + '_ {
        self.params.iter().copied()
    }
}

/// Commands sent from the control thread to the audio thread.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Start(NoteEvent),
    Param(NoteEvent),
    Stop(VoiceId),
    Midi(MidiEvent),
    AllNotesOff,
}

pub trait CommandReceiver {
    fn pop(&mut self) -> Option<EngineCommand>;
}

#[cfg(feature = "rtrb")]
impl CommandReceiver for Consumer<EngineCommand> {
    fn pop(&mut self) -> Option<EngineCommand> {
        Consumer::pop(self).ok()
    }
}
