//! Channel-voice MIDI messages.

/// A decoded channel message. Channels are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8, velocity: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    /// Signed 14-bit, centre 0.
    PitchBend { channel: u8, value: i16 },
    ProgramChange { channel: u8, program: u8 },
}

impl MidiEvent {
    pub fn channel(&self) -> u8 {
        match *self {
            MidiEvent::NoteOn { channel, .. }
            | MidiEvent::NoteOff { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::PitchBend { channel, .. }
            | MidiEvent::ProgramChange { channel, .. } => channel,
        }
    }

    /// Decode one complete message. Note-on with velocity 0 is a note-off.
    /// System and unsupported messages give `None`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;
        let channel = status & 0x0f;
        let d = |i: usize| data.get(i).map(|b| b & 0x7f);
        let event = match status & 0xf0 {
            0x80 => MidiEvent::NoteOff {
                channel,
                key: d(0)?,
                velocity: d(1)?,
            },
            0x90 => match (d(0)?, d(1)?) {
                (key, 0) => MidiEvent::NoteOff {
                    channel,
                    key,
                    velocity: 0,
                },
                (key, velocity) => MidiEvent::NoteOn {
                    channel,
                    key,
                    velocity,
                },
            },
            0xb0 => MidiEvent::ControlChange {
                channel,
                controller: d(0)?,
                value: d(1)?,
            },
            0xc0 => MidiEvent::ProgramChange {
                channel,
                program: d(0)?,
            },
            0xe0 => {
                let raw = (i16::from(d(1)?) << 7) | i16::from(d(0)?);
                MidiEvent::PitchBend {
                    channel,
                    value: raw - 8192,
                }
            }
            _ => return None,
        };
        Some(event)
    }

    /// Encode as a complete three- or two-byte message.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            MidiEvent::NoteOn {
                channel,
                key,
                velocity,
            } => vec![0x90 | (channel & 0x0f), key & 0x7f, velocity & 0x7f],
            MidiEvent::NoteOff {
                channel,
                key,
                velocity,
            } => vec![0x80 | (channel & 0x0f), key & 0x7f, velocity & 0x7f],
            MidiEvent::ControlChange {
                channel,
                controller,
                value,
            } => vec![0xb0 | (channel & 0x0f), controller & 0x7f, value & 0x7f],
            MidiEvent::ProgramChange { channel, program } => vec![0xc0 | (channel & 0x0f), program & 0x7f],
            MidiEvent::PitchBend { channel, value } => {
                let raw = (i32::from(value) + 8192).clamp(0, 0x3fff) as u16;
                vec![0xe0 | (channel & 0x0f), (raw & 0x7f) as u8, (raw >> 7) as u8]
            }
        }
    }
}

/// Splits a byte stream into messages, honouring running status.
///
/// Real-time bytes (0xF8..) are skipped wherever they appear. System
/// common and exclusive messages cancel running status and are dropped.
#[derive(Debug, Default, Clone)]
pub struct MidiParser {
    status: Option<u8>,
    data: [u8; 2],
    len: usize,
}

impl MidiParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn expected(status: u8) -> usize {
        match status & 0xf0 {
            0xc0 | 0xd0 => 1,
            _ => 2,
        }
    }

    /// Feed one byte; returns a message when it completes one.
    pub fn push(&mut self, byte: u8) -> Option<MidiEvent> {
        if byte >= 0xf8 {
            return None;
        }
        if byte & 0x80 != 0 {
            self.status = (byte < 0xf0).then_some(byte);
            self.len = 0;
            return None;
        }
        let status = self.status?;
        self.data[self.len] = byte;
        self.len += 1;
        if self.len < Self::expected(status) {
            return None;
        }
        let n = self.len;
        self.len = 0;
        let mut msg = [status, 0, 0];
        msg[1..=n].copy_from_slice(&self.data[..n]);
        MidiEvent::from_bytes(&msg[..=n])
    }

    /// Every message completed by `bytes`.
    pub fn parse<'a>(&'a mut self, bytes: &'a [u8]) -> impl Iterator<Item = MidiEvent> + 'a {
        bytes.iter().filter_map(move |&b| self.push(b))
    }
}
