//! Turning control-thread input into [`EngineCommand`]s.

use crate::{
    dsp::context::SynthParams,
    io::midi::{MidiEvent, MidiParser},
    synth::event::{EngineCommand, NoteEvent},
};

/// Equal-tempered frequency of a MIDI key, A4 = 440 Hz.
pub fn midi_note_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((f32::from(note) - 69.0) / 12.0)
}

/// A start command for one note with the event fields filled in.
pub fn note_command(params: &SynthParams, inum: u16, channel: u16, key: u8, velocity: u8) -> EngineCommand {
    let pitch = i32::from(key & 0x7f);
    EngineCommand::Start(NoteEvent {
        velocity: f32::from(velocity & 0x7f),
        ..NoteEvent::start(inum, channel, pitch, params.pitch_frequency(pitch))
    })
}

/// Raw MIDI bytes to commands. Only messages on `channel_filter` pass when
/// one is given.
pub fn midi_to_commands<'a>(
    parser: &'a mut MidiParser,
    bytes: &'a [u8],
    channel_filter: Option<u8>,
) -> impl Iterator<Item = EngineCommand> + 'a {
    parser
        .parse(bytes)
        .filter(move |m| channel_filter.map_or(true, |c| m.channel() == c))
        .map(EngineCommand::Midi)
}

/// A MIDI message as the manager would see it after channel filtering.
pub fn midi_to_command(midi: MidiEvent, channel_filter: Option<u8>) -> Option<EngineCommand> {
    channel_filter
        .map_or(true, |c| midi.channel() == c)
        .then_some(EngineCommand::Midi(midi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_is_440() {
        assert!((midi_note_to_freq(69) - 440.0).abs() < 1e-3);
        assert!((midi_note_to_freq(81) - 880.0).abs() < 1e-2);
    }

    #[test]
    fn note_command_fills_event() {
        let params = SynthParams::new(44_100.0, 1024);
        let EngineCommand::Start(evt) = note_command(&params, 2, 1, 69, 64) else {
            panic!("expected a start command");
        };
        assert_eq!((evt.inum, evt.channel, evt.pitch), (2, 1, 69));
        assert_eq!(evt.velocity, 64.0);
        assert!((evt.frequency - params.pitch_frequency(69)).abs() < 1e-3);
    }

    #[test]
    fn channel_filter() {
        let on = MidiEvent::NoteOn {
            channel: 4,
            key: 60,
            velocity: 1,
        };
        assert!(midi_to_command(on, Some(4)).is_some());
        assert!(midi_to_command(on, Some(0)).is_none());
        assert!(midi_to_command(on, None).is_some());

        let mut parser = MidiParser::new();
        let cmds: Vec<_> = midi_to_commands(&mut parser, &[0x90, 60, 1, 0x91, 60, 1], Some(1)).collect();
        assert_eq!(cmds.len(), 1);
    }
}
