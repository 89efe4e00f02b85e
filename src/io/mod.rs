// Purpose - external interfaces, format conversions
// MIDI bytes in, engine commands out

pub mod converter;
pub mod midi;

pub use converter::{midi_to_command, note_command};
pub use midi::{MidiEvent, MidiParser};
