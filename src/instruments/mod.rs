//! Instruments built from the unit generators in [`crate::dsp`].
//!
//! Each type implements [`crate::synth::Instrument`]. A configured value is a
//! template: the manager clones it with `instantiate` for every note, so
//! nothing in here is shared between voices except the `Arc`'d context and
//! soundbanks.

/// Harmonic-partial additive synth with per-partial envelopes.
pub mod add_synth;
/// Buzz-oscillator subtractive synth with swept filter.
pub mod buzz_synth;
/// Chopped noise through a swept band-pass filter.
pub mod chuffer;
/// Pitch modulation and envelope parameter helpers shared by the synths.
pub mod common;
/// Three-operator FM with selectable algorithms.
pub mod fm_synth;
/// Soundbank player driven by the channel's bank and program.
pub mod gm_player;
/// Eight-generator modulation-matrix synth.
pub mod matrix_synth;
/// Mixer automation pseudo-instrument.
pub mod mixer_control;
/// Voice backed by a user-built unit graph.
pub mod mod_synth;
/// Soundbank player for one fixed preset.
pub mod sf_player;
/// Oscillator and noise into a selectable filter.
pub mod sub_synth;
/// Single oscillator (or FM pair) with ADSR.
pub mod tone;

pub use add_synth::AddSynth;
pub use buzz_synth::BuzzSynth;
pub use chuffer::Chuffer;
pub use fm_synth::FmSynth;
pub use gm_player::GmPlayer;
pub use matrix_synth::MatrixSynth;
pub use mixer_control::MixerControl;
pub use mod_synth::ModSynth;
pub use sf_player::SfPlayer;
pub use sub_synth::SubSynth;
pub use tone::ToneInstr;
