//! Realtime software synthesis engine.
//!
//! The crate is layered leaves-first:
//!
//! - [`dsp`]: per-sample unit generators (oscillators, envelopes, filters,
//!   delays, LFOs, pitch bend, noise) plus the shared [`SynthContext`].
//! - [`instruments`]: fixed-topology instruments wired from those generators,
//!   the soundbank players and the mixer-automation pseudo-instrument.
//! - [`graph`]: the ModSynth user-patchable unit-generator graph.
//! - [`synth`]: the instrument contract, events, parameter addressing and the
//!   instrument manager that drives voices one tick at a time.

pub mod config;
pub mod dsp;
pub mod error;
pub mod graph; // ModSynth unit-generator graph
pub mod instruments;
pub mod io;
pub mod patch;
pub mod soundbank;
pub mod synth; // Instrument contract and voice management

pub use config::EngineConfig;
pub use dsp::context::{SynthContext, SynthParams};

pub const MAX_BLOCK_SIZE: usize = 2048;
pub(crate) const MIN_TIME: f32 = 1.0 / 48_000.0;
