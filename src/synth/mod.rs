// Purpose: the instrument contract and everything that drives it
// Events and parameter IDs in, voices ticked, one stereo frame out

pub mod event;
pub mod factory;
pub mod instrument;
pub mod manager;
pub mod mixer;
pub mod param_id;

pub use event::{EngineCommand, EventKind, NoteEvent, VoiceId};
pub use factory::InstrumentFactory;
pub use instrument::{ExclKey, InstrHost, Instrument, StandaloneHost};
pub use manager::InstrManager;
pub use mixer::{ChannelMixer, Mixer, PanLaw};
