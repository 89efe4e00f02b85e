use std::{collections::BTreeMap, fmt, sync::Arc};

use tracing::{debug, warn};

use crate::{
    dsp::context::SynthContext,
    error::LoadError,
    instruments::{
        AddSynth, BuzzSynth, Chuffer, FmSynth, GmPlayer, MatrixSynth, MixerControl, ModSynth, SfPlayer, SubSynth,
        ToneInstr,
    },
    patch::Element,
    soundbank::BankRegistry,
    synth::instrument::Instrument,
};

/// Builds a fresh, default-configured instrument of one type.
///
/// Projects name instrument types as strings; the factory maps each name to
/// a builder so a saved `<instr type="...">` can be turned back into a
/// template.
pub trait InstrumentBuilder: Send + Sync {
    fn build(&self) -> Box<dyn Instrument>;
}

impl<F> InstrumentBuilder for F
where
    F: Fn() -> Box<dyn Instrument> + Send + Sync,
{
    fn build(&self) -> Box<dyn Instrument> {
        self()
    }
}

/// Instrument types by name.
#[derive(Default)]
pub struct InstrumentFactory {
    builders: BTreeMap<String, Box<dyn InstrumentBuilder>>,
}

impl fmt::Debug for InstrumentFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentFactory")
            .field("types", &self.builders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl InstrumentFactory {
    /// An empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in instrument. The soundbank players have no registry
    /// and stay silent until one is attached with [`Self::with_banks`].
    pub fn with_builtins(ctx: Arc<SynthContext>) -> Self {
        let mut f = Self::new();
        macro_rules! builtin {
            ($name:expr, $make:expr) => {{
                let ctx = ctx.clone();
                let make = $make;
                f.register($name, move || -> Box<dyn Instrument> { Box::new(make(ctx.clone())) });
            }};
        }
        builtin!(AddSynth::TYPE, AddSynth::new);
        builtin!(BuzzSynth::TYPE, BuzzSynth::new);
        builtin!(Chuffer::TYPE, Chuffer::new);
        builtin!(FmSynth::TYPE, FmSynth::new);
        builtin!(GmPlayer::TYPE, GmPlayer::new);
        builtin!(MatrixSynth::TYPE, MatrixSynth::new);
        builtin!(MixerControl::TYPE, MixerControl::new);
        builtin!(ModSynth::TYPE, ModSynth::new);
        builtin!(SfPlayer::TYPE, SfPlayer::new);
        builtin!(SubSynth::TYPE, SubSynth::new);
        builtin!(ToneInstr::TYPE, ToneInstr::new);
        builtin!(ToneInstr::FM_TYPE, ToneInstr::fm);
        f
    }

    /// Point the soundbank players at `registry`, so bank names in saved
    /// instruments resolve.
    pub fn with_banks(mut self, ctx: Arc<SynthContext>, registry: Arc<BankRegistry>) -> Self {
        let (c, r) = (ctx.clone(), registry.clone());
        self.register(GmPlayer::TYPE, move || -> Box<dyn Instrument> {
            Box::new(GmPlayer::new(c.clone()).with_registry(r.clone()))
        });
        self.register(SfPlayer::TYPE, move || -> Box<dyn Instrument> {
            Box::new(SfPlayer::new(ctx.clone()).with_registry(registry.clone()))
        });
        self
    }

    /// Add or replace a type.
    pub fn register(&mut self, name: &str, builder: impl InstrumentBuilder + 'static) {
        if self.builders.insert(name.to_string(), Box::new(builder)).is_some() {
            debug!(name, "instrument type replaced");
        }
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn Instrument>> {
        match self.builders.get(name) {
            Some(b) => Some(b.build()),
            None => {
                warn!(name, "unknown instrument type");
                None
            }
        }
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.builders.keys().map(String::as_str)
    }

    /// Build and configure an instrument from `<instr type="...">`.
    pub fn load(&self, el: &Element) -> Result<Box<dyn Instrument>, LoadError> {
        let name: String = el.require("type")?;
        let mut instr = self
            .builders
            .get(&name)
            .map(|b| b.build())
            .ok_or(LoadError::UnknownInstrument(name))?;
        instr.load(el)?;
        Ok(instr)
    }

    /// Write an instrument so [`Self::load`] can rebuild it.
    pub fn save(instr: &dyn Instrument) -> Element {
        let mut el = Element::new("instr");
        el.set_attr("type", instr.type_name());
        instr.save(&mut el);
        el
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        soundbank::{Sample, SbInstrument, SoundBank, Zone},
        synth::param_id::P_GLOBAL,
    };

    fn ctx() -> Arc<SynthContext> {
        Arc::new(SynthContext::with_options(8000.0, 1024, false))
    }

    #[test]
    fn builtins_cover_every_type() {
        let f = InstrumentFactory::with_builtins(ctx());
        let names: Vec<&str> = f.type_names().collect();
        for ty in [
            "AddSynth",
            "BuzzSynth",
            "Chuffer",
            "FMSynth",
            "GMPlayer",
            "MatrixSynth",
            "MixerControl",
            "ModSynth",
            "SFPlayer",
            "SubSynth",
            "Tone",
            "ToneFM",
        ] {
            assert!(names.contains(&ty), "{ty}");
            assert_eq!(f.create(ty).map(|i| i.type_name()), Some(ty));
        }
        assert!(f.create("Theremin").is_none());
    }

    #[test]
    fn closures_register_as_builders() {
        let mut f = InstrumentFactory::new();
        let c = ctx();
        f.register("Bright", move || -> Box<dyn Instrument> {
            let mut t = ToneInstr::new(c.clone());
            t.set_wavetable(1);
            Box::new(t)
        });
        assert_eq!(f.create("Bright").map(|i| i.type_name()), Some("Tone"));
    }

    #[test]
    fn save_then_load_by_type() {
        let f = InstrumentFactory::with_builtins(ctx());
        let tone = f.create("ToneFM").unwrap();
        let el = InstrumentFactory::save(tone.as_ref());
        assert_eq!(el.attr("type"), Some("ToneFM"));
        assert_eq!(f.load(&el).unwrap().type_name(), "ToneFM");

        let bad = Element::new("instr").with_attr("type", "Kazoo");
        assert!(matches!(f.load(&bad), Err(LoadError::UnknownInstrument(n)) if n == "Kazoo"));
        assert!(matches!(f.load(&Element::new("instr")), Err(LoadError::MissingAttribute { .. })));
    }

    #[test]
    fn bank_players_resolve_through_registry() {
        let reg = BankRegistry::new();
        let sample = Arc::new(Sample::new("s", 8000.0, vec![0.1; 16]));
        reg.insert(SoundBank::new("gm").with_instrument(SbInstrument::new("p", 0, 0).with_zone(Zone::new(sample))))
            .unwrap();
        let f = InstrumentFactory::with_builtins(ctx()).with_banks(ctx(), reg.clone());
        let el = Element::new("instr")
            .with_attr("type", "SFPlayer")
            .with_attr("sb", "gm")
            .with_attr("preset", 0);
        let sf = f.load(&el).unwrap();
        assert_eq!(reg.lock_count("gm"), Some(1));
        assert_eq!(sf.get_param(P_GLOBAL), Some(0.0));
        drop(sf);
        assert_eq!(reg.lock_count("gm"), Some(0));
    }
}
