use std::{fmt, sync::Arc};

use crate::dsp::context::SynthContext;

/// When an edge delivers its source's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct When(u8);

impl When {
    /// Once, at note start, after the source has started.
    pub const INIT: When = When(1);
    /// Every tick, right after the source has produced its sample.
    pub const GEN: When = When(2);
    pub const BOTH: When = When(3);

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Unknown bits are dropped; zero falls back to `GEN`.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => When::GEN,
            b => When(b),
        }
    }

    pub fn contains(self, other: When) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for When {
    fn default() -> Self {
        When::GEN
    }
}

impl fmt::Display for When {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self.0 {
            1 => "init",
            3 => "both",
            _ => "gen",
        })
    }
}

impl std::str::FromStr for When {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "init" => Ok(When::INIT),
            "gen" => Ok(When::GEN),
            "both" => Ok(When::BOTH),
            _ => s.parse::<u8>().map(When::from_bits).map_err(|_| ()),
        }
    }
}

/// Declaration of one unit input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputDef {
    pub name: &'static str,
    pub default: f32,
    /// Edges add into this input and the sum is cleared after every tick.
    pub accumulate: bool,
}

impl InputDef {
    pub const fn value(name: &'static str, default: f32) -> Self {
        Self {
            name,
            default,
            accumulate: false,
        }
    }

    pub const fn sum(name: &'static str) -> Self {
        Self {
            name,
            default: 0.0,
            accumulate: true,
        }
    }

    /// Summing input whose setting stands in only while nothing feeds it.
    /// Read it with [`Inputs::fed_or_base`].
    pub const fn factor(name: &'static str) -> Self {
        Self {
            name,
            default: 1.0,
            accumulate: true,
        }
    }
}

/// Input values of one unit.
///
/// Each input has a base value (its setting, or whatever an edge last
/// assigned) and a per-tick sum fed by edges into accumulating inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Inputs {
    base: Vec<f32>,
    acc: Vec<f32>,
    fed: Vec<bool>,
}

impl Inputs {
    pub fn new(defs: &[InputDef]) -> Self {
        Self {
            base: defs.iter().map(|d| d.default).collect(),
            acc: vec![0.0; defs.len()],
            fed: vec![false; defs.len()],
        }
    }

    /// Base plus this tick's sum.
    #[inline]
    pub fn get(&self, index: usize) -> f32 {
        self.base.get(index).copied().unwrap_or(0.0) + self.acc.get(index).copied().unwrap_or(0.0)
    }

    /// This tick's sum when an edge fed the input, otherwise the base.
    #[inline]
    pub fn fed_or_base(&self, index: usize) -> f32 {
        if self.fed.get(index).copied().unwrap_or(false) {
            self.acc[index]
        } else {
            self.base(index)
        }
    }

    pub fn base(&self, index: usize) -> f32 {
        self.base.get(index).copied().unwrap_or(0.0)
    }

    #[inline]
    pub fn set(&mut self, index: usize, value: f32) {
        if let Some(slot) = self.base.get_mut(index) {
            *slot = value;
        }
    }

    #[inline]
    pub fn add(&mut self, index: usize, value: f32) {
        if let (Some(slot), Some(fed)) = (self.acc.get_mut(index), self.fed.get_mut(index)) {
            *slot += value;
            *fed = true;
        }
    }

    #[inline]
    pub fn clear_sums(&mut self) {
        self.acc.iter_mut().for_each(|v| *v = 0.0);
        self.fed.iter_mut().for_each(|f| *f = false);
    }

    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }
}

/// What a unit learns about the note when it starts.
#[derive(Debug, Clone)]
pub struct NoteInfo {
    pub ctx: Arc<SynthContext>,
    pub frequency: f32,
    pub volume: f32,
    pub pitch: i32,
    /// Seconds; zero when the note is open-ended.
    pub duration: f32,
}

impl NoteInfo {
    pub fn sample_rate(&self) -> f32 {
        self.ctx.params.sample_rate
    }
}

/// One node of a ModSynth graph.
///
/// Units own their inputs; the graph writes into them through edges and the
/// unit reads them when it ticks. Generators are rebuilt or reset in `start`,
/// so a unit cloned from a template carries settings but no running state.
pub trait ModUnit: Send {
    fn type_name(&self) -> &'static str;
    fn boxed_clone(&self) -> Box<dyn ModUnit>;

    fn input_defs(&self) -> &'static [InputDef];
    fn inputs(&self) -> &Inputs;
    fn inputs_mut(&mut self) -> &mut Inputs;

    fn start(&mut self, note: &NoteInfo);
    /// Produce one sample from the current inputs.
    fn tick(&mut self) -> f32;
    /// Last value produced (or the starting value before the first tick).
    fn output(&self) -> f32;

    fn stop(&mut self) {}

    /// Units that shape the note's lifetime (envelopes) override this;
    /// everything else never holds a voice open.
    fn is_finished(&self) -> bool {
        true
    }

    fn input_index(&self, name: &str) -> Option<usize> {
        self.input_defs().iter().position(|d| d.name == name)
    }
}

impl Clone for Box<dyn ModUnit> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

impl fmt::Debug for dyn ModUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModUnit")
            .field("type", &self.type_name())
            .field("output", &self.output())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_clear_but_base_stays() {
        let defs = [InputDef::value("frq", 440.0), InputDef::sum("in")];
        let mut inputs = Inputs::new(&defs);
        inputs.add(1, 0.25);
        inputs.add(1, 0.5);
        assert_eq!(inputs.get(1), 0.75);
        inputs.clear_sums();
        assert_eq!(inputs.get(1), 0.0);
        assert_eq!(inputs.get(0), 440.0);
        inputs.set(7, 1.0);
        assert_eq!(inputs.get(7), 0.0);
    }

    #[test]
    fn factor_uses_setting_only_when_unfed() {
        let mut inputs = Inputs::new(&[InputDef::factor("in1")]);
        assert_eq!(inputs.fed_or_base(0), 1.0);
        inputs.set(0, 0.5);
        assert_eq!(inputs.fed_or_base(0), 0.5);
        inputs.add(0, 2.0);
        inputs.add(0, 1.0);
        assert_eq!(inputs.fed_or_base(0), 3.0);
        inputs.add(0, -3.0);
        assert_eq!(inputs.fed_or_base(0), 0.0);
        inputs.clear_sums();
        assert_eq!(inputs.fed_or_base(0), 0.5);
    }

    #[test]
    fn when_parses_names_and_bits() {
        assert_eq!("init".parse::<When>(), Ok(When::INIT));
        assert_eq!("3".parse::<When>(), Ok(When::BOTH));
        assert_eq!(When::from_bits(0), When::GEN);
        assert!(When::BOTH.contains(When::INIT));
        assert!(!When::GEN.contains(When::INIT));
        assert_eq!(When::INIT.to_string(), "init");
    }
}
