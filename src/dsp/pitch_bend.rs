use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    dsp::{context::SynthContext, wavetable::WaveTable, UnitGen},
    error::LoadError,
    patch::Element,
};

/*
Pitch Bend Generators
=====================

Both generators output a frequency DEVIATION in Hz, ready for
`modulate_frequency`, computed from a bend in cents around the signal
frequency:

    delta = f · cents_mult(cents) − f

Segment form
------------

Three levels and two rates:

    cents
     a1 ┤╲
        │ ╲__
     a2 ┤    ╲___________
     a3 ┤                ╲____________ (holds)
        └──r1──┴────r2────┘

The ramp is linear in cents, which makes it exponential in frequency: equal
steps in cents sound like equal steps in pitch. A classic use is a slight
scoop into the note (a1 = -50, a2 = a3 = 0).

Wavetable form
--------------

Scans one cycle of a wavetable over a duration, after an optional delay,
then holds the last value. The table value (-1..1) scales `depth` cents.
The duration is either absolute seconds or a percentage of the note
duration, so the same bend shape fits short and long notes.
*/

/// Segment pitch bend settings.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PitchBendParams {
    pub on: bool,
    /// Seconds from a1 to a2.
    pub r1: f32,
    /// Seconds from a2 to a3.
    pub r2: f32,
    /// Levels in cents.
    pub a1: f32,
    pub a2: f32,
    pub a3: f32,
}

impl PitchBendParams {
    pub fn load(el: &Element) -> Result<Self, LoadError> {
        Ok(Self {
            on: el.get_bool("on", false)?,
            r1: el.get_or("r1", 0.0)?,
            r2: el.get_or("r2", 0.0)?,
            a1: el.get_or("a1", 0.0)?,
            a2: el.get_or("a2", 0.0)?,
            a3: el.get_or("a3", 0.0)?,
        })
    }

    pub fn save(&self, el: &mut Element) {
        el.set_bool("on", self.on);
        el.set_attr("r1", self.r1)
            .set_attr("r2", self.r2)
            .set_attr("a1", self.a1)
            .set_attr("a2", self.a2)
            .set_attr("a3", self.a3);
    }
}

#[derive(Debug, Clone)]
pub struct PitchBend {
    ctx: Arc<SynthContext>,
    params: PitchBendParams,
    sig_freq: f32,
    stage: u8,
    cents: f32,
    step: f32,
    count: u32,
}

impl PitchBend {
    pub fn new(ctx: Arc<SynthContext>, params: PitchBendParams) -> Self {
        Self {
            ctx,
            params,
            sig_freq: 440.0,
            stage: 2,
            cents: params.a3,
            step: 0.0,
            count: 0,
        }
    }

    pub fn params(&self) -> &PitchBendParams {
        &self.params
    }

    /// Takes effect on the next `reset`.
    pub fn set_params(&mut self, params: PitchBendParams) {
        self.params = params;
    }

    pub fn is_on(&self) -> bool {
        self.params.on
    }

    pub fn set_sig_freq(&mut self, frequency: f32) {
        self.sig_freq = frequency;
    }

    /// Current bend in cents.
    pub fn cents(&self) -> f32 {
        self.cents
    }

    fn enter(&mut self, stage: u8) {
        let sr = self.ctx.params.sample_rate;
        let (from, to, rate) = match stage {
            0 => (self.params.a1, self.params.a2, self.params.r1),
            1 => (self.params.a2, self.params.a3, self.params.r2),
            _ => {
                self.stage = 2;
                self.cents = self.params.a3;
                self.step = 0.0;
                return;
            }
        };
        self.stage = stage;
        self.cents = from;
        let n = (rate * sr).round();
        if n < 1.0 {
            self.enter(stage + 1);
        } else {
            self.count = n as u32;
            self.step = (to - from) / n;
        }
    }
}

impl UnitGen for PitchBend {
    fn reset(&mut self, init_phase: f32) {
        if init_phase >= 0.0 {
            self.enter(0);
        }
    }

    #[inline]
    fn next_sample(&mut self) -> f32 {
        if !self.params.on {
            return 0.0;
        }
        let cents = self.cents;
        if self.stage < 2 {
            self.cents += self.step;
            self.count -= 1;
            if self.count == 0 {
                self.enter(self.stage + 1);
            }
        }
        self.sig_freq * self.ctx.params.cents_mult(cents) - self.sig_freq
    }
}

/// Wavetable-scan pitch bend settings.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchBendWtParams {
    pub wt: usize,
    /// Seconds, or percent of the note duration when `percent` is set.
    pub duration: f32,
    pub percent: bool,
    /// Seconds before the scan starts.
    pub delay: f32,
    /// Cents at table value 1.0.
    pub depth: f32,
}

impl Default for PitchBendWtParams {
    fn default() -> Self {
        Self {
            wt: crate::dsp::wavetable::WT_SAWP,
            duration: 0.1,
            percent: false,
            delay: 0.0,
            depth: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PitchBendWt {
    ctx: Arc<SynthContext>,
    params: PitchBendWtParams,
    table: WaveTable,
    sig_freq: f32,
    note_duration: f32,
    delay_count: u32,
    index: f32,
    increment: f32,
}

impl PitchBendWt {
    pub fn new(ctx: Arc<SynthContext>, params: PitchBendWtParams) -> Self {
        let table = ctx.wavetables.get(params.wt);
        Self {
            ctx,
            params,
            table,
            sig_freq: 440.0,
            note_duration: 0.0,
            delay_count: 0,
            index: 0.0,
            increment: 0.0,
        }
    }

    pub fn params(&self) -> &PitchBendWtParams {
        &self.params
    }

    pub fn set_params(&mut self, params: PitchBendWtParams) {
        self.params = params;
    }

    pub fn set_sig_freq(&mut self, frequency: f32) {
        self.sig_freq = frequency;
    }

    /// Note length in seconds, used for percentage durations.
    pub fn set_note_duration(&mut self, seconds: f32) {
        self.note_duration = seconds.max(0.0);
    }

    fn scan_seconds(&self) -> f32 {
        if self.params.percent {
            self.note_duration * self.params.duration / 100.0
        } else {
            self.params.duration
        }
    }

    #[inline]
    fn table_value(&self) -> f32 {
        let last = self.table.len().saturating_sub(1);
        let i = (self.index as usize).min(last);
        self.table[i]
    }
}

impl UnitGen for PitchBendWt {
    fn reset(&mut self, init_phase: f32) {
        let p = &self.ctx.params;
        self.table = self.ctx.wavetables.get(self.params.wt);
        let scan = self.scan_seconds() * p.sample_rate;
        self.increment = if scan >= 1.0 { p.ftable_length / scan } else { p.ftable_length };
        if init_phase >= 0.0 {
            self.index = 0.0;
            self.delay_count = (self.params.delay.max(0.0) * p.sample_rate).round() as u32;
        }
    }

    #[inline]
    fn next_sample(&mut self) -> f32 {
        let value = self.table_value();
        if self.delay_count > 0 {
            self.delay_count -= 1;
        } else {
            // stop on the last real entry; the guard point wraps to the start
            let end = self.ctx.params.ftable_length - 1.0;
            if self.index < end {
                self.index = (self.index + self.increment).min(end);
            }
        }
        let cm = self.ctx.params.cents_mult(value * self.params.depth);
        self.sig_freq * cm - self.sig_freq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::wavetable::WT_SAWP;

    fn ctx() -> Arc<SynthContext> {
        Arc::new(SynthContext::with_options(1000.0, 1024, false))
    }

    #[test]
    fn bend_ramps_through_levels() {
        let params = PitchBendParams {
            on: true,
            r1: 0.1,
            r2: 0.1,
            a1: -1200.0,
            a2: 0.0,
            a3: 1200.0,
        };
        let mut pb = PitchBend::new(ctx(), params);
        pb.set_sig_freq(100.0);
        pb.reset(0.0);
        let first = pb.next_sample();
        assert!((first + 50.0).abs() < 1e-3, "first {first}");
        for _ in 0..99 {
            pb.next_sample();
        }
        assert!(pb.next_sample().abs() < 1e-3);
        for _ in 0..200 {
            pb.next_sample();
        }
        assert!((pb.next_sample() - 100.0).abs() < 1e-2);
    }

    #[test]
    fn bend_off_is_silent() {
        let mut pb = PitchBend::new(ctx(), PitchBendParams::default());
        pb.reset(0.0);
        assert!((0..10).all(|_| pb.next_sample() == 0.0));
    }

    #[test]
    fn wavetable_bend_waits_then_scans() {
        let params = PitchBendWtParams {
            wt: WT_SAWP,
            duration: 50.0,
            percent: true,
            delay: 0.01,
            depth: 1200.0,
        };
        let mut pb = PitchBendWt::new(ctx(), params);
        pb.set_sig_freq(100.0);
        pb.set_note_duration(0.2);
        pb.reset(0.0);
        // delay holds the first table value
        for _ in 0..10 {
            assert!(pb.next_sample().abs() < 1e-3);
        }
        // 50% of 0.2 s = 100 samples to scan the ramp up to +1 octave
        let mut last = 0.0;
        for _ in 0..150 {
            last = pb.next_sample();
        }
        assert!(last > 95.0, "last {last}");
    }

    #[test]
    fn params_save_load() {
        let params = PitchBendParams {
            on: true,
            r1: 0.05,
            r2: 0.25,
            a1: -30.0,
            a2: 10.0,
            a3: 0.0,
        };
        let mut el = Element::new("pb");
        params.save(&mut el);
        assert_eq!(PitchBendParams::load(&el).unwrap(), params);
    }
}
