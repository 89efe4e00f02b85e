//! Low Frequency Oscillator (LFO) with attack ramp.

use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    dsp::{context::SynthContext, oscillator::WaveOsc, wavetable::WT_SIN, UnitGen},
    error::LoadError,
    patch::Element,
};

/*
Low Frequency Oscillators
=========================

An LFO is simply an oscillator running at sub-audio frequencies. The same
waveform math applies, but the context and usage are completely different.

Vocabulary
----------

  control-rate    Frequencies below human hearing: ~0.01 Hz to ~20 Hz.
                  These oscillators modulate parameters over time.

  depth           How far the LFO swings. Either an absolute amount (tremolo,
                  filter sweep) or, once a signal frequency is set, a pitch
                  deviation in semitones.

  attack          Vibrato that starts the instant a note does sounds
                  mechanical. The LFO output is multiplied by a ramp that
                  rises from 0 to 1 over `attack` seconds, so the wobble
                  fades in.

  signal freq     The pitch of the note being modulated. With it set, the
                  LFO emits a deviation in Hz ready to hand to
                  `modulate_frequency`.


Semitones to Hz
---------------

A vibrato depth of d semitones around a note at f Hz peaks at

    f · 2^(d/12) − f  =  f · cents_mult(d · 100) − f

Hz above the note. The conversion is done once, when the signal frequency is
set, not per sample.


    output = osc(frequency) × ramp(attack) × depth_hz

    Level
     1.0 ┤          ╭╮  ╭╮  ╭╮  ╭╮
         │     ╭╮  ╭╯╰╮╭╯╰╮╭╯╰╮╭╯╰
     0.0 ┼─╭╮─╭╯╰╮╭╯──╰╯──╰╯──╰╯───→ t
         │ ╰╯ ╰  ╰╯
         └─attack─┘
*/

/// LFO settings shared by every instrument with a vibrato block.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LfoParams {
    /// Oscillator frequency in Hz.
    pub rate: f32,
    /// Wavetable ID.
    pub wt: usize,
    /// Fade-in time in seconds.
    pub attack: f32,
    /// Depth (semitones once a signal frequency is set).
    pub depth: f32,
}

impl Default for LfoParams {
    fn default() -> Self {
        Self {
            rate: 4.0,
            wt: WT_SIN,
            attack: 0.0,
            depth: 0.0,
        }
    }
}

impl LfoParams {
    pub fn load(el: &Element) -> Result<Self, LoadError> {
        let d = Self::default();
        Ok(Self {
            rate: el.get_or("frq", d.rate)?,
            wt: el.get_or("wt", d.wt)?,
            attack: el.get_or("atk", d.attack)?,
            depth: el.get_or("amp", d.depth)?,
        })
    }

    pub fn save(&self, el: &mut Element) {
        el.set_attr("frq", self.rate)
            .set_attr("wt", self.wt)
            .set_attr("atk", self.attack)
            .set_attr("amp", self.depth);
    }
}

#[derive(Debug, Clone)]
pub struct Lfo {
    osc: WaveOsc,
    params: LfoParams,
    sig_freq: Option<f32>,
    amount: f32,
    ramp: f32,
    ramp_step: f32,
}

impl Lfo {
    pub fn new(ctx: Arc<SynthContext>, params: LfoParams) -> Self {
        let osc = WaveOsc::interpolated(ctx)
            .with_wavetable(params.wt)
            .with_frequency(params.rate);
        Self {
            osc,
            params,
            sig_freq: None,
            amount: params.depth,
            ramp: 1.0,
            ramp_step: 0.0,
        }
    }

    pub fn params(&self) -> &LfoParams {
        &self.params
    }

    /// Takes effect on the next `reset`.
    pub fn set_params(&mut self, params: LfoParams) {
        self.params = params;
    }

    /// True when the LFO would produce no output.
    pub fn is_silent(&self) -> bool {
        self.params.depth == 0.0
    }

    /// Interpret depth as semitones around `frequency` and output Hz.
    pub fn set_sig_freq(&mut self, frequency: f32) {
        self.sig_freq = Some(frequency);
        self.update_amount();
    }

    /// Current peak output (Hz when a signal frequency is set).
    pub fn amount(&self) -> f32 {
        self.amount
    }

    fn update_amount(&mut self) {
        self.amount = match self.sig_freq {
            Some(f) => {
                let cm = self.osc.context().params.cents_mult(self.params.depth * 100.0);
                f * cm - f
            }
            None => self.params.depth,
        };
    }
}

impl UnitGen for Lfo {
    fn reset(&mut self, init_phase: f32) {
        self.osc.set_frequency(self.params.rate);
        self.osc.set_wavetable(self.params.wt);
        self.osc.reset(init_phase);
        self.update_amount();
        if init_phase >= 0.0 {
            let sr = self.osc.context().params.sample_rate;
            if self.params.attack > 0.0 {
                self.ramp = 0.0;
                self.ramp_step = 1.0 / (self.params.attack * sr);
            } else {
                self.ramp = 1.0;
                self.ramp_step = 0.0;
            }
        }
    }

    #[inline]
    fn next_sample(&mut self) -> f32 {
        let out = self.osc.next_sample() * self.ramp * self.amount;
        if self.ramp < 1.0 {
            self.ramp = (self.ramp + self.ramp_step).min(1.0);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Arc<SynthContext> {
        Arc::new(SynthContext::with_options(1000.0, 1024, false))
    }

    #[test]
    fn depth_converts_semitones_to_hz() {
        let mut lfo = Lfo::new(
            ctx(),
            LfoParams {
                depth: 12.0,
                ..LfoParams::default()
            },
        );
        lfo.set_sig_freq(220.0);
        assert!((lfo.amount() - 220.0).abs() < 1e-2);
    }

    #[test]
    fn attack_ramps_in() {
        let params = LfoParams {
            rate: 10.0,
            attack: 0.5,
            depth: 1.0,
            ..LfoParams::default()
        };
        let mut lfo = Lfo::new(ctx(), params);
        lfo.reset(0.0);
        let out: Vec<f32> = (0..1000).map(|_| lfo.next_sample()).collect();
        let early = out[..100].iter().fold(0.0f32, |a, v| a.max(v.abs()));
        let late = out[600..].iter().fold(0.0f32, |a, v| a.max(v.abs()));
        assert!(early < 0.25, "early {early}");
        assert!(late > 0.95, "late {late}");
    }

    #[test]
    fn zero_depth_is_silent() {
        let mut lfo = Lfo::new(ctx(), LfoParams::default());
        lfo.set_sig_freq(440.0);
        lfo.reset(0.0);
        assert!(lfo.is_silent());
        assert!((0..100).all(|_| lfo.next_sample() == 0.0));
    }

    #[test]
    fn params_save_load() {
        let params = LfoParams {
            rate: 5.5,
            wt: 3,
            attack: 0.2,
            depth: 0.5,
        };
        let mut el = Element::new("lfo");
        params.save(&mut el);
        assert_eq!(LfoParams::load(&el).unwrap(), params);
    }
}
