use std::{f32::consts::TAU, sync::Arc};

use crate::dsp::{
    context::SynthContext,
    wavetable::{WaveTable, WT_SIN},
    UnitGen,
};

/*
Wavetable Oscillators
=====================

Vocabulary
----------

  index       Current read position in the table, in table entries
              (0 ≤ index < table_length). This IS the oscillator's phase,
              just measured in entries instead of radians.

  increment   How far the index advances per sample:

                  increment = frequency * table_length / sample_rate
                            = frequency * frq_ti

              A 440 Hz sine from a 16384-entry table at 44.1 kHz advances
              163.4 entries per sample.

  guard point Every table stores table[len] == table[0], so the interpolating
              reader can always fetch index+1 without wrapping.


Phase Modulation vs Frequency Modulation
----------------------------------------

Two different "modulate this oscillator" hooks exist, and they are not
interchangeable:

  phase_mod_wt(rad)        Offsets WHERE we read this tick only. The index
                           itself is untouched. Feeding a modulator's
                           output here is classic DX-style phase modulation.

  modulate_frequency(hz)   Offsets HOW FAR we advance this tick only. The
                           deviation integrates into the phase, so this is
                           true frequency modulation. LFO vibrato and pitch
                           bend go through here.

Both offsets are consumed by the next call to next_sample() and then cleared.


Live Parameter Changes
----------------------

reset(-1) recomputes the increment (and re-resolves the wavetable) but keeps
the index. A pitch change mid-note therefore continues from the exact same
point in the cycle: the first sample after the change differs from the
previous one by at most one increment step.
*/

#[inline]
fn wrap_index(pos: f32, len: f32) -> f32 {
    let mut pos = pos.rem_euclid(len);
    if pos >= len {
        pos -= len;
    }
    pos
}

/// Wavetable oscillator, plain or linearly interpolated.
#[derive(Debug, Clone)]
pub struct WaveOsc {
    ctx: Arc<SynthContext>,
    frequency: f32,
    wt_id: usize,
    interpolate: bool,
    table: WaveTable,
    len: f32,
    index: f32,
    increment: f32,
    pm: f32,
    fm: f32,
}

impl WaveOsc {
    pub fn new(ctx: Arc<SynthContext>) -> Self {
        let table = ctx.wavetables.get(WT_SIN);
        let len = ctx.params.ftable_length;
        Self {
            ctx,
            frequency: 440.0,
            wt_id: WT_SIN,
            interpolate: false,
            table,
            len,
            index: 0.0,
            increment: 0.0,
            pm: 0.0,
            fm: 0.0,
        }
    }

    /// Linearly interpolate between adjacent table entries.
    pub fn interpolated(ctx: Arc<SynthContext>) -> Self {
        Self {
            interpolate: true,
            ..Self::new(ctx)
        }
    }

    pub fn with_wavetable(mut self, wt_id: usize) -> Self {
        self.set_wavetable(wt_id);
        self
    }

    pub fn with_frequency(mut self, frequency: f32) -> Self {
        self.frequency = frequency;
        self
    }

    /// Takes effect on the next `reset`.
    pub fn set_frequency(&mut self, frequency: f32) {
        self.frequency = frequency;
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Takes effect on the next `reset`.
    pub fn set_wavetable(&mut self, wt_id: usize) {
        self.wt_id = wt_id;
    }

    pub fn wavetable(&self) -> usize {
        self.wt_id
    }

    pub fn set_interpolate(&mut self, on: bool) {
        self.interpolate = on;
    }

    pub fn context(&self) -> &Arc<SynthContext> {
        &self.ctx
    }

    /// Current read position in table entries.
    pub fn index(&self) -> f32 {
        self.index
    }

    pub fn increment(&self) -> f32 {
        self.increment
    }

    /// Offset the read position for the next sample only.
    #[inline]
    pub fn phase_mod_wt(&mut self, radians: f32) {
        self.pm += radians * self.ctx.params.rad_ti;
    }

    /// Offset the frequency for the next sample only.
    #[inline]
    pub fn modulate_frequency(&mut self, hz: f32) {
        self.fm += hz;
    }

    #[inline]
    fn read(&self, pos: f32) -> f32 {
        let i = pos as usize;
        let last = self.table.len().saturating_sub(2);
        let i = i.min(last);
        if self.interpolate {
            let frac = pos - i as f32;
            let a = self.table[i];
            let b = self.table[i + 1];
            a + (b - a) * frac
        } else {
            self.table[i]
        }
    }
}

impl UnitGen for WaveOsc {
    fn reset(&mut self, init_phase: f32) {
        self.table = self.ctx.wavetables.get(self.wt_id);
        self.increment = self.frequency * self.ctx.params.frq_ti;
        if init_phase >= 0.0 {
            self.index = wrap_index(init_phase * self.ctx.params.rad_ti, self.len);
            self.pm = 0.0;
            self.fm = 0.0;
        }
    }

    #[inline]
    fn next_sample(&mut self) -> f32 {
        let pos = if self.pm != 0.0 {
            wrap_index(self.index + self.pm, self.len)
        } else {
            self.index
        };
        let out = self.read(pos);

        let mut step = self.increment;
        if self.fm != 0.0 {
            step += self.fm * self.ctx.params.frq_ti;
        }
        self.index += step;
        if self.index >= self.len || self.index < 0.0 {
            self.index = wrap_index(self.index, self.len);
        }
        self.pm = 0.0;
        self.fm = 0.0;
        out
    }
}

/// Two-operator phase-modulation pair: modulator → carrier.
#[derive(Debug, Clone)]
pub struct FmOsc {
    carrier: WaveOsc,
    modulator: WaveOsc,
    ratio: f32,
    /// Peak phase deviation in radians.
    index: f32,
}

impl FmOsc {
    pub fn new(ctx: Arc<SynthContext>) -> Self {
        Self {
            carrier: WaveOsc::new(ctx.clone()),
            modulator: WaveOsc::new(ctx),
            ratio: 1.0,
            index: 1.0,
        }
    }

    pub fn set_frequency(&mut self, frequency: f32) {
        self.carrier.set_frequency(frequency);
        self.modulator.set_frequency(frequency * self.ratio);
    }

    pub fn frequency(&self) -> f32 {
        self.carrier.frequency()
    }

    /// Modulator frequency as a multiple of the carrier.
    pub fn set_ratio(&mut self, ratio: f32) {
        self.ratio = ratio;
        self.modulator.set_frequency(self.carrier.frequency() * ratio);
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    pub fn set_index(&mut self, index: f32) {
        self.index = index;
    }

    pub fn index(&self) -> f32 {
        self.index
    }

    pub fn set_wavetables(&mut self, carrier: usize, modulator: usize) {
        self.carrier.set_wavetable(carrier);
        self.modulator.set_wavetable(modulator);
    }

    /// Vibrato: both operators move together so the ratio holds.
    #[inline]
    pub fn modulate_frequency(&mut self, hz: f32) {
        self.carrier.modulate_frequency(hz);
        self.modulator.modulate_frequency(hz * self.ratio);
    }
}

impl UnitGen for FmOsc {
    fn reset(&mut self, init_phase: f32) {
        self.modulator.set_frequency(self.carrier.frequency() * self.ratio);
        self.carrier.reset(init_phase);
        self.modulator.reset(init_phase);
    }

    #[inline]
    fn next_sample(&mut self) -> f32 {
        let m = self.modulator.next_sample() * self.index;
        self.carrier.phase_mod_wt(m);
        self.carrier.next_sample()
    }
}

/// Amplitude modulation: carrier × (1 + level·mod) / (1 + level).
#[derive(Debug, Clone)]
pub struct AmOsc {
    carrier: WaveOsc,
    modulator: WaveOsc,
    ratio: f32,
    level: f32,
}

impl AmOsc {
    pub fn new(ctx: Arc<SynthContext>) -> Self {
        Self {
            carrier: WaveOsc::new(ctx.clone()),
            modulator: WaveOsc::new(ctx),
            ratio: 1.0,
            level: 1.0,
        }
    }

    pub fn set_frequency(&mut self, frequency: f32) {
        self.carrier.set_frequency(frequency);
        self.modulator.set_frequency(frequency * self.ratio);
    }

    pub fn set_ratio(&mut self, ratio: f32) {
        self.ratio = ratio;
        self.modulator.set_frequency(self.carrier.frequency() * ratio);
    }

    pub fn set_level(&mut self, level: f32) {
        self.level = level.max(0.0);
    }

    pub fn level(&self) -> f32 {
        self.level
    }
}

impl UnitGen for AmOsc {
    fn reset(&mut self, init_phase: f32) {
        self.carrier.reset(init_phase);
        self.modulator.reset(init_phase);
    }

    #[inline]
    fn next_sample(&mut self) -> f32 {
        let c = self.carrier.next_sample();
        let m = self.modulator.next_sample();
        c * (1.0 + self.level * m) / (1.0 + self.level)
    }
}

/*
Buzz: Closed-Form Pulse Trains
==============================

A pulse train is a sum of harmonics. Adding N sine oscillators per voice is
expensive, so the buzz oscillator uses the discrete summation formula (Moorer,
1976), which evaluates the whole sum in a handful of trig calls:

    Σ_{k=0}^{N-1} a^k sin(θ + kβ)

       sin θ − a sin(θ − β) − a^N [sin(θ + Nβ) − a sin(θ + (N−1)β)]
    =  ─────────────────────────────────────────────────────────────
                       1 + a² − 2a cos β

  θ   carrier phase (fundamental)
  β   spacing phase: partial k sits at f·(1 + k·ratio)
  a   rolloff: each partial is a times the previous one
  N   partial count

The result is multiplied by (1 − a)/(1 − a^N), the reciprocal of the sum of
the amplitudes, so the peak stays near ±1 whatever N and a are.

With a = 1 every partial has equal amplitude and the formula degenerates;
that case uses the equal-amplitude form instead:

    sin(Nβ/2) · sin(θ + (N−1)β/2) / sin(β/2) / N

N is clamped so the highest partial stays below Nyquist. The clamp is
recomputed on reset and whenever the harmonic scale changes.
*/

const MAX_ROLLOFF: f32 = 0.99;

/// Band-limited pulse train via the discrete summation formula.
#[derive(Debug, Clone)]
pub struct BuzzOsc {
    ctx: Arc<SynthContext>,
    frequency: f32,
    harmonics: u32,
    ratio: f32,
    rolloff: f32,
    scale: f32,

    max_harmonics: u32,
    active: u32,
    a_n: f32,
    norm: f32,
    theta: f32,
    beta: f32,
    fm: f32,
}

impl BuzzOsc {
    pub fn new(ctx: Arc<SynthContext>) -> Self {
        Self {
            ctx,
            frequency: 440.0,
            harmonics: 10,
            ratio: 1.0,
            rolloff: 1.0,
            scale: 1.0,
            max_harmonics: 1,
            active: 1,
            a_n: 0.0,
            norm: 1.0,
            theta: 0.0,
            beta: 0.0,
            fm: 0.0,
        }
    }

    pub fn set_frequency(&mut self, frequency: f32) {
        self.frequency = frequency;
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn set_harmonics(&mut self, harmonics: u32) {
        self.harmonics = harmonics.max(1);
    }

    pub fn harmonics(&self) -> u32 {
        self.harmonics
    }

    /// Spacing between partials as a multiple of the fundamental.
    pub fn set_ratio(&mut self, ratio: f32) {
        self.ratio = ratio.max(0.01);
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// 1.0 = equal amplitudes; smaller values roll the upper partials off.
    pub fn set_rolloff(&mut self, rolloff: f32) {
        self.rolloff = rolloff.clamp(0.0, 1.0);
    }

    pub fn rolloff(&self) -> f32 {
        self.rolloff
    }

    /// Scale the active partial count (0..1), e.g. from an envelope.
    #[inline]
    pub fn set_harmonic_scale(&mut self, scale: f32) {
        let scale = scale.clamp(0.0, 1.0);
        if scale != self.scale {
            self.scale = scale;
            self.update_count();
        }
    }

    /// Partials actually summed after the Nyquist clamp and scale.
    pub fn active_harmonics(&self) -> u32 {
        self.active
    }

    #[inline]
    pub fn modulate_frequency(&mut self, hz: f32) {
        self.fm += hz;
    }

    fn update_count(&mut self) {
        let wanted = ((self.harmonics as f32 * self.scale).round() as u32).max(1);
        self.active = wanted.min(self.max_harmonics).max(1);
        let a = self.rolloff.min(MAX_ROLLOFF);
        if self.rolloff < 1.0 {
            self.a_n = a.powi(self.active as i32);
            let sum = 1.0 - self.a_n;
            self.norm = if sum > 1e-9 { (1.0 - a) / sum } else { 1.0 };
        } else {
            self.a_n = 1.0;
            self.norm = 1.0 / self.active as f32;
        }
    }
}

impl UnitGen for BuzzOsc {
    fn reset(&mut self, init_phase: f32) {
        let nyquist = self.ctx.params.nyquist;
        let f = self.frequency.abs().max(1e-3);
        // highest partial f * (1 + (N-1) * ratio) must stay below Nyquist
        let room = ((nyquist / f - 1.0) / self.ratio).floor();
        self.max_harmonics = if room.is_finite() && room >= 0.0 {
            (room as u32).saturating_add(1)
        } else {
            1
        };
        self.update_count();
        if init_phase >= 0.0 {
            self.theta = init_phase.rem_euclid(TAU);
            self.beta = 0.0;
            self.fm = 0.0;
        }
    }

    #[inline]
    fn next_sample(&mut self) -> f32 {
        let theta = self.theta;
        let beta = self.beta;
        let n = self.active as f32;

        let out = if self.rolloff < 1.0 {
            let a = self.rolloff.min(MAX_ROLLOFF);
            let num = theta.sin() - a * (theta - beta).sin()
                - self.a_n * ((theta + n * beta).sin() - a * (theta + (n - 1.0) * beta).sin());
            let den = 1.0 + a * a - 2.0 * a * beta.cos();
            num / den * self.norm
        } else {
            let half = 0.5 * beta;
            let s = half.sin();
            let center = (theta + (n - 1.0) * half).sin();
            if s.abs() < 1e-6 {
                center
            } else {
                (n * half).sin() * center / s * self.norm
            }
        };

        let f = self.frequency + self.fm;
        let step = f * self.ctx.params.frq_rad;
        self.theta = (self.theta + step).rem_euclid(TAU);
        self.beta = (self.beta + step * self.ratio).rem_euclid(TAU);
        self.fm = 0.0;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::wavetable::{WT_SAW, WT_SQR};

    fn ctx() -> Arc<SynthContext> {
        Arc::new(SynthContext::with_options(48_000.0, 4096, true))
    }

    fn zero_crossings(buffer: &[f32]) -> usize {
        buffer
            .windows(2)
            .filter(|w| w[0] <= 0.0 && w[1] > 0.0)
            .count()
    }

    #[test]
    fn sine_frequency_matches() {
        let mut osc = WaveOsc::new(ctx()).with_frequency(480.0);
        osc.reset(0.0);
        let buffer: Vec<f32> = (0..48_000).map(|_| osc.next_sample()).collect();
        let crossings = zero_crossings(&buffer);
        assert!((479..=481).contains(&crossings), "got {crossings}");
    }

    #[test]
    fn reset_negative_keeps_index() {
        let mut osc = WaveOsc::interpolated(ctx()).with_frequency(220.0);
        osc.reset(0.0);
        for _ in 0..1234 {
            osc.next_sample();
        }
        let before_index = osc.index();
        let before = osc.next_sample();

        osc.set_frequency(330.0);
        osc.reset(-1.0);
        assert!((osc.index() - before_index - 220.0 * 4096.0 / 48_000.0).abs() < 1e-2);
        let after = osc.next_sample();
        let max_step = (TAU * 330.0 / 48_000.0) * 1.01;
        assert!((after - before).abs() <= max_step, "jump {}", (after - before).abs());
    }

    #[test]
    fn phase_mod_is_one_tick_only() {
        let mut a = WaveOsc::new(ctx()).with_frequency(100.0);
        let mut b = a.clone();
        a.reset(0.0);
        b.reset(0.0);
        b.phase_mod_wt(1.0);
        let _ = a.next_sample();
        let _ = b.next_sample();
        assert_eq!(a.index(), b.index());
        assert_eq!(a.next_sample(), b.next_sample());
    }

    #[test]
    fn frequency_mod_shifts_phase_permanently() {
        let mut a = WaveOsc::new(ctx()).with_frequency(100.0);
        let mut b = a.clone();
        a.reset(0.0);
        b.reset(0.0);
        b.modulate_frequency(100.0);
        a.next_sample();
        b.next_sample();
        assert!(b.index() > a.index());
    }

    #[test]
    fn unknown_wavetable_is_silent() {
        let mut osc = WaveOsc::new(ctx()).with_wavetable(4000);
        osc.reset(0.0);
        assert!((0..256).all(|_| osc.next_sample() == 0.0));
    }

    #[test]
    fn band_limited_tables_stay_bounded() {
        for wt in [WT_SAW, WT_SQR] {
            let mut osc = WaveOsc::interpolated(ctx()).with_wavetable(wt).with_frequency(1000.0);
            osc.reset(0.0);
            let peak = (0..4800).map(|_| osc.next_sample().abs()).fold(0.0, f32::max);
            assert!(peak <= 1.0 + 1e-4);
        }
    }

    #[test]
    fn fm_zero_index_is_plain_sine() {
        let ctx = ctx();
        let mut fm = FmOsc::new(ctx.clone());
        fm.set_frequency(300.0);
        fm.set_ratio(2.0);
        fm.set_index(0.0);
        fm.reset(0.0);
        let mut sine = WaveOsc::new(ctx).with_frequency(300.0);
        sine.reset(0.0);
        for _ in 0..512 {
            assert!((fm.next_sample() - sine.next_sample()).abs() < 1e-6);
        }
    }

    #[test]
    fn am_stays_normalized() {
        let mut am = AmOsc::new(ctx());
        am.set_frequency(500.0);
        am.set_ratio(0.1);
        am.set_level(0.8);
        am.reset(0.0);
        let peak = (0..9600).map(|_| am.next_sample().abs()).fold(0.0, f32::max);
        assert!(peak <= 1.0 + 1e-4 && peak > 0.5);
    }

    #[test]
    fn buzz_clamps_below_nyquist() {
        let mut buzz = BuzzOsc::new(ctx());
        buzz.set_frequency(5_000.0);
        buzz.set_harmonics(50);
        buzz.reset(0.0);
        // 5 kHz: partials at 5, 10, 15, 20 kHz fit below 24 kHz
        assert_eq!(buzz.active_harmonics(), 4);

        buzz.set_harmonic_scale(0.5);
        assert_eq!(buzz.active_harmonics(), 4);
        buzz.set_harmonic_scale(0.02);
        assert_eq!(buzz.active_harmonics(), 1);
    }

    #[test]
    fn buzz_output_is_bounded() {
        for rolloff in [1.0, 0.9, 0.5] {
            let mut buzz = BuzzOsc::new(ctx());
            buzz.set_frequency(110.0);
            buzz.set_harmonics(20);
            buzz.set_rolloff(rolloff);
            buzz.reset(0.0);
            let peak = (0..4800).map(|_| buzz.next_sample().abs()).fold(0.0, f32::max);
            assert!(peak <= 1.0 + 1e-3, "rolloff {rolloff} peak {peak}");
            assert!(peak > 0.1);
        }
    }

    #[test]
    fn buzz_single_harmonic_is_sine() {
        let ctx = ctx();
        let mut buzz = BuzzOsc::new(ctx.clone());
        buzz.set_frequency(200.0);
        buzz.set_harmonics(1);
        buzz.reset(0.0);
        let mut sine = WaveOsc::interpolated(ctx).with_frequency(200.0);
        sine.reset(0.0);
        for _ in 0..480 {
            assert!((buzz.next_sample() - sine.next_sample()).abs() < 2e-3);
        }
    }
}
