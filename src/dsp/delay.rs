use std::sync::Arc;

use crate::dsp::{context::SynthContext, oscillator::WaveOsc, UnitGen};

/*
Delay Lines
===========

All delays here are ring buffers sized once at construction (or when the
delay time is changed from the control side). Ticking never allocates.

  DelayLine      y[n] = atten · x[n - D]
                 Plain, non-recirculating.

  CombDelay      y[n] = x[n - D] + g · y[n - D]      (stored: x + g·y)
                 Echoes every D samples, each g times quieter. Rather than
                 asking for g directly, the comb takes the time it should
                 take to decay to a reference level (0.001 = -60 dB, the
                 classic RT60):

                     g = ref ^ (delay / decay)

                 A 40 ms comb with a 1 s decay needs 25 round trips to
                 reach -60 dB, so g = 0.001^(1/25) ≈ 0.759.

  AllPassDelay   y[n] = -g·x[n] + x[n - D] + g·y[n - D]
                 Same feedback as the comb plus a feed-forward path that
                 flattens the magnitude response. Adds echo density without
                 colouring the spectrum.

  VarDelay       Delay time changes continuously inside a maximum. Reads
                 between samples with linear interpolation so sweeping the
                 time doesn't zipper.

  Flanger        VarDelay swept by an LFO around a centre delay, with
                 feedback and a dry/wet mix.
*/

pub const DEFAULT_REF_LEVEL: f32 = 0.001;

fn delay_samples(seconds: f32, sample_rate: f32) -> usize {
    ((seconds.max(0.0) * sample_rate).round() as usize).max(1)
}

/// Plain delay.
#[derive(Debug, Clone)]
pub struct DelayLine {
    buf: Vec<f32>,
    pos: usize,
    atten: f32,
}

impl DelayLine {
    pub fn new(seconds: f32, sample_rate: f32) -> Self {
        Self::with_samples(delay_samples(seconds, sample_rate))
    }

    pub fn with_samples(samples: usize) -> Self {
        Self {
            buf: vec![0.0; samples.max(1)],
            pos: 0,
            atten: 1.0,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn set_atten(&mut self, atten: f32) {
        self.atten = atten;
    }

    /// Resize the line (control side only: this allocates).
    pub fn set_delay(&mut self, seconds: f32, sample_rate: f32) {
        let n = delay_samples(seconds, sample_rate);
        if n != self.buf.len() {
            self.buf = vec![0.0; n];
            self.pos = 0;
        }
    }

    /// Value written `n` samples ago (1 = most recent).
    pub fn tap(&self, n: usize) -> f32 {
        let len = self.buf.len();
        let n = n.clamp(1, len);
        self.buf[(self.pos + len - n) % len]
    }

    /// Oldest value in the line: what the next `sample` call returns.
    #[inline]
    pub fn output(&self) -> f32 {
        self.buf[self.pos] * self.atten
    }
}

impl UnitGen for DelayLine {
    fn reset(&mut self, init_phase: f32) {
        if init_phase >= 0.0 {
            self.buf.fill(0.0);
            self.pos = 0;
        }
    }

    fn next_sample(&mut self) -> f32 {
        self.sample(0.0)
    }

    #[inline]
    fn sample(&mut self, x: f32) -> f32 {
        let out = self.buf[self.pos];
        self.buf[self.pos] = x;
        self.pos += 1;
        if self.pos >= self.buf.len() {
            self.pos = 0;
        }
        out * self.atten
    }
}

/// Feedback comb delay.
#[derive(Debug, Clone)]
pub struct CombDelay {
    line: DelayLine,
    sample_rate: f32,
    delay: f32,
    decay: f32,
    ref_level: f32,
    feedback: f32,
}

impl CombDelay {
    pub fn new(delay: f32, decay: f32, sample_rate: f32) -> Self {
        let mut c = Self {
            line: DelayLine::new(delay, sample_rate),
            sample_rate,
            delay,
            decay,
            ref_level: DEFAULT_REF_LEVEL,
            feedback: 0.0,
        };
        c.calc_feedback();
        c
    }

    pub fn set_decay(&mut self, decay: f32) {
        self.decay = decay;
        self.calc_feedback();
    }

    pub fn set_ref_level(&mut self, ref_level: f32) {
        self.ref_level = ref_level.clamp(1e-9, 0.999);
        self.calc_feedback();
    }

    pub fn set_atten(&mut self, atten: f32) {
        self.line.set_atten(atten);
    }

    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    /// Actual delay in seconds after rounding to whole samples.
    pub fn delay(&self) -> f32 {
        self.delay
    }

    fn calc_feedback(&mut self) {
        let decay = self.decay.max(crate::MIN_TIME);
        let delay = self.line.len() as f32 / self.sample_rate;
        self.delay = delay;
        self.feedback = self.ref_level.powf(delay / decay);
    }
}

impl UnitGen for CombDelay {
    fn reset(&mut self, init_phase: f32) {
        self.calc_feedback();
        self.line.reset(init_phase);
    }

    fn next_sample(&mut self) -> f32 {
        self.sample(0.0)
    }

    #[inline]
    fn sample(&mut self, x: f32) -> f32 {
        let y = self.line.buf[self.line.pos];
        self.line.sample(x + self.feedback * y);
        y * self.line.atten
    }
}

/// All-pass delay.
#[derive(Debug, Clone)]
pub struct AllPassDelay {
    line: DelayLine,
    sample_rate: f32,
    decay: f32,
    ref_level: f32,
    g: f32,
}

impl AllPassDelay {
    pub fn new(delay: f32, decay: f32, sample_rate: f32) -> Self {
        let mut a = Self {
            line: DelayLine::new(delay, sample_rate),
            sample_rate,
            decay,
            ref_level: DEFAULT_REF_LEVEL,
            g: 0.0,
        };
        a.calc_feedback();
        a
    }

    /// Set the coefficient directly instead of from decay time.
    pub fn set_coef(&mut self, g: f32) {
        self.g = g.clamp(-0.999, 0.999);
    }

    pub fn coef(&self) -> f32 {
        self.g
    }

    pub fn set_decay(&mut self, decay: f32) {
        self.decay = decay;
        self.calc_feedback();
    }

    fn calc_feedback(&mut self) {
        let delay = self.line.len() as f32 / self.sample_rate;
        self.g = self.ref_level.powf(delay / self.decay.max(crate::MIN_TIME));
    }
}

impl UnitGen for AllPassDelay {
    fn reset(&mut self, init_phase: f32) {
        self.line.reset(init_phase);
    }

    fn next_sample(&mut self) -> f32 {
        self.sample(0.0)
    }

    #[inline]
    fn sample(&mut self, x: f32) -> f32 {
        let delayed = self.line.buf[self.line.pos];
        let y = delayed - self.g * x;
        self.line.sample(x + self.g * y);
        y
    }
}

/// Variable-length delay with interpolated read.
#[derive(Debug, Clone)]
pub struct VarDelay {
    buf: Vec<f32>,
    write: usize,
    sample_rate: f32,
    delay: f32,
}

impl VarDelay {
    pub fn new(max_seconds: f32, sample_rate: f32) -> Self {
        // one extra slot so the full maximum can be read behind the writer
        let len = delay_samples(max_seconds, sample_rate) + 2;
        Self {
            buf: vec![0.0; len],
            write: 0,
            sample_rate,
            delay: 1.0,
        }
    }

    pub fn max_delay(&self) -> f32 {
        (self.buf.len() - 2) as f32 / self.sample_rate
    }

    /// Delay time in seconds, clamped to the maximum.
    #[inline]
    pub fn set_delay(&mut self, seconds: f32) {
        let max = (self.buf.len() - 2) as f32;
        self.delay = (seconds * self.sample_rate).clamp(1.0, max);
    }

    pub fn delay(&self) -> f32 {
        self.delay / self.sample_rate
    }

    /// Read at the current delay without writing.
    #[inline]
    pub fn read(&self) -> f32 {
        let len = self.buf.len() as f32;
        let mut pos = self.write as f32 - self.delay;
        if pos < 0.0 {
            pos += len;
        }
        let i = pos as usize;
        let frac = pos - i as f32;
        let a = self.buf[i % self.buf.len()];
        let b = self.buf[(i + 1) % self.buf.len()];
        a + (b - a) * frac
    }

    #[inline]
    pub fn write(&mut self, x: f32) {
        self.buf[self.write] = x;
        self.write += 1;
        if self.write >= self.buf.len() {
            self.write = 0;
        }
    }
}

impl UnitGen for VarDelay {
    fn reset(&mut self, init_phase: f32) {
        if init_phase >= 0.0 {
            self.buf.fill(0.0);
            self.write = 0;
        }
    }

    fn next_sample(&mut self) -> f32 {
        self.sample(0.0)
    }

    #[inline]
    fn sample(&mut self, x: f32) -> f32 {
        let out = self.read();
        self.write(x);
        out
    }
}

/// Swept variable delay with feedback.
#[derive(Debug, Clone)]
pub struct Flanger {
    delay: VarDelay,
    sweep: WaveOsc,
    center: f32,
    depth: f32,
    feedback: f32,
    dry: f32,
    wet: f32,
}

impl Flanger {
    /// `center` and `depth` in seconds; the sweep runs at `rate` Hz.
    pub fn new(ctx: Arc<SynthContext>, center: f32, depth: f32, rate: f32) -> Self {
        let sample_rate = ctx.params.sample_rate;
        let center = center.max(0.0);
        let depth = depth.clamp(0.0, center);
        Self {
            delay: VarDelay::new(center + depth + 0.001, sample_rate),
            sweep: WaveOsc::interpolated(ctx).with_frequency(rate),
            center,
            depth,
            feedback: 0.0,
            dry: 0.5,
            wet: 0.5,
        }
    }

    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback = feedback.clamp(-0.99, 0.99);
    }

    pub fn set_mix(&mut self, dry: f32, wet: f32) {
        self.dry = dry;
        self.wet = wet;
    }

    pub fn set_rate(&mut self, rate: f32) {
        self.sweep.set_frequency(rate);
        self.sweep.reset(-1.0);
    }
}

impl UnitGen for Flanger {
    fn reset(&mut self, init_phase: f32) {
        self.delay.reset(init_phase);
        self.sweep.reset(init_phase);
    }

    fn next_sample(&mut self) -> f32 {
        self.sample(0.0)
    }

    #[inline]
    fn sample(&mut self, x: f32) -> f32 {
        let sweep = self.sweep.next_sample();
        self.delay.set_delay(self.center + self.depth * sweep);
        let d = self.delay.read();
        self.delay.write(x + self.feedback * d);
        self.dry * x + self.wet * d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_line_delays_impulse() {
        let mut line = DelayLine::with_samples(5);
        let out: Vec<f32> = (0..8)
            .map(|i| line.sample(if i == 0 { 1.0 } else { 0.0 }))
            .collect();
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn tap_reads_history() {
        let mut line = DelayLine::with_samples(4);
        for x in [1.0, 2.0, 3.0] {
            line.sample(x);
        }
        assert_eq!(line.tap(1), 3.0);
        assert_eq!(line.tap(3), 1.0);
    }

    #[test]
    fn comb_feedback_from_decay() {
        let comb = CombDelay::new(0.04, 1.0, 1000.0);
        // 25 round trips to reach the reference level
        assert!((comb.feedback() - 0.001_f32.powf(1.0 / 25.0)).abs() < 1e-6);
    }

    #[test]
    fn comb_echoes_decay() {
        let mut comb = CombDelay::new(0.01, 0.1, 1000.0);
        let out: Vec<f32> = (0..31)
            .map(|i| comb.sample(if i == 0 { 1.0 } else { 0.0 }))
            .collect();
        let g = comb.feedback();
        assert_eq!(out[10], 1.0);
        assert!((out[20] - g).abs() < 1e-6);
        assert!((out[30] - g * g).abs() < 1e-6);
    }

    #[test]
    fn allpass_delay_passes_energy() {
        let mut ap = AllPassDelay::new(0.005, 0.1, 1000.0);
        let impulse: Vec<f32> = (0..2000)
            .map(|i| ap.sample(if i == 0 { 1.0 } else { 0.0 }))
            .collect();
        let energy: f32 = impulse.iter().map(|v| v * v).sum();
        assert!((energy - 1.0).abs() < 1e-3, "energy {energy}");
    }

    #[test]
    fn var_delay_interpolates() {
        let mut d = VarDelay::new(0.01, 1000.0);
        d.set_delay(0.0025);
        let out: Vec<f32> = (0..6)
            .map(|i| d.sample(if i == 0 { 1.0 } else { 0.0 }))
            .collect();
        // 2.5 samples: the impulse is split over two outputs
        assert!((out[2] - 0.5).abs() < 1e-6);
        assert!((out[3] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn var_delay_clamps_to_max() {
        let mut d = VarDelay::new(0.01, 1000.0);
        d.set_delay(1.0);
        assert!((d.delay() - 0.01).abs() < 1e-6);
    }

    #[test]
    fn flanger_dry_only_is_identity() {
        let ctx = Arc::new(SynthContext::with_options(48_000.0, 1024, false));
        let mut flanger = Flanger::new(ctx, 0.003, 0.002, 0.5);
        flanger.set_mix(1.0, 0.0);
        flanger.reset(0.0);
        for i in 0..256 {
            let x = (i as f32 * 0.1).sin();
            assert_eq!(flanger.sample(x), x);
        }
    }
}
