use std::f32::consts::{PI, TAU};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dsp::UnitGen;

/*
Filters
=======

| type          | order | response                    | used by                  |
| ------------- | ----- | --------------------------- | ------------------------ |
| OnePole       | 1     | 6 dB/oct LP or HP           | tone controls, smoothing |
| Biquad        | 2     | LP / HP / BP / notch / AP   | BuzzSynth, SubSynth      |
| Reson         | 2     | resonator, peak at fc       | Chuffer, SubSynth        |
| ResonLowpass  | 2     | LP with resonant peak       | SubSynth, sample players |
| FirN          | odd N | windowed-sinc LP            | ModSynth                 |
| AllPass       | odd N | flat magnitude, phase shift | ModSynth, phasing        |

Coefficients
------------

Every filter caches its coefficients. They are recomputed ONLY in
`calc_coef`; `sample()` never touches them. Computing a biquad costs a tan,
a sin, a cos and a division, which is fine once per note and wasteful once
per sample.

When an envelope sweeps the cutoff, the instrument needs new coefficients
while the note plays. `UpdateStride` is the explicit throttle for that:
recompute every `stride` samples and run with stale coefficients in between.
Stride 1 is per-sample (smoothest, most expensive); 20-50 is inaudible for
typical sweeps.
*/

/// Minimum and maximum cutoff kept away from DC and Nyquist.
fn clamp_cutoff(fc: f32, sample_rate: f32) -> f32 {
    fc.clamp(1.0, sample_rate * 0.49)
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterType {
    #[default]
    LowPass,
    HighPass,
    BandPass,
    Notch,
    AllPass,
}

/// One-pole low-pass or high-pass.
#[derive(Debug, Clone)]
pub struct OnePole {
    sample_rate: f32,
    highpass: bool,
    a0: f32,
    a1: f32,
    b1: f32,
    x1: f32,
    y1: f32,
}

impl OnePole {
    pub fn lowpass(sample_rate: f32, fc: f32) -> Self {
        let mut f = Self {
            sample_rate,
            highpass: false,
            a0: 1.0,
            a1: 0.0,
            b1: 0.0,
            x1: 0.0,
            y1: 0.0,
        };
        f.calc_coef(fc);
        f
    }

    pub fn highpass(sample_rate: f32, fc: f32) -> Self {
        let mut f = Self::lowpass(sample_rate, fc);
        f.highpass = true;
        f.calc_coef(fc);
        f
    }

    pub fn calc_coef(&mut self, fc: f32) {
        let fc = clamp_cutoff(fc, self.sample_rate);
        let b = (-TAU * fc / self.sample_rate).exp();
        self.b1 = b;
        if self.highpass {
            self.a0 = (1.0 + b) * 0.5;
            self.a1 = -self.a0;
        } else {
            self.a0 = 1.0 - b;
            self.a1 = 0.0;
        }
    }
}

impl UnitGen for OnePole {
    fn reset(&mut self, init_phase: f32) {
        if init_phase >= 0.0 {
            self.x1 = 0.0;
            self.y1 = 0.0;
        }
    }

    fn next_sample(&mut self) -> f32 {
        self.sample(0.0)
    }

    #[inline]
    fn sample(&mut self, x: f32) -> f32 {
        let y = self.a0 * x + self.a1 * self.x1 + self.b1 * self.y1;
        self.x1 = x;
        self.y1 = y;
        y
    }
}

/// RBJ cookbook biquad, direct form I.
#[derive(Debug, Clone)]
pub struct Biquad {
    sample_rate: f32,
    kind: FilterType,
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    pub fn new(sample_rate: f32, kind: FilterType) -> Self {
        let mut f = Self {
            sample_rate,
            kind,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        };
        f.calc_coef(1000.0, std::f32::consts::FRAC_1_SQRT_2);
        f
    }

    pub fn kind(&self) -> FilterType {
        self.kind
    }

    pub fn set_kind(&mut self, kind: FilterType) {
        self.kind = kind;
    }

    pub fn calc_coef(&mut self, fc: f32, q: f32) {
        let fc = clamp_cutoff(fc, self.sample_rate);
        let q = q.max(0.01);
        let w0 = TAU * fc / self.sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);

        let (b0, b1, b2) = match self.kind {
            FilterType::LowPass => ((1.0 - cos) * 0.5, 1.0 - cos, (1.0 - cos) * 0.5),
            FilterType::HighPass => ((1.0 + cos) * 0.5, -(1.0 + cos), (1.0 + cos) * 0.5),
            FilterType::BandPass => (alpha, 0.0, -alpha),
            FilterType::Notch => (1.0, -2.0 * cos, 1.0),
            FilterType::AllPass => (1.0 - alpha, -2.0 * cos, 1.0 + alpha),
        };
        let a0 = 1.0 + alpha;
        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = -2.0 * cos / a0;
        self.a2 = (1.0 - alpha) / a0;
    }
}

impl UnitGen for Biquad {
    fn reset(&mut self, init_phase: f32) {
        if init_phase >= 0.0 {
            self.x1 = 0.0;
            self.x2 = 0.0;
            self.y1 = 0.0;
            self.y2 = 0.0;
        }
    }

    fn next_sample(&mut self) -> f32 {
        self.sample(0.0)
    }

    #[inline]
    fn sample(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

/// Two-pole resonator with unity gain at the centre frequency.
#[derive(Debug, Clone)]
pub struct Reson {
    sample_rate: f32,
    b0: f32,
    a1: f32,
    a2: f32,
    y1: f32,
    y2: f32,
}

impl Reson {
    pub fn new(sample_rate: f32) -> Self {
        let mut f = Self {
            sample_rate,
            b0: 1.0,
            a1: 0.0,
            a2: 0.0,
            y1: 0.0,
            y2: 0.0,
        };
        f.calc_coef(1000.0, 1.0);
        f
    }

    /// Bandwidth is `fc / q`.
    pub fn calc_coef(&mut self, fc: f32, q: f32) {
        let fc = clamp_cutoff(fc, self.sample_rate);
        let bw = fc / q.max(0.01);
        let r = (-PI * bw / self.sample_rate).exp();
        let theta = TAU * fc / self.sample_rate;
        self.a1 = -2.0 * r * theta.cos();
        self.a2 = r * r;
        self.b0 = (1.0 - r) * (1.0 - 2.0 * r * (2.0 * theta).cos() + r * r).sqrt();
    }
}

impl UnitGen for Reson {
    fn reset(&mut self, init_phase: f32) {
        if init_phase >= 0.0 {
            self.y1 = 0.0;
            self.y2 = 0.0;
        }
    }

    fn next_sample(&mut self) -> f32 {
        self.sample(0.0)
    }

    #[inline]
    fn sample(&mut self, x: f32) -> f32 {
        let y = self.b0 * x - self.a1 * self.y1 - self.a2 * self.y2;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

/*
Resonant low-pass: a topology-preserving state-variable filter. Two
trapezoidal integrators, one feedback path scaled by k = 1/q:

    g  = tan(π fc / sr)
    h  = 1 / (1 + g (g + k))
    v1 = h (ic1 + g (x - ic2))       band-pass
    v2 = ic2 + g v1                  low-pass

It stays stable under fast cutoff sweeps, which matters when an envelope
drives fc and the coefficient stride is short.
*/

/// Two-pole resonant low-pass (state-variable core).
#[derive(Debug, Clone)]
pub struct ResonLowpass {
    sample_rate: f32,
    g: f32,
    k: f32,
    h: f32,
    ic1eq: f32,
    ic2eq: f32,
}

impl ResonLowpass {
    pub fn new(sample_rate: f32) -> Self {
        let mut f = Self {
            sample_rate,
            g: 0.0,
            k: 1.0,
            h: 1.0,
            ic1eq: 0.0,
            ic2eq: 0.0,
        };
        f.calc_coef(1000.0, std::f32::consts::FRAC_1_SQRT_2);
        f
    }

    pub fn calc_coef(&mut self, fc: f32, q: f32) {
        let fc = clamp_cutoff(fc, self.sample_rate);
        self.g = (PI * fc / self.sample_rate).tan();
        self.k = 1.0 / q.max(0.1);
        self.h = 1.0 / (1.0 + self.g * (self.g + self.k));
    }
}

impl UnitGen for ResonLowpass {
    fn reset(&mut self, init_phase: f32) {
        if init_phase >= 0.0 {
            self.ic1eq = 0.0;
            self.ic2eq = 0.0;
        }
    }

    fn next_sample(&mut self) -> f32 {
        self.sample(0.0)
    }

    #[inline]
    fn sample(&mut self, x: f32) -> f32 {
        let v3 = x - self.ic2eq;
        let v1 = self.h * (self.ic1eq + self.g * v3);
        let v2 = self.ic2eq + self.g * v1;
        self.ic1eq = 2.0 * v1 - self.ic1eq;
        self.ic2eq = 2.0 * v2 - self.ic2eq;
        v2
    }
}

/// FIR filter with an odd-length impulse response.
#[derive(Debug, Clone)]
pub struct FirN {
    impulse: Vec<f32>,
    history: Vec<f32>,
    pos: usize,
}

impl FirN {
    /// Use the given impulse response; an even length is padded to odd.
    pub fn from_impulse(mut impulse: Vec<f32>) -> Self {
        if impulse.is_empty() {
            impulse.push(1.0);
        }
        if impulse.len() % 2 == 0 {
            impulse.push(0.0);
        }
        let len = impulse.len();
        Self {
            impulse,
            history: vec![0.0; len],
            pos: 0,
        }
    }

    /// Hamming-windowed sinc low-pass of the given (odd) order.
    pub fn lowpass(order: usize, fc: f32, sample_rate: f32) -> Self {
        let mut f = Self::from_impulse(vec![0.0; order.max(1) | 1]);
        f.calc_coef(fc, sample_rate);
        f
    }

    pub fn order(&self) -> usize {
        self.impulse.len()
    }

    pub fn impulse(&self) -> &[f32] {
        &self.impulse
    }

    pub fn calc_coef(&mut self, fc: f32, sample_rate: f32) {
        let n = self.impulse.len();
        let mid = (n / 2) as f32;
        let wc = TAU * clamp_cutoff(fc, sample_rate) / sample_rate;
        let mut sum = 0.0;
        for (i, h) in self.impulse.iter_mut().enumerate() {
            let m = i as f32 - mid;
            let sinc = if m == 0.0 { wc / PI } else { (wc * m).sin() / (PI * m) };
            let window = if n > 1 {
                0.54 - 0.46 * (TAU * i as f32 / (n - 1) as f32).cos()
            } else {
                1.0
            };
            *h = sinc * window;
            sum += *h;
        }
        if sum.abs() > 1e-9 {
            for h in &mut self.impulse {
                *h /= sum;
            }
        }
    }
}

impl UnitGen for FirN {
    fn reset(&mut self, init_phase: f32) {
        if init_phase >= 0.0 {
            self.history.fill(0.0);
            self.pos = 0;
        }
    }

    fn next_sample(&mut self) -> f32 {
        self.sample(0.0)
    }

    #[inline]
    fn sample(&mut self, x: f32) -> f32 {
        let n = self.history.len();
        self.history[self.pos] = x;
        let mut acc = 0.0;
        let mut idx = self.pos;
        for h in &self.impulse {
            acc += h * self.history[idx];
            idx = if idx == 0 { n - 1 } else { idx - 1 };
        }
        self.pos = (self.pos + 1) % n;
        acc
    }
}

/// Odd-order all-pass: up to [`AllPass::MAX_ORDER`] identical first-order
/// sections in series. Each section has unit gain, so the chain does too.
#[derive(Debug, Clone)]
pub struct AllPass {
    sample_rate: f32,
    g: f32,
    order: usize,
    /// (x1, y1) per section.
    state: [[f32; 2]; AllPass::MAX_ORDER],
}

impl AllPass {
    pub const MAX_ORDER: usize = 15;

    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            g: 0.0,
            order: 1,
            state: [[0.0; 2]; Self::MAX_ORDER],
        }
    }

    pub fn with_order(mut self, order: usize) -> Self {
        self.set_order(order);
        self
    }

    /// Rounded up to odd and clamped to `1..=MAX_ORDER`.
    pub fn set_order(&mut self, order: usize) {
        self.order = (order | 1).min(Self::MAX_ORDER);
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Place each section's 90° phase point at `fc`.
    pub fn calc_coef(&mut self, fc: f32) {
        let t = (PI * clamp_cutoff(fc, self.sample_rate) / self.sample_rate).tan();
        self.g = (t - 1.0) / (t + 1.0);
    }

    pub fn set_coef(&mut self, g: f32) {
        self.g = g.clamp(-0.999, 0.999);
    }

    pub fn coef(&self) -> f32 {
        self.g
    }
}

impl UnitGen for AllPass {
    fn reset(&mut self, init_phase: f32) {
        if init_phase >= 0.0 {
            self.state = [[0.0; 2]; Self::MAX_ORDER];
        }
    }

    fn next_sample(&mut self) -> f32 {
        self.sample(0.0)
    }

    #[inline]
    fn sample(&mut self, x: f32) -> f32 {
        let g = self.g;
        self.state[..self.order].iter_mut().fold(x, |x, [x1, y1]| {
            let y = g * x + *x1 - g * *y1;
            *x1 = x;
            *y1 = y;
            y
        })
    }
}

/// Recompute-every-N-samples throttle for swept coefficients.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStride {
    stride: u32,
    #[cfg_attr(feature = "serde", serde(skip))]
    countdown: u32,
}

impl UpdateStride {
    pub fn new(stride: u32) -> Self {
        Self {
            stride: stride.max(1),
            countdown: 0,
        }
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn set_stride(&mut self, stride: u32) {
        self.stride = stride.max(1);
        self.countdown = self.countdown.min(self.stride);
    }

    /// The next `tick` reports an update.
    pub fn reset(&mut self) {
        self.countdown = 0;
    }

    /// True when coefficients are due; call once per sample.
    #[inline]
    pub fn tick(&mut self) -> bool {
        if self.countdown == 0 {
            self.countdown = self.stride - 1;
            true
        } else {
            self.countdown -= 1;
            false
        }
    }
}

impl Default for UpdateStride {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Filter selection for swept filters.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepKind {
    #[default]
    LowPass,
    HighPass,
    BandPass,
    Reson,
    ResonLowpass,
}

impl SweepKind {
    pub fn from_index(index: i32) -> Self {
        match index {
            1 => SweepKind::HighPass,
            2 => SweepKind::BandPass,
            3 => SweepKind::Reson,
            4 => SweepKind::ResonLowpass,
            _ => SweepKind::LowPass,
        }
    }

    pub fn index(self) -> i32 {
        match self {
            SweepKind::LowPass => 0,
            SweepKind::HighPass => 1,
            SweepKind::BandPass => 2,
            SweepKind::Reson => 3,
            SweepKind::ResonLowpass => 4,
        }
    }
}

#[derive(Debug, Clone)]
enum SweepCore {
    Biquad(Biquad),
    Reson(Reson),
    ResonLowpass(ResonLowpass),
}

/// A selectable two-pole filter whose cutoff is driven per sample, with the
/// coefficient refresh throttled by an [`UpdateStride`].
#[derive(Debug, Clone)]
pub struct SweptFilter {
    kind: SweepKind,
    core: SweepCore,
    stride: UpdateStride,
}

impl SweptFilter {
    pub fn new(sample_rate: f32, kind: SweepKind, stride: u32) -> Self {
        let core = match kind {
            SweepKind::LowPass => SweepCore::Biquad(Biquad::new(sample_rate, FilterType::LowPass)),
            SweepKind::HighPass => SweepCore::Biquad(Biquad::new(sample_rate, FilterType::HighPass)),
            SweepKind::BandPass => SweepCore::Biquad(Biquad::new(sample_rate, FilterType::BandPass)),
            SweepKind::Reson => SweepCore::Reson(Reson::new(sample_rate)),
            SweepKind::ResonLowpass => SweepCore::ResonLowpass(ResonLowpass::new(sample_rate)),
        };
        Self {
            kind,
            core,
            stride: UpdateStride::new(stride),
        }
    }

    pub fn kind(&self) -> SweepKind {
        self.kind
    }

    pub fn stride(&self) -> &UpdateStride {
        &self.stride
    }

    pub fn set_stride(&mut self, stride: u32) {
        self.stride.set_stride(stride);
    }

    /// Recompute now, regardless of the stride.
    pub fn calc_coef(&mut self, fc: f32, q: f32) {
        match &mut self.core {
            SweepCore::Biquad(f) => f.calc_coef(fc, q),
            SweepCore::Reson(f) => f.calc_coef(fc, q),
            SweepCore::ResonLowpass(f) => f.calc_coef(fc, q),
        }
    }

    pub fn reset(&mut self, init_phase: f32) {
        self.stride.reset();
        match &mut self.core {
            SweepCore::Biquad(f) => f.reset(init_phase),
            SweepCore::Reson(f) => f.reset(init_phase),
            SweepCore::ResonLowpass(f) => f.reset(init_phase),
        }
    }

    /// Filter `x`, refreshing coefficients from `fc`/`q` when the stride is due.
    #[inline]
    pub fn sample(&mut self, x: f32, fc: f32, q: f32) -> f32 {
        if self.stride.tick() {
            self.calc_coef(fc, q);
        }
        match &mut self.core {
            SweepCore::Biquad(f) => f.sample(x),
            SweepCore::Reson(f) => f.sample(x),
            SweepCore::ResonLowpass(f) => f.sample(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48_000.0;

    fn sine(freq: f32, n: usize) -> Vec<f32> {
        (0..n).map(|i| (TAU * freq * i as f32 / SR).sin()).collect()
    }

    fn peak_after_transient(buffer: &[f32]) -> f32 {
        let skip = buffer.len() / 2;
        buffer[skip..].iter().fold(0.0f32, |acc, &x| acc.max(x.abs()))
    }

    fn run(filter: &mut impl UnitGen, input: &[f32]) -> Vec<f32> {
        input.iter().map(|&x| filter.sample(x)).collect()
    }

    #[test]
    fn one_pole_lowpass_passes_dc() {
        let mut f = OnePole::lowpass(SR, 500.0);
        let out = run(&mut f, &[1.0; 2048]);
        assert!(out[2047] > 0.99);
    }

    #[test]
    fn one_pole_highpass_blocks_dc() {
        let mut f = OnePole::highpass(SR, 500.0);
        let out = run(&mut f, &[1.0; 2048]);
        assert!(out[2047].abs() < 0.01);
    }

    #[test]
    fn biquad_lowpass_attenuates_highs() {
        let mut f = Biquad::new(SR, FilterType::LowPass);
        f.calc_coef(500.0, 0.707);
        let low = peak_after_transient(&run(&mut f, &sine(100.0, 4800)));
        f.reset(0.0);
        let high = peak_after_transient(&run(&mut f, &sine(5_000.0, 4800)));
        assert!(low > 0.9, "low {low}");
        assert!(high < 0.02, "high {high}");
    }

    #[test]
    fn biquad_highpass_attenuates_lows() {
        let mut f = Biquad::new(SR, FilterType::HighPass);
        f.calc_coef(2_000.0, 0.707);
        let low = peak_after_transient(&run(&mut f, &sine(100.0, 4800)));
        assert!(low < 0.01, "low {low}");
    }

    #[test]
    fn reson_peaks_at_center() {
        let mut f = Reson::new(SR);
        f.calc_coef(1_000.0, 10.0);
        let at = peak_after_transient(&run(&mut f, &sine(1_000.0, 9600)));
        f.reset(0.0);
        let off = peak_after_transient(&run(&mut f, &sine(4_000.0, 9600)));
        assert!((at - 1.0).abs() < 0.05, "at {at}");
        assert!(off < 0.1, "off {off}");
    }

    #[test]
    fn resonant_lowpass_peaks_with_high_q() {
        let mut f = ResonLowpass::new(SR);
        f.calc_coef(1_000.0, 5.0);
        let at = peak_after_transient(&run(&mut f, &sine(1_000.0, 9600)));
        assert!(at > 3.0, "resonance {at}");
    }

    #[test]
    fn coefficients_only_change_in_calc_coef() {
        let mut a = Biquad::new(SR, FilterType::LowPass);
        a.calc_coef(800.0, 1.0);
        let mut b = a.clone();
        let input = sine(300.0, 256);
        let out_a = run(&mut a, &input);
        // changing the type without recalculating leaves the response alone
        b.set_kind(FilterType::HighPass);
        let out_b = run(&mut b, &input);
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn fir_is_odd_and_normalized() {
        let f = FirN::lowpass(16, 2_000.0, SR);
        assert_eq!(f.order(), 17);
        let sum: f32 = f.impulse().iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);

        let mut f = FirN::lowpass(31, 1_000.0, SR);
        let out = run(&mut f, &[1.0; 64]);
        assert!((out[63] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn allpass_preserves_energy() {
        let mut f = AllPass::new(SR);
        f.calc_coef(1_000.0);
        let input = sine(1_000.0, 9600);
        let out = run(&mut f, &input);
        let peak = peak_after_transient(&out);
        assert!((peak - 1.0).abs() < 0.01, "peak {peak}");
    }

    #[test]
    fn higher_order_allpass_stays_flat() {
        for order in [3, 5] {
            let mut f = AllPass::new(SR).with_order(order);
            assert_eq!(f.order(), order);
            f.calc_coef(1_000.0);
            for freq in [200.0, 1_000.0, 5_000.0] {
                f.reset(0.0);
                let peak = peak_after_transient(&run(&mut f, &sine(freq, 9600)));
                assert!((peak - 1.0).abs() < 0.01, "order {order} at {freq}: {peak}");
            }
        }
        assert_eq!(AllPass::new(SR).with_order(4).order(), 5);
        assert_eq!(AllPass::new(SR).with_order(0).order(), 1);
        assert_eq!(AllPass::new(SR).with_order(100).order(), AllPass::MAX_ORDER);
    }

    #[test]
    fn update_stride_counts() {
        let mut stride = UpdateStride::new(4);
        let due: Vec<bool> = (0..9).map(|_| stride.tick()).collect();
        assert_eq!(
            due,
            vec![true, false, false, false, true, false, false, false, true]
        );
        stride.tick();
        stride.reset();
        assert!(stride.tick());
        assert!(UpdateStride::new(0).tick() && UpdateStride::new(1).tick());
    }

    #[test]
    fn swept_filter_respects_stride() {
        let input = sine(200.0, 64);
        let mut fast = SweptFilter::new(SR, SweepKind::LowPass, 1);
        let mut slow = SweptFilter::new(SR, SweepKind::LowPass, 64);
        fast.reset(0.0);
        slow.reset(0.0);
        // first sample sets both to 5 kHz, then the sweep only reaches `fast`
        let mut diverged = false;
        for (i, &x) in input.iter().enumerate() {
            let fc = if i == 0 { 5_000.0 } else { 100.0 };
            let a = fast.sample(x, fc, 0.707);
            let b = slow.sample(x, fc, 0.707);
            if i == 0 {
                assert_eq!(a, b);
            }
            diverged |= (a - b).abs() > 1e-4;
        }
        assert!(diverged);
    }
}
