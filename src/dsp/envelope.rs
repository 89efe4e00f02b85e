#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    dsp::{duration_samples, UnitGen},
    error::LoadError,
    patch::Element,
};

/*
Segment Envelopes
=================

An envelope is a start level followed by a list of segments. Each segment
ramps from wherever the previous one ended to its own target level.

Vocabulary
----------

  segment     (rate, level, curve, fixed). One ramp of the envelope.

  rate        Seconds. If `fixed`, the segment lasts exactly `rate` seconds.
              Otherwise `rate` is the time a full 0 → 1 swing would take,
              and the actual duration is scaled by the distance travelled:

                  samples = rate * sample_rate * |end - start|

              A release segment with rate 0.5 s therefore takes 0.5 s from
              full level but only 0.1 s from level 0.2, so the slope (and the
              per-sample increment) is the same no matter where it starts.

  sustain     Optional segment index. When that segment reaches its target
              the envelope holds there until release().

  release()   Jump straight to the segment after `sustain`, starting from
              the CURRENT level. Works mid-attack, mid-decay, or while
              holding. An envelope without a sustain segment ignores it and
              just runs to the end.


The Curves
----------

Each curve maps progress t ∈ [0, 1] to a shaped fraction s ∈ [0, 1], and
the level is start + (end - start) * s. Every curve hits s(0) = 0 and
s(1) = 1 exactly, so segment boundaries never jump.

  Linear        s = t

  Exponential   g(t) = (e^(kt) - 1) / (e^k - 1), convex
                rising:   s = g(t)           slow start, fast finish
                falling:  s = 1 - g(1 - t)   fast drop, long tail

  Log           The mirror image of Exponential:
                rising:   s = 1 - g(1 - t)   fast rise, gentle approach
                falling:  s = g(t)

  Squared       s = t²


    rising                            falling
  1 ┤        exp ╱  ╭── log       1 ┤─╮  ╲
    │          ╱  ╱                 │  ╲   ╲
    │        ╱  ╱                   │   ╲    ╲
    │      ╱ ╱                      │    ╰╮ log╲
    │   ╱╱╱                         │  exp ╰─────╲──
  0 ┼─╯──────────→ t              0 ┼───────────────→ t


Output Timing
-------------

A segment of n samples outputs s(1/n), s(2/n), … s(n/n): the first sample
after start has already moved one step, and the last sample of the segment
is exactly the target level.
*/

const CURVE_K: f32 = 5.0;
pub const MAX_SEGMENTS: usize = 7;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Curve {
    #[default]
    Linear,
    Exponential,
    Log,
    Squared,
}

impl Curve {
    pub fn from_index(index: i32) -> Self {
        match index {
            1 => Curve::Exponential,
            2 => Curve::Log,
            3 => Curve::Squared,
            _ => Curve::Linear,
        }
    }

    pub fn index(self) -> i32 {
        match self {
            Curve::Linear => 0,
            Curve::Exponential => 1,
            Curve::Log => 2,
            Curve::Squared => 3,
        }
    }

    /// Level at progress `t` (0..=1) of a ramp from `start` to `end`.
    #[inline]
    pub fn interpolate(self, start: f32, end: f32, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        let rising = end >= start;
        let s = match self {
            Curve::Linear => t,
            Curve::Squared => t * t,
            Curve::Exponential if rising => convex(t),
            Curve::Exponential => 1.0 - convex(1.0 - t),
            Curve::Log if rising => 1.0 - convex(1.0 - t),
            Curve::Log => convex(t),
        };
        start + (end - start) * s
    }
}

#[inline]
fn convex(t: f32) -> f32 {
    (CURVE_K * t).exp_m1() / CURVE_K.exp_m1()
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub rate: f32,
    pub level: f32,
    pub curve: Curve,
    pub fixed: bool,
}

impl Segment {
    pub fn new(rate: f32, level: f32) -> Self {
        Self {
            rate,
            level,
            curve: Curve::Linear,
            fixed: false,
        }
    }

    pub fn fixed(rate: f32, level: f32) -> Self {
        Self {
            fixed: true,
            ..Self::new(rate, level)
        }
    }

    pub fn with_curve(mut self, curve: Curve) -> Self {
        self.curve = curve;
        self
    }

    /// Duration in samples when ramping from `from`.
    pub fn samples_from(&self, from: f32, sample_rate: f32) -> u32 {
        if self.fixed {
            duration_samples(self.rate, sample_rate)
        } else {
            let distance = (self.level - from).abs();
            if distance <= f32::EPSILON {
                1
            } else {
                duration_samples(self.rate * distance, sample_rate)
            }
        }
    }
}

/// Envelope configuration: start level, segments, optional sustain index.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct EnvDef {
    pub start: f32,
    pub segments: Vec<Segment>,
    pub sustain: Option<usize>,
}

impl Default for EnvDef {
    fn default() -> Self {
        Self::adsr(0.01, 0.1, 0.8, 0.2)
    }
}

impl EnvDef {
    /// Attack to `peak`, hold, release to zero.
    pub fn ar(attack: f32, peak: f32, release: f32) -> Self {
        Self {
            start: 0.0,
            segments: vec![Segment::fixed(attack, peak), Segment::fixed(release, 0.0)],
            sustain: Some(0),
        }
    }

    /// Attack to 1, decay to `sustain`, hold, release to zero.
    pub fn adsr(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        let sustain = sustain.clamp(0.0, 1.0);
        Self {
            start: 0.0,
            segments: vec![
                Segment::new(attack, 1.0),
                Segment::new(decay, sustain),
                Segment::new(release, 0.0),
            ],
            sustain: Some(1),
        }
    }

    /// Apply one curve to every segment.
    pub fn with_curve(mut self, curve: Curve) -> Self {
        for seg in &mut self.segments {
            seg.curve = curve;
        }
        self
    }

    /// Highest level any segment reaches.
    pub fn peak(&self) -> f32 {
        self.segments
            .iter()
            .map(|s| s.level)
            .fold(self.start, f32::max)
    }

    pub fn field(&self, field: EnvField) -> f32 {
        match field {
            EnvField::Start => self.start,
            EnvField::Sustain => self.sustain.map_or(-1.0, |s| s as f32),
            EnvField::Rate(i) => self.segments.get(i).map_or(0.0, |s| s.rate),
            EnvField::Level(i) => self.segments.get(i).map_or(0.0, |s| s.level),
            EnvField::Curve(i) => self.segments.get(i).map_or(0.0, |s| s.curve.index() as f32),
            EnvField::Fixed(i) => self
                .segments
                .get(i)
                .map_or(0.0, |s| if s.fixed { 1.0 } else { 0.0 }),
        }
    }

    /// Set a field, growing the segment list when a later segment is addressed.
    pub fn set_field(&mut self, field: EnvField, value: f32) {
        let seg = match field {
            EnvField::Start => {
                self.start = value;
                return;
            }
            EnvField::Sustain => {
                self.sustain = (value >= 0.0).then_some(value as usize);
                return;
            }
            EnvField::Rate(i) | EnvField::Level(i) | EnvField::Curve(i) | EnvField::Fixed(i) => i,
        };
        if seg >= MAX_SEGMENTS {
            return;
        }
        while self.segments.len() <= seg {
            self.segments.push(Segment::new(0.0, 0.0));
        }
        let s = &mut self.segments[seg];
        match field {
            EnvField::Rate(_) => s.rate = value.max(0.0),
            EnvField::Level(_) => s.level = value,
            EnvField::Curve(_) => s.curve = Curve::from_index(value as i32),
            EnvField::Fixed(_) => s.fixed = value != 0.0,
            _ => {}
        }
    }

    pub fn load(el: &Element) -> Result<Self, LoadError> {
        let start = el.get_or("st", 0.0)?;
        let sus: i32 = el.get_or("sus", -1)?;
        let mut segments = Vec::new();
        for seg in el.children_named("seg").take(MAX_SEGMENTS) {
            segments.push(Segment {
                rate: seg.get_or("rt", 0.0)?,
                level: seg.get_or("lvl", 0.0)?,
                curve: Curve::from_index(seg.get_or("ty", 0)?),
                fixed: seg.get_bool("fix", false)?,
            });
        }
        let sustain = usize::try_from(sus).ok().filter(|&s| s < segments.len());
        Ok(Self {
            start,
            segments,
            sustain,
        })
    }

    pub fn save(&self, el: &mut Element) {
        el.set_attr("st", self.start);
        el.set_attr("sus", self.sustain.map_or(-1, |s| s as i32));
        for seg in &self.segments {
            let child = el.add_child(Element::new("seg"));
            child
                .set_attr("rt", seg.rate)
                .set_attr("lvl", seg.level)
                .set_attr("ty", seg.curve.index());
            child.set_bool("fix", seg.fixed);
        }
    }
}

/// One addressable envelope setting.
///
/// Packed into 5 bits as `segment << 2 | field` (rate 0, level 1, curve 2,
/// fixed 3) for segments 0..=6; 28 is the start level and 29 the sustain
/// index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvField {
    Start,
    Sustain,
    Rate(usize),
    Level(usize),
    Curve(usize),
    Fixed(usize),
}

impl EnvField {
    pub const START_CODE: u16 = 28;
    pub const SUSTAIN_CODE: u16 = 29;

    pub fn code(self) -> u16 {
        match self {
            EnvField::Start => Self::START_CODE,
            EnvField::Sustain => Self::SUSTAIN_CODE,
            EnvField::Rate(s) => (s as u16) << 2,
            EnvField::Level(s) => (s as u16) << 2 | 1,
            EnvField::Curve(s) => (s as u16) << 2 | 2,
            EnvField::Fixed(s) => (s as u16) << 2 | 3,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            Self::START_CODE => Some(EnvField::Start),
            Self::SUSTAIN_CODE => Some(EnvField::Sustain),
            c if c < 28 => {
                let seg = (c >> 2) as usize;
                Some(match c & 3 {
                    0 => EnvField::Rate(seg),
                    1 => EnvField::Level(seg),
                    2 => EnvField::Curve(seg),
                    _ => EnvField::Fixed(seg),
                })
            }
            _ => None,
        }
    }

    /// Name suffix: `st`, `sus`, or `s{n}.{rt|lvl|ty|fix}`.
    pub fn name(self) -> String {
        match self {
            EnvField::Start => "st".to_string(),
            EnvField::Sustain => "sus".to_string(),
            EnvField::Rate(s) => format!("s{s}.rt"),
            EnvField::Level(s) => format!("s{s}.lvl"),
            EnvField::Curve(s) => format!("s{s}.ty"),
            EnvField::Fixed(s) => format!("s{s}.fix"),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "st" => return Some(EnvField::Start),
            "sus" => return Some(EnvField::Sustain),
            _ => {}
        }
        let rest = name.strip_prefix('s')?;
        let (seg, field) = rest.split_once('.')?;
        let seg: usize = seg.parse().ok()?;
        if seg >= MAX_SEGMENTS {
            return None;
        }
        match field {
            "rt" => Some(EnvField::Rate(seg)),
            "lvl" => Some(EnvField::Level(seg)),
            "ty" => Some(EnvField::Curve(seg)),
            "fix" => Some(EnvField::Fixed(seg)),
            _ => None,
        }
    }

    /// Every addressable field of a definition with `segments` segments.
    pub fn all(segments: usize) -> impl Iterator<Item = EnvField> {
        let segs = segments.min(MAX_SEGMENTS);
        [EnvField::Start, EnvField::Sustain].into_iter().chain(
            (0..segs).flat_map(|s| {
                [
                    EnvField::Rate(s),
                    EnvField::Level(s),
                    EnvField::Curve(s),
                    EnvField::Fixed(s),
                ]
            }),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Holding,
    FastRelease,
    Finished,
}

/// N-segment envelope generator with optional sustain.
#[derive(Debug, Clone)]
pub struct SegmentEnv {
    def: EnvDef,
    sample_rate: f32,
    phase: Phase,
    seg: usize,
    level: f32,
    from: f32,
    to: f32,
    curve: Curve,
    count: u32,
    total: u32,
}

impl SegmentEnv {
    pub fn new(def: EnvDef, sample_rate: f32) -> Self {
        let level = def.start;
        Self {
            def,
            sample_rate,
            phase: Phase::Idle,
            seg: 0,
            level,
            from: level,
            to: level,
            curve: Curve::Linear,
            count: 0,
            total: 1,
        }
    }

    pub fn def(&self) -> &EnvDef {
        &self.def
    }

    /// Edits take effect on the next `reset`.
    pub fn def_mut(&mut self) -> &mut EnvDef {
        &mut self.def
    }

    pub fn set_def(&mut self, def: EnvDef) {
        self.def = def;
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn segment(&self) -> usize {
        self.seg
    }

    pub fn is_holding(&self) -> bool {
        self.phase == Phase::Holding
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Leave the sustain hold (or skip past it) and run the release segments.
    pub fn release(&mut self) {
        let Some(sus) = self.def.sustain else {
            return;
        };
        match self.phase {
            Phase::Running | Phase::Holding if self.seg <= sus => self.begin(sus + 1),
            Phase::Idle => self.phase = Phase::Finished,
            _ => {}
        }
    }

    /// Ramp linearly to zero over `seconds`, ignoring the configured release.
    pub fn fast_release(&mut self, seconds: f32) {
        if matches!(self.phase, Phase::Finished) {
            return;
        }
        self.phase = Phase::FastRelease;
        self.from = self.level;
        self.to = 0.0;
        self.curve = Curve::Linear;
        self.count = 0;
        self.total = duration_samples(seconds, self.sample_rate);
    }

    fn begin(&mut self, seg: usize) {
        self.seg = seg;
        match self.def.segments.get(seg) {
            None => {
                self.phase = Phase::Finished;
            }
            Some(s) => {
                self.phase = Phase::Running;
                self.from = self.level;
                self.to = s.level;
                self.curve = s.curve;
                self.count = 0;
                self.total = s.samples_from(self.level, self.sample_rate);
            }
        }
    }

    fn segment_done(&mut self) {
        match self.phase {
            Phase::FastRelease => self.phase = Phase::Finished,
            _ if self.def.sustain == Some(self.seg) => self.phase = Phase::Holding,
            _ => self.begin(self.seg + 1),
        }
    }
}

impl UnitGen for SegmentEnv {
    fn reset(&mut self, init_phase: f32) {
        if init_phase >= 0.0 {
            self.level = self.def.start;
            self.begin(0);
        } else if self.phase == Phase::Running {
            // keep position, refit the remaining duration
            if let Some(s) = self.def.segments.get(self.seg) {
                let progress = self.count as f32 / self.total as f32;
                self.to = s.level;
                self.curve = s.curve;
                self.total = s.samples_from(self.from, self.sample_rate);
                self.count = (progress * self.total as f32) as u32;
            }
        }
    }

    #[inline]
    fn next_sample(&mut self) -> f32 {
        if matches!(self.phase, Phase::Running | Phase::FastRelease) {
            self.count += 1;
            if self.count >= self.total {
                self.level = self.to;
                self.segment_done();
            } else {
                let t = self.count as f32 / self.total as f32;
                self.level = self.curve.interpolate(self.from, self.to, t);
            }
        }
        self.level
    }
}

/*
DLS / SoundFont Envelope
========================

The sample players use the envelope shape defined by DLS and SoundFont 2:

    ┌delay┬attack┬hold┬──decay──┬──sustain──┬──release──┐
    0     0 → 1   1    1 → S      S           S → 0

Attack is linear in amplitude. Decay and release are linear in DECIBELS:
the times given are the time to fall the full 96 dB range, so a decay to a
sustain level of -24 dB takes a quarter of the decay time. Falling linearly
in dB is a constant multiplier per sample:

    mult = 10^(-96 / (20 * time * sample_rate))

The envelope is finished once release crosses -96 dB.
*/

const DLS_FLOOR: f32 = 1.584_893_2e-5; // -96 dB
const DLS_RANGE_DB: f32 = 96.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DlsStage {
    Idle,
    Delay,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
    Finished,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DlsParams {
    pub delay: f32,
    pub attack: f32,
    pub hold: f32,
    pub decay: f32,
    /// Sustain as an amplitude fraction (0..=1).
    pub sustain: f32,
    pub release: f32,
}

impl Default for DlsParams {
    fn default() -> Self {
        Self {
            delay: 0.0,
            attack: 0.0,
            hold: 0.0,
            decay: 0.0,
            sustain: 1.0,
            release: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DlsEnv {
    params: DlsParams,
    sample_rate: f32,
    stage: DlsStage,
    level: f32,
    count: u32,
    attack_step: f32,
    decay_mult: f32,
    release_mult: f32,
}

impl DlsEnv {
    pub fn new(params: DlsParams, sample_rate: f32) -> Self {
        Self {
            params,
            sample_rate,
            stage: DlsStage::Idle,
            level: 0.0,
            count: 0,
            attack_step: 1.0,
            decay_mult: 1.0,
            release_mult: 1.0,
        }
    }

    pub fn params(&self) -> &DlsParams {
        &self.params
    }

    pub fn set_params(&mut self, params: DlsParams) {
        self.params = params;
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_finished(&self) -> bool {
        self.stage == DlsStage::Finished
    }

    pub fn is_releasing(&self) -> bool {
        self.stage == DlsStage::Release
    }

    fn db_mult(&self, seconds: f32) -> f32 {
        let samples = duration_samples(seconds, self.sample_rate) as f32;
        10.0_f32.powf(-DLS_RANGE_DB / (20.0 * samples))
    }

    pub fn release(&mut self) {
        if matches!(self.stage, DlsStage::Finished | DlsStage::Release) {
            return;
        }
        if self.level <= DLS_FLOOR {
            self.level = 0.0;
            self.stage = DlsStage::Finished;
            return;
        }
        self.release_mult = self.db_mult(self.params.release);
        self.stage = DlsStage::Release;
    }

    /// Release over `seconds` (full range), regardless of the configured time.
    pub fn fast_release(&mut self, seconds: f32) {
        if self.stage == DlsStage::Finished {
            return;
        }
        self.release();
        if self.stage == DlsStage::Release {
            self.release_mult = self.db_mult(seconds);
        }
    }

    fn enter(&mut self, stage: DlsStage) {
        self.stage = stage;
        self.count = 0;
        match stage {
            DlsStage::Delay if self.params.delay <= 0.0 => self.enter(DlsStage::Attack),
            DlsStage::Delay => self.count = duration_samples(self.params.delay, self.sample_rate),
            DlsStage::Attack if self.params.attack <= 0.0 => {
                self.level = 1.0;
                self.enter(DlsStage::Hold);
            }
            DlsStage::Attack => {
                self.count = duration_samples(self.params.attack, self.sample_rate);
                self.attack_step = 1.0 / self.count as f32;
            }
            DlsStage::Hold if self.params.hold <= 0.0 => self.enter(DlsStage::Decay),
            DlsStage::Hold => self.count = duration_samples(self.params.hold, self.sample_rate),
            DlsStage::Decay => {
                if self.level <= self.params.sustain {
                    self.level = self.params.sustain;
                    self.stage = DlsStage::Sustain;
                } else if self.params.decay <= 0.0 {
                    self.level = self.params.sustain;
                    self.stage = DlsStage::Sustain;
                } else {
                    self.decay_mult = self.db_mult(self.params.decay);
                }
            }
            _ => {}
        }
    }
}

impl UnitGen for DlsEnv {
    fn reset(&mut self, init_phase: f32) {
        if init_phase >= 0.0 {
            self.level = 0.0;
            self.enter(DlsStage::Delay);
        } else if self.stage == DlsStage::Decay {
            self.decay_mult = self.db_mult(self.params.decay);
        }
    }

    #[inline]
    fn next_sample(&mut self) -> f32 {
        match self.stage {
            DlsStage::Idle | DlsStage::Finished | DlsStage::Sustain => {}
            DlsStage::Delay => {
                self.count = self.count.saturating_sub(1);
                if self.count == 0 {
                    self.enter(DlsStage::Attack);
                }
            }
            DlsStage::Attack => {
                self.level = (self.level + self.attack_step).min(1.0);
                self.count = self.count.saturating_sub(1);
                if self.count == 0 {
                    self.level = 1.0;
                    self.enter(DlsStage::Hold);
                }
            }
            DlsStage::Hold => {
                self.count = self.count.saturating_sub(1);
                if self.count == 0 {
                    self.enter(DlsStage::Decay);
                }
            }
            DlsStage::Decay => {
                self.level *= self.decay_mult;
                if self.level <= self.params.sustain {
                    self.level = self.params.sustain;
                    self.stage = DlsStage::Sustain;
                }
            }
            DlsStage::Release => {
                self.level *= self.release_mult;
                if self.level <= DLS_FLOOR {
                    self.level = 0.0;
                    self.stage = DlsStage::Finished;
                }
            }
        }
        self.level
    }
}
