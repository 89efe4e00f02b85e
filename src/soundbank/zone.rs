//! Sample and zone records, as an external SoundFont/DLS loader fills them in.

use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dsp::envelope::DlsParams;

/// Filter cutoffs at or above this (absolute cents, ~20 kHz) are inaudible
/// and leave the zone unfiltered.
pub const FILTER_OFF_CENTS: f32 = 13_500.0;

/// Key the hold/decay key scaling pivots on.
const KEY_SCALE_PIVOT: i32 = 60;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    NoLoop,
    Continuous,
    /// Loop while the key is held, then play out to the end of the sample.
    UntilRelease,
}

impl LoopMode {
    /// SoundFont `sampleModes` values.
    pub fn from_index(i: i32) -> Self {
        match i {
            1 => LoopMode::Continuous,
            3 => LoopMode::UntilRelease,
            _ => LoopMode::NoLoop,
        }
    }
}

/// Mono sample data at its own recording rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub rate: f32,
    pub data: Vec<f32>,
    pub loop_start: usize,
    pub loop_end: usize,
}

impl Sample {
    pub fn new(name: impl Into<String>, rate: f32, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            rate,
            data,
            loop_start: 0,
            loop_end: 0,
        }
    }

    /// Loop points are clamped to the data; an empty range disables looping.
    pub fn with_loop(mut self, start: usize, end: usize) -> Self {
        let end = end.min(self.data.len());
        self.loop_start = start.min(end);
        self.loop_end = end;
        self
    }

    pub fn has_loop(&self) -> bool {
        self.loop_end > self.loop_start
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A DLS-style envelope plus SoundFont key scaling of hold and decay.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ZoneEnv {
    pub params: DlsParams,
    /// Timecents per key away from middle C.
    pub key_to_hold: f32,
    pub key_to_decay: f32,
}

impl ZoneEnv {
    /// Envelope times for one key. Keys above 60 shorten a positively
    /// scaled stage, keys below lengthen it.
    pub fn params_for(&self, key: i32) -> DlsParams {
        let scale = |tc_per_key: f32| 2.0_f32.powf(tc_per_key * (KEY_SCALE_PIVOT - key) as f32 / 1200.0);
        let mut p = self.params;
        if self.key_to_hold != 0.0 {
            p.hold *= scale(self.key_to_hold);
        }
        if self.key_to_decay != 0.0 {
            p.decay *= scale(self.key_to_decay);
        }
        p
    }
}

/// LFO with an onset delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneLfo {
    pub delay: f32,
    pub frequency: f32,
}

impl Default for ZoneLfo {
    fn default() -> Self {
        Self {
            delay: 0.0,
            frequency: 8.176,
        }
    }
}

/// One key/velocity region of an instrument.
///
/// Pitch and filter amounts are in cents, attenuation in centibels, the
/// filter cutoff in absolute cents (0 = 8.176 Hz) and Q in centibels above
/// a flat response.
#[derive(Debug, Clone)]
pub struct Zone {
    pub key_lo: u8,
    pub key_hi: u8,
    pub vel_lo: u8,
    pub vel_hi: u8,

    pub sample: Arc<Sample>,
    pub loop_mode: LoopMode,
    pub root_key: i32,
    pub coarse_tune: i32,
    pub fine_tune: i32,
    /// Cents per key; 100 is equal temperament, 0 ignores the key.
    pub scale_tune: i32,

    pub attenuation: f32,
    pub pan: f32,

    pub vol_env: ZoneEnv,
    pub mod_env: ZoneEnv,
    pub mod_env_to_pitch: f32,
    pub mod_env_to_fc: f32,

    pub vib_lfo: ZoneLfo,
    pub vib_lfo_to_pitch: f32,
    pub mod_lfo: ZoneLfo,
    pub mod_lfo_to_pitch: f32,
    pub mod_lfo_to_fc: f32,
    pub mod_lfo_to_vol: f32,

    pub filter_fc: f32,
    pub filter_q: f32,

    /// Nonzero puts the voice in an exclusive group on its channel.
    pub exclusive_class: u16,
    /// Effects sends, 0..=1.
    pub reverb_send: f32,
    pub chorus_send: f32,
}

impl Zone {
    /// A full-range zone with neutral settings.
    pub fn new(sample: Arc<Sample>) -> Self {
        Self {
            key_lo: 0,
            key_hi: 127,
            vel_lo: 0,
            vel_hi: 127,
            sample,
            loop_mode: LoopMode::NoLoop,
            root_key: 60,
            coarse_tune: 0,
            fine_tune: 0,
            scale_tune: 100,
            attenuation: 0.0,
            pan: 0.0,
            vol_env: ZoneEnv::default(),
            mod_env: ZoneEnv::default(),
            mod_env_to_pitch: 0.0,
            mod_env_to_fc: 0.0,
            vib_lfo: ZoneLfo::default(),
            vib_lfo_to_pitch: 0.0,
            mod_lfo: ZoneLfo::default(),
            mod_lfo_to_pitch: 0.0,
            mod_lfo_to_fc: 0.0,
            mod_lfo_to_vol: 0.0,
            filter_fc: FILTER_OFF_CENTS,
            filter_q: 0.0,
            exclusive_class: 0,
            reverb_send: 0.0,
            chorus_send: 0.0,
        }
    }

    pub fn with_keys(mut self, lo: u8, hi: u8) -> Self {
        self.key_lo = lo.min(hi);
        self.key_hi = hi.max(lo);
        self
    }

    pub fn with_velocities(mut self, lo: u8, hi: u8) -> Self {
        self.vel_lo = lo.min(hi);
        self.vel_hi = hi.max(lo);
        self
    }

    pub fn with_root(mut self, key: i32) -> Self {
        self.root_key = key;
        self
    }

    pub fn matches(&self, key: i32, velocity: u8) -> bool {
        self.covers_key(key) && (self.vel_lo..=self.vel_hi).contains(&velocity)
    }

    pub fn covers_key(&self, key: i32) -> bool {
        (i32::from(self.key_lo)..=i32::from(self.key_hi)).contains(&key)
    }

    /// Pitch offset in cents for a key, before the sample-rate correction.
    pub fn key_cents(&self, key: i32) -> f32 {
        ((key - self.root_key) * self.scale_tune + self.coarse_tune * 100 + self.fine_tune) as f32
    }

    /// True when the cutoff can reach the audible range, so the filter has
    /// to run.
    pub fn needs_filter(&self) -> bool {
        let reach = self.filter_fc.min(self.filter_fc + self.mod_env_to_fc) - self.mod_lfo_to_fc.abs();
        reach < FILTER_OFF_CENTS
    }

    /// Linear filter Q from the zone's centibel setting.
    pub fn q(&self) -> f32 {
        10.0_f32.powf(self.filter_q.max(0.0) / 200.0).max(std::f32::consts::FRAC_1_SQRT_2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> Zone {
        Zone::new(Arc::new(Sample::new("s", 44_100.0, vec![0.0; 16])))
    }

    #[test]
    fn key_and_velocity_ranges() {
        let z = zone().with_keys(60, 72).with_velocities(0, 63);
        assert!(z.matches(60, 10));
        assert!(z.matches(72, 63));
        assert!(!z.matches(73, 10));
        assert!(!z.matches(65, 64));
    }

    #[test]
    fn key_cents_follow_tuning() {
        let mut z = zone().with_root(60);
        assert_eq!(z.key_cents(72), 1200.0);
        z.coarse_tune = -1;
        z.fine_tune = 25;
        assert_eq!(z.key_cents(60), -75.0);
        z.scale_tune = 0;
        assert_eq!(z.key_cents(84), -75.0);
    }

    #[test]
    fn filter_runs_only_when_reachable() {
        let mut z = zone();
        assert!(!z.needs_filter());
        z.filter_fc = 9000.0;
        assert!(z.needs_filter());
        z.filter_fc = FILTER_OFF_CENTS;
        z.mod_env_to_fc = -2400.0;
        assert!(z.needs_filter());
        z.mod_env_to_fc = 2400.0;
        assert!(!z.needs_filter());
        z.mod_lfo_to_fc = 100.0;
        assert!(z.needs_filter());
    }

    #[test]
    fn hold_scales_with_key() {
        let env = ZoneEnv {
            params: DlsParams {
                hold: 1.0,
                decay: 2.0,
                ..DlsParams::default()
            },
            key_to_hold: 100.0,
            key_to_decay: 0.0,
        };
        assert_eq!(env.params_for(60).hold, 1.0);
        assert!((env.params_for(72).hold - 0.5).abs() < 1e-6);
        assert!((env.params_for(48).hold - 2.0).abs() < 1e-6);
        assert_eq!(env.params_for(72).decay, 2.0);
    }

    #[test]
    fn loop_points_are_clamped() {
        let s = Sample::new("s", 22_050.0, vec![0.0; 10]).with_loop(4, 40);
        assert_eq!((s.loop_start, s.loop_end), (4, 10));
        assert!(s.has_loop());
        assert!(!Sample::new("t", 1.0, vec![0.0; 4]).with_loop(3, 3).has_loop());
    }
}
