use std::f32::consts::FRAC_PI_4;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dsp::{reverb::Reverb, UnitGen};

/*
Mixer
=====

    voice ─→ channel_in(ch) ─→ [vol]─[pan]─────────────────────┐
                                 │                             │
                                 └─ send[fx][ch] ─→ fx unit ─→ [recv]─[pan]─┤
                                                                           (+)─→ out()
    voice ─→ direct_in ───────────────────────────────────────────────────┘

Pan Laws
--------

pan ∈ [-1, 1], -1 = hard left.

  Linear   L = (1 - p)/2           R = (1 + p)/2
           Center is -6 dB per side; the middle sounds quieter.

  Trig     L = cos((p + 1)π/4)     R = sin((p + 1)π/4)
           Constant power: L² + R² = 1 everywhere. Center -3 dB.

  Sqrt     L = √((1 - p)/2)        R = √((1 + p)/2)
           Also constant power, with a slightly different curve.
*/

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanLaw {
    Linear,
    #[default]
    Trig,
    Sqrt,
}

impl PanLaw {
    /// Left and right gains for a pan position.
    pub fn gains(self, pan: f32) -> (f32, f32) {
        let p = pan.clamp(-1.0, 1.0);
        match self {
            PanLaw::Linear => ((1.0 - p) * 0.5, (1.0 + p) * 0.5),
            PanLaw::Trig => {
                let angle = (p + 1.0) * FRAC_PI_4;
                (angle.cos(), angle.sin())
            }
            PanLaw::Sqrt => (((1.0 - p) * 0.5).sqrt(), ((1.0 + p) * 0.5).sqrt()),
        }
    }
}

/// Mixer surface an instrument can reach through the host.
pub trait Mixer: Send {
    fn channels(&self) -> usize;
    fn fx_units(&self) -> usize;

    fn set_channel_volume(&mut self, ch: usize, volume: f32);
    fn channel_volume(&self, ch: usize) -> f32;
    fn set_channel_pan(&mut self, ch: usize, pan: f32);
    fn channel_pan(&self, ch: usize) -> f32;

    fn set_fx_send(&mut self, fx: usize, ch: usize, level: f32);
    fn fx_send(&self, fx: usize, ch: usize) -> f32;
    fn set_fx_receive(&mut self, fx: usize, level: f32);
    fn fx_receive(&self, fx: usize) -> f32;
    fn set_fx_pan(&mut self, fx: usize, pan: f32);
    fn fx_pan(&self, fx: usize) -> f32;

    fn channel_in(&mut self, ch: usize, value: f32);
    fn channel_in2(&mut self, ch: usize, left: f32, right: f32);
    fn fx_in(&mut self, fx: usize, value: f32);
    fn direct_in(&mut self, left: f32, right: f32);

    /// Mix everything received since the last call into one stereo frame.
    fn out(&mut self) -> (f32, f32);
    fn reset(&mut self);
}

#[derive(Debug, Clone)]
struct Channel {
    volume: f32,
    pan: f32,
    left: f32,
    right: f32,
    acc_l: f32,
    acc_r: f32,
}

#[derive(Debug, Clone)]
struct FxUnit {
    reverb: Reverb,
    sends: Vec<f32>,
    receive: f32,
    pan: f32,
    left: f32,
    right: f32,
    acc: f32,
}

/// Default mixer: per-channel volume and pan, reverb fx units.
#[derive(Debug, Clone)]
pub struct ChannelMixer {
    law: PanLaw,
    channels: Vec<Channel>,
    fx: Vec<FxUnit>,
    direct_l: f32,
    direct_r: f32,
}

impl ChannelMixer {
    pub fn new(sample_rate: f32, channels: usize, fx_units: usize, reverb_time: f32, law: PanLaw) -> Self {
        let (left, right) = law.gains(0.0);
        let channels = (0..channels.max(1))
            .map(|_| Channel {
                volume: 1.0,
                pan: 0.0,
                left,
                right,
                acc_l: 0.0,
                acc_r: 0.0,
            })
            .collect::<Vec<_>>();
        let n = channels.len();
        let fx = (0..fx_units)
            .map(|_| {
                let mut reverb = Reverb::new(sample_rate, reverb_time);
                reverb.set_mix(1.0);
                FxUnit {
                    reverb,
                    sends: vec![0.0; n],
                    receive: 1.0,
                    pan: 0.0,
                    left,
                    right,
                    acc: 0.0,
                }
            })
            .collect();
        Self {
            law,
            channels,
            fx,
            direct_l: 0.0,
            direct_r: 0.0,
        }
    }

    pub fn from_config(config: &crate::EngineConfig) -> Self {
        Self::new(
            config.sample_rate,
            config.mixer_channels,
            config.fx_units,
            config.reverb_time,
            config.pan_law,
        )
    }

    pub fn pan_law(&self) -> PanLaw {
        self.law
    }
}

impl Mixer for ChannelMixer {
    fn channels(&self) -> usize {
        self.channels.len()
    }

    fn fx_units(&self) -> usize {
        self.fx.len()
    }

    fn set_channel_volume(&mut self, ch: usize, volume: f32) {
        if let Some(c) = self.channels.get_mut(ch) {
            c.volume = volume;
        }
    }

    fn channel_volume(&self, ch: usize) -> f32 {
        self.channels.get(ch).map_or(0.0, |c| c.volume)
    }

    fn set_channel_pan(&mut self, ch: usize, pan: f32) {
        let law = self.law;
        if let Some(c) = self.channels.get_mut(ch) {
            c.pan = pan.clamp(-1.0, 1.0);
            (c.left, c.right) = law.gains(c.pan);
        }
    }

    fn channel_pan(&self, ch: usize) -> f32 {
        self.channels.get(ch).map_or(0.0, |c| c.pan)
    }

    fn set_fx_send(&mut self, fx: usize, ch: usize, level: f32) {
        if let Some(slot) = self.fx.get_mut(fx).and_then(|u| u.sends.get_mut(ch)) {
            *slot = level;
        }
    }

    fn fx_send(&self, fx: usize, ch: usize) -> f32 {
        self.fx
            .get(fx)
            .and_then(|u| u.sends.get(ch))
            .copied()
            .unwrap_or(0.0)
    }

    fn set_fx_receive(&mut self, fx: usize, level: f32) {
        if let Some(u) = self.fx.get_mut(fx) {
            u.receive = level;
        }
    }

    fn fx_receive(&self, fx: usize) -> f32 {
        self.fx.get(fx).map_or(0.0, |u| u.receive)
    }

    fn set_fx_pan(&mut self, fx: usize, pan: f32) {
        let law = self.law;
        if let Some(u) = self.fx.get_mut(fx) {
            u.pan = pan.clamp(-1.0, 1.0);
            (u.left, u.right) = law.gains(u.pan);
        }
    }

    fn fx_pan(&self, fx: usize) -> f32 {
        self.fx.get(fx).map_or(0.0, |u| u.pan)
    }

    #[inline]
    fn channel_in(&mut self, ch: usize, value: f32) {
        let Some(c) = self.channels.get_mut(ch) else {
            return;
        };
        let v = value * c.volume;
        c.acc_l += v * c.left;
        c.acc_r += v * c.right;
        for u in &mut self.fx {
            u.acc += v * u.sends[ch];
        }
    }

    #[inline]
    fn channel_in2(&mut self, ch: usize, left: f32, right: f32) {
        let Some(c) = self.channels.get_mut(ch) else {
            return;
        };
        c.acc_l += left * c.volume;
        c.acc_r += right * c.volume;
        let mono = (left + right) * 0.5 * c.volume;
        for u in &mut self.fx {
            u.acc += mono * u.sends[ch];
        }
    }

    #[inline]
    fn fx_in(&mut self, fx: usize, value: f32) {
        if let Some(u) = self.fx.get_mut(fx) {
            u.acc += value;
        }
    }

    #[inline]
    fn direct_in(&mut self, left: f32, right: f32) {
        self.direct_l += left;
        self.direct_r += right;
    }

    fn out(&mut self) -> (f32, f32) {
        let mut left = self.direct_l;
        let mut right = self.direct_r;
        self.direct_l = 0.0;
        self.direct_r = 0.0;

        for c in &mut self.channels {
            left += c.acc_l;
            right += c.acc_r;
            c.acc_l = 0.0;
            c.acc_r = 0.0;
        }
        for u in &mut self.fx {
            let wet = u.reverb.sample(u.acc) * u.receive;
            u.acc = 0.0;
            left += wet * u.left;
            right += wet * u.right;
        }
        (left, right)
    }

    fn reset(&mut self) {
        for c in &mut self.channels {
            c.acc_l = 0.0;
            c.acc_r = 0.0;
        }
        for u in &mut self.fx {
            u.acc = 0.0;
            u.reverb.reset(0.0);
        }
        self.direct_l = 0.0;
        self.direct_r = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_power_laws() {
        for law in [PanLaw::Trig, PanLaw::Sqrt] {
            for p in [-1.0, -0.3, 0.0, 0.6, 1.0] {
                let (l, r) = law.gains(p);
                assert!((l * l + r * r - 1.0).abs() < 1e-5, "{law:?} {p}");
            }
        }
        let (l, r) = PanLaw::Linear.gains(0.0);
        assert_eq!((l, r), (0.5, 0.5));
        let (l, r) = PanLaw::Trig.gains(-1.0);
        assert!((l - 1.0).abs() < 1e-6 && r.abs() < 1e-6);
    }

    #[test]
    fn channel_volume_and_pan() {
        let mut mixer = ChannelMixer::new(48_000.0, 2, 0, 1.0, PanLaw::Linear);
        mixer.set_channel_volume(1, 0.5);
        mixer.set_channel_pan(1, 1.0);
        mixer.channel_in(1, 1.0);
        mixer.channel_in(0, 1.0);
        let (l, r) = mixer.out();
        assert!((l - 0.5).abs() < 1e-6);
        assert!((r - 1.0).abs() < 1e-6);
        // accumulators are cleared
        assert_eq!(mixer.out(), (0.0, 0.0));
    }

    #[test]
    fn fx_send_reaches_reverb() {
        let mut mixer = ChannelMixer::new(48_000.0, 1, 1, 1.0, PanLaw::Trig);
        mixer.set_channel_volume(0, 0.0);
        mixer.set_fx_send(0, 0, 1.0);
        // volume 0 also silences the post-fader send
        mixer.channel_in(0, 1.0);
        assert_eq!(mixer.out(), (0.0, 0.0));

        mixer.set_channel_volume(0, 1.0);
        mixer.channel_in(0, 1.0);
        let mut tail = 0.0f32;
        for _ in 0..4800 {
            let (l, r) = mixer.out();
            tail = tail.max(l.abs() + r.abs());
        }
        assert!(tail > 0.0);
    }

    #[test]
    fn direct_bypasses_channels() {
        let mut mixer = ChannelMixer::new(48_000.0, 1, 0, 1.0, PanLaw::Trig);
        mixer.set_channel_volume(0, 0.0);
        mixer.direct_in(0.25, -0.25);
        assert_eq!(mixer.out(), (0.25, -0.25));
    }

    #[test]
    fn out_of_range_channels_are_ignored() {
        let mut mixer = ChannelMixer::new(48_000.0, 2, 1, 1.0, PanLaw::Trig);
        mixer.channel_in(7, 1.0);
        mixer.set_channel_volume(7, 0.1);
        assert_eq!(mixer.channel_volume(7), 0.0);
        assert_eq!(mixer.fx_send(3, 0), 0.0);
        assert_eq!(mixer.out(), (0.0, 0.0));
    }
}
