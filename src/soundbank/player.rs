use std::sync::Arc;

use crate::{
    dsp::{
        context::SynthContext,
        envelope::DlsEnv,
        filter::{SweepKind, SweptFilter},
        oscillator::WaveOsc,
        wavetable::WT_SIN,
        UnitGen,
    },
    synth::mixer::PanLaw,
};

use super::{
    zone::{LoopMode, Zone, ZoneLfo},
    SbInstrument,
};

/*
Zone Playback
=============

Per zone, per tick:

    cents = key/tuning cents + rate correction          (fixed at start)
          + wheel + vibLFO·vibDepth + modLFO·lfoPitch + modEnv·envPitch
    step  = cents_mult(cents)                 one table lookup per tick
    x     = sample[pos] (linear interpolation), pos += step
    x     = lowpass(x, fc + modEnv·envFc + modLFO·lfoFc)   only if reachable
    gain  = cents_mult(-(atten + modLFO·lfoVol) · CB_TO_CENTS) · volEnv
    out   = pan(x · gain · velocity)

Centibels to cents: an attenuation of A cB is a gain of 10^(-A/200), which is
2^(c/1200) for c = -A · 1200 · log2(10) / 200 ≈ -19.93 · A.

Looping follows the zone's mode; a sample that plays off its end finishes
the zone regardless of the envelope.
*/

const CB_TO_CENTS: f32 = 19.931_568;
const FILTER_STRIDE: u32 = 16;
const FAST_RELEASE: f32 = 0.01;

/// Sine LFO that stays at zero for its onset delay.
#[derive(Debug, Clone)]
struct DelayedLfo {
    osc: WaveOsc,
    delay: u32,
    wait: u32,
}

impl DelayedLfo {
    fn new(ctx: &Arc<SynthContext>, lfo: ZoneLfo) -> Self {
        let mut osc = WaveOsc::interpolated(ctx.clone())
            .with_wavetable(WT_SIN)
            .with_frequency(lfo.frequency);
        osc.reset(0.0);
        let delay = ctx.params.samples(lfo.delay);
        Self {
            osc,
            delay,
            wait: delay,
        }
    }

    #[inline]
    fn next(&mut self) -> f32 {
        if self.wait > 0 {
            self.wait -= 1;
            0.0
        } else {
            self.osc.next_sample()
        }
    }
}

/// Playing state of one zone.
#[derive(Debug, Clone)]
struct ZoneVoice {
    zone: Arc<Zone>,
    base_cents: f32,
    pos: f64,
    released: bool,
    ended: bool,
    vol_env: DlsEnv,
    mod_env: DlsEnv,
    vib: DelayedLfo,
    lfo: DelayedLfo,
    filter: Option<SweptFilter>,
    q: f32,
    left: f32,
    right: f32,
}

impl ZoneVoice {
    fn new(ctx: &Arc<SynthContext>, zone: Arc<Zone>, key: i32) -> Self {
        let sr = ctx.params.sample_rate;
        let mut vol_env = DlsEnv::new(zone.vol_env.params_for(key), sr);
        vol_env.reset(0.0);
        let mut mod_env = DlsEnv::new(zone.mod_env.params_for(key), sr);
        mod_env.reset(0.0);
        let filter = zone.needs_filter().then(|| {
            let mut f = SweptFilter::new(sr, SweepKind::LowPass, FILTER_STRIDE);
            f.reset(0.0);
            f
        });
        let (left, right) = PanLaw::Trig.gains(zone.pan);
        Self {
            base_cents: base_cents(ctx, &zone, key),
            pos: 0.0,
            released: false,
            ended: zone.sample.is_empty(),
            vib: DelayedLfo::new(ctx, zone.vib_lfo),
            lfo: DelayedLfo::new(ctx, zone.mod_lfo),
            q: zone.q(),
            filter,
            vol_env,
            mod_env,
            left,
            right,
            zone,
        }
    }

    fn release(&mut self) {
        self.released = true;
        self.vol_env.release();
        self.mod_env.release();
    }

    fn is_finished(&self) -> bool {
        self.ended || self.vol_env.is_finished()
    }

    fn looping(&self) -> bool {
        self.zone.sample.has_loop()
            && match self.zone.loop_mode {
                LoopMode::NoLoop => false,
                LoopMode::Continuous => true,
                LoopMode::UntilRelease => !self.released,
            }
    }

    #[inline]
    fn read(&mut self, step: f32) -> f32 {
        if self.ended {
            return 0.0;
        }
        let sample = &self.zone.sample;
        let looping = self.looping();
        let i = self.pos as usize;
        let frac = (self.pos - i as f64) as f32;
        let a = sample.data.get(i).copied().unwrap_or(0.0);
        let next = if looping && i + 1 >= sample.loop_end {
            sample.loop_start
        } else {
            i + 1
        };
        let b = sample.data.get(next).copied().unwrap_or(0.0);
        let out = a + (b - a) * frac;

        self.pos += f64::from(step);
        if looping {
            let (start, end) = (sample.loop_start as f64, sample.loop_end as f64);
            while self.pos >= end {
                self.pos -= end - start;
            }
        } else if self.pos >= sample.len() as f64 {
            self.ended = true;
        }
        out
    }

    /// One stereo frame, before velocity scaling.
    #[inline]
    fn tick(&mut self, ctx: &SynthContext, wheel_cents: f32) -> (f32, f32) {
        if self.is_finished() {
            return (0.0, 0.0);
        }
        let z = &*self.zone;
        let vib = self.vib.next();
        let lfo = self.lfo.next();
        let env = self.mod_env.next_sample();

        let cents =
            self.base_cents + wheel_cents + vib * z.vib_lfo_to_pitch + lfo * z.mod_lfo_to_pitch + env * z.mod_env_to_pitch;
        let step = ctx.params.cents_mult(cents);
        let fc_cents = z.filter_fc + env * z.mod_env_to_fc + lfo * z.mod_lfo_to_fc;
        let atten = z.attenuation + lfo * z.mod_lfo_to_vol;

        let mut x = self.read(step);
        if let Some(f) = self.filter.as_mut() {
            let fc = ctx.params.abs_cents_frequency(fc_cents).min(ctx.params.nyquist * 0.9);
            x = f.sample(x, fc, self.q);
        }
        let gain = if atten == 0.0 {
            1.0
        } else {
            ctx.params.cents_mult(-atten * CB_TO_CENTS)
        };
        let y = x * gain * self.vol_env.next_sample();
        (y * self.left, y * self.right)
    }
}

fn base_cents(ctx: &SynthContext, zone: &Zone, key: i32) -> f32 {
    let rate = zone.sample.rate.max(1.0) / ctx.params.sample_rate;
    zone.key_cents(key) + 1200.0 * rate.log2()
}

/// The zones one note is playing.
#[derive(Debug, Clone)]
pub struct ZonePlayer {
    ctx: Arc<SynthContext>,
    voices: Vec<ZoneVoice>,
    key: i32,
    velocity: u8,
    reverb: f32,
}

impl ZonePlayer {
    pub fn new(ctx: Arc<SynthContext>) -> Self {
        Self {
            ctx,
            voices: Vec::with_capacity(2),
            key: 60,
            velocity: 127,
            reverb: 0.0,
        }
    }

    /// Build the zone list for a key and velocity. Returns how many zones
    /// matched; zero means the note will be silent.
    pub fn start(&mut self, instrument: &SbInstrument, key: i32, velocity: u8) -> usize {
        self.voices.clear();
        self.key = key;
        self.velocity = velocity;
        for zone in instrument.zones_for(key, velocity) {
            self.voices.push(ZoneVoice::new(&self.ctx, Arc::clone(zone), key));
        }
        self.reverb = self.voices.iter().map(|v| v.zone.reverb_send).fold(0.0, f32::max);
        self.voices.len()
    }

    /// Drop every zone; the player is silent and finished.
    pub fn clear(&mut self) {
        self.voices.clear();
        self.reverb = 0.0;
    }

    /// Every playing zone still covers `key`.
    pub fn covers(&self, key: i32) -> bool {
        !self.voices.is_empty() && self.voices.iter().all(|v| v.zone.matches(key, self.velocity))
    }

    /// Move every zone to a new key without restarting it.
    pub fn retune(&mut self, key: i32) {
        self.key = key;
        for v in &mut self.voices {
            v.base_cents = base_cents(&self.ctx, &v.zone, key);
        }
    }

    pub fn key(&self) -> i32 {
        self.key
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn zone_count(&self) -> usize {
        self.voices.len()
    }

    /// Nonzero exclusive classes of the playing zones.
    pub fn exclusive_classes(&self) -> impl Iterator<Item = u16> + '_ {
        self.voices.iter().map(|v| v.zone.exclusive_class).filter(|&c| c != 0)
    }

    /// Reverb send level (largest of the zones).
    pub fn reverb_send(&self) -> f32 {
        self.reverb
    }

    pub fn release(&mut self) {
        self.voices.iter_mut().for_each(ZoneVoice::release);
    }

    pub fn fast_release(&mut self) {
        for v in &mut self.voices {
            v.released = true;
            v.vol_env.fast_release(FAST_RELEASE);
            v.mod_env.release();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.voices.iter().all(ZoneVoice::is_finished)
    }

    #[inline]
    pub fn tick(&mut self, wheel_cents: f32) -> (f32, f32) {
        let ctx = &*self.ctx;
        let mut frame = (0.0, 0.0);
        for v in &mut self.voices {
            let (l, r) = v.tick(ctx, wheel_cents);
            frame.0 += l;
            frame.1 += r;
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dsp::envelope::DlsParams, soundbank::Sample};

    fn ctx() -> Arc<SynthContext> {
        Arc::new(SynthContext::with_options(8000.0, 1024, false))
    }

    fn ramp_instrument(mode: LoopMode) -> SbInstrument {
        let data: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        let sample = Arc::new(Sample::new("ramp", 8000.0, data).with_loop(50, 100));
        let mut zone = Zone::new(sample).with_root(60);
        zone.loop_mode = mode;
        zone.vol_env.params = DlsParams {
            release: 0.05,
            ..DlsParams::default()
        };
        SbInstrument::new("ramp", 0, 0).with_zone(zone)
    }

    fn left(p: &mut ZonePlayer, n: usize) -> Vec<f32> {
        (0..n).map(|_| p.tick(0.0).0).collect()
    }

    #[test]
    fn root_key_plays_at_sample_rate() {
        let mut p = ZonePlayer::new(ctx());
        assert_eq!(p.start(&ramp_instrument(LoopMode::NoLoop), 60, 100), 1);
        let out = left(&mut p, 4);
        let g = PanLaw::Trig.gains(0.0).0;
        for (k, v) in out.iter().enumerate() {
            assert!((v - k as f32 / 100.0 * g).abs() < 1e-4, "{k}: {v}");
        }
    }

    #[test]
    fn octave_up_doubles_speed() {
        let mut p = ZonePlayer::new(ctx());
        p.start(&ramp_instrument(LoopMode::NoLoop), 72, 100);
        let out = left(&mut p, 3);
        let g = PanLaw::Trig.gains(0.0).0;
        assert!((out[2] - 0.04 * g).abs() < 1e-3, "{}", out[2]);
    }

    #[test]
    fn unlooped_sample_ends() {
        let mut p = ZonePlayer::new(ctx());
        p.start(&ramp_instrument(LoopMode::NoLoop), 60, 100);
        left(&mut p, 99);
        assert!(!p.is_finished());
        left(&mut p, 2);
        assert!(p.is_finished());
    }

    #[test]
    fn continuous_loop_keeps_playing() {
        let mut p = ZonePlayer::new(ctx());
        p.start(&ramp_instrument(LoopMode::Continuous), 60, 100);
        let out = left(&mut p, 400);
        assert!(!p.is_finished());
        assert!(out[350..].iter().all(|&v| v >= 0.49 * PanLaw::Trig.gains(0.0).0 - 1e-3));
    }

    #[test]
    fn loop_until_release_plays_out() {
        let mut p = ZonePlayer::new(ctx());
        p.start(&ramp_instrument(LoopMode::UntilRelease), 60, 100);
        left(&mut p, 300);
        assert!(!p.is_finished());
        p.release();
        left(&mut p, 120);
        assert!(p.is_finished());
    }

    #[test]
    fn velocity_and_key_select_zones() {
        let mut p = ZonePlayer::new(ctx());
        let instr = ramp_instrument(LoopMode::NoLoop);
        assert!(p.start(&instr, 60, 100) == 1 && p.covers(90));
        let mut narrow = instr.clone();
        let mut z = (*narrow.zones[0]).clone();
        z.key_lo = 50;
        z.key_hi = 70;
        narrow.zones[0] = Arc::new(z);
        p.start(&narrow, 60, 100);
        assert!(p.covers(70));
        assert!(!p.covers(71));
        assert_eq!(p.start(&narrow, 20, 100), 0);
        assert!(p.is_finished());
    }

    #[test]
    fn attenuation_uses_centibels() {
        let ctx = ctx();
        let mut instr = ramp_instrument(LoopMode::Continuous);
        let mut z = (*instr.zones[0]).clone();
        z.attenuation = 60.0; // -6 dB
        instr.zones[0] = Arc::new(z);
        let mut loud = ZonePlayer::new(ctx.clone());
        loud.start(&ramp_instrument(LoopMode::Continuous), 60, 100);
        let mut quiet = ZonePlayer::new(ctx);
        quiet.start(&instr, 60, 100);
        let a = left(&mut loud, 10)[9];
        let b = left(&mut quiet, 10)[9];
        assert!((b / a - 10.0_f32.powf(-0.3)).abs() < 1e-3, "{}", b / a);
    }
}
