//! The ModSynth unit registry.
//!
//! Every unit type is a small adapter from graph inputs to one of the `dsp`
//! generators. Generator settings that change while a note plays (frequency,
//! cutoff, mix) are compared against the last applied value each tick and
//! only pushed down on change. Delay lengths, envelope shapes and pitch-bend
//! curves are read once at note start.

use std::sync::Arc;

use crate::dsp::{
    context::SynthContext,
    delay::{AllPassDelay, CombDelay, DelayLine, Flanger},
    envelope::{EnvDef, SegmentEnv},
    filter::{AllPass, Biquad, FilterType, Reson},
    lfo::{Lfo, LfoParams},
    noise::{NoiseHold, WhiteNoise},
    oscillator::{AmOsc, BuzzOsc, FmOsc, WaveOsc},
    pitch_bend::{PitchBend, PitchBendParams},
    reverb::Reverb,
    UnitGen,
};

use super::node::{InputDef, Inputs, ModUnit, NoteInfo};

/// Type names accepted by [`create_unit`].
pub const UNIT_TYPES: &[&str] = &[
    "ADD", "ALLPASS", "AM", "APDELAY", "BANDPASS", "BUZZ", "COMB", "DELAY", "ENVADSR", "ENVAR", "FLANGER", "FM",
    "HIPASS", "LFO", "LOWPASS", "MIXER", "MUL", "NOISE", "NOISEH", "NOISEI", "OSCIL", "OSCILI", "OUT", "PARAM",
    "PBEND", "REVERB", "RESON", "SCALE",
];

/// Build a unit by type name. `None` for an unknown type.
pub fn create_unit(type_name: &str, ctx: &Arc<SynthContext>) -> Option<Box<dyn ModUnit>> {
    let sr = ctx.params.sample_rate;
    let unit: Box<dyn ModUnit> = match type_name {
        "PARAM" => Box::new(ParamUnit::new()),
        "OUT" => Box::new(OutUnit::new()),
        "OSCIL" => Box::new(OscUnit::new("OSCIL", WaveOsc::new(ctx.clone()))),
        "OSCILI" => Box::new(OscUnit::new("OSCILI", WaveOsc::interpolated(ctx.clone()))),
        "FM" => Box::new(FmUnit::new(ctx.clone())),
        "AM" => Box::new(AmUnit::new(ctx.clone())),
        "BUZZ" => Box::new(BuzzUnit::new(ctx.clone())),
        "NOISE" => Box::new(NoiseUnit::new()),
        "NOISEH" => Box::new(NoiseHoldUnit::new("NOISEH", NoiseHold::new(sr, 100.0))),
        "NOISEI" => Box::new(NoiseHoldUnit::new("NOISEI", NoiseHold::interpolated(sr, 100.0))),
        "ENVAR" => Box::new(EnvUnit::new("ENVAR", AR_INPUTS, sr)),
        "ENVADSR" => Box::new(EnvUnit::new("ENVADSR", ADSR_INPUTS, sr)),
        "LFO" => Box::new(LfoUnit::new(ctx.clone())),
        "PBEND" => Box::new(PitchBendUnit::new(ctx.clone())),
        "LOWPASS" => Box::new(FilterUnit::biquad("LOWPASS", sr, FilterType::LowPass)),
        "HIPASS" => Box::new(FilterUnit::biquad("HIPASS", sr, FilterType::HighPass)),
        "BANDPASS" => Box::new(FilterUnit::biquad("BANDPASS", sr, FilterType::BandPass)),
        "RESON" => Box::new(FilterUnit::reson(sr)),
        "ALLPASS" => Box::new(AllPassUnit::new(sr)),
        "DELAY" => Box::new(DelayUnit::new(DelayKind::Line)),
        "COMB" => Box::new(DelayUnit::new(DelayKind::Comb)),
        "APDELAY" => Box::new(DelayUnit::new(DelayKind::AllPass)),
        "FLANGER" => Box::new(FlangerUnit::new()),
        "REVERB" => Box::new(ReverbUnit::new(sr)),
        "MIXER" => Box::new(MixerUnit::new()),
        "ADD" => Box::new(MathUnit::new("ADD", ADD_INPUTS)),
        "MUL" => Box::new(MathUnit::new("MUL", MUL_INPUTS)),
        "SCALE" => Box::new(MathUnit::new("SCALE", SCALE_INPUTS)),
        _ => return None,
    };
    Some(unit)
}

macro_rules! unit_plumbing {
    ($defs:expr) => {
        fn boxed_clone(&self) -> Box<dyn ModUnit> {
            Box::new(self.clone())
        }

        fn input_defs(&self) -> &'static [InputDef] {
            $defs
        }

        fn inputs(&self) -> &Inputs {
            &self.inp
        }

        fn inputs_mut(&mut self) -> &mut Inputs {
            &mut self.inp
        }

        fn output(&self) -> f32 {
            self.out
        }
    };
}

/* ----------------------------------------------------------------------- */
/* Values and output                                                       */
/* ----------------------------------------------------------------------- */

static PARAM_INPUTS: &[InputDef] = &[InputDef::value("value", 0.0)];

/// A constant, or one of the graph's `@` note values.
#[derive(Debug, Clone)]
struct ParamUnit {
    inp: Inputs,
    out: f32,
}

impl ParamUnit {
    fn new() -> Self {
        Self {
            inp: Inputs::new(PARAM_INPUTS),
            out: 0.0,
        }
    }
}

impl ModUnit for ParamUnit {
    unit_plumbing!(PARAM_INPUTS);

    fn type_name(&self) -> &'static str {
        "PARAM"
    }

    fn start(&mut self, _note: &NoteInfo) {
        self.out = self.inp.get(0);
    }

    fn tick(&mut self) -> f32 {
        self.out = self.inp.get(0);
        self.out
    }
}

/// Index of `out.pan`. NaN (the default) keeps the voice mono.
pub(crate) const OUT_PAN: usize = 2;

static OUT_INPUTS: &[InputDef] = &[
    InputDef::sum("in"),
    InputDef::value("vol", 1.0),
    InputDef::value("pan", f32::NAN),
];

#[derive(Debug, Clone)]
struct OutUnit {
    inp: Inputs,
    out: f32,
}

impl OutUnit {
    fn new() -> Self {
        Self {
            inp: Inputs::new(OUT_INPUTS),
            out: 0.0,
        }
    }
}

impl ModUnit for OutUnit {
    unit_plumbing!(OUT_INPUTS);

    fn type_name(&self) -> &'static str {
        "OUT"
    }

    fn start(&mut self, _note: &NoteInfo) {
        self.out = 0.0;
    }

    fn tick(&mut self) -> f32 {
        self.out = self.inp.get(0) * self.inp.get(1);
        self.out
    }
}

/* ----------------------------------------------------------------------- */
/* Oscillators                                                             */
/* ----------------------------------------------------------------------- */

const I_FRQ: usize = 0;
const I_AMP: usize = 1;

static OSC_INPUTS: &[InputDef] = &[
    InputDef::value("frq", 440.0),
    InputDef::value("amp", 1.0),
    InputDef::value("wt", 0.0),
    InputDef::value("mul", 1.0),
    InputDef::sum("fm"),
    InputDef::sum("pm"),
];

#[derive(Debug, Clone)]
struct OscUnit {
    kind: &'static str,
    inp: Inputs,
    out: f32,
    osc: WaveOsc,
    frequency: f32,
    wt: usize,
}

impl OscUnit {
    fn new(kind: &'static str, osc: WaveOsc) -> Self {
        Self {
            kind,
            inp: Inputs::new(OSC_INPUTS),
            out: 0.0,
            osc,
            frequency: f32::NAN,
            wt: 0,
        }
    }

    fn settings(&self) -> (f32, usize) {
        let frequency = self.inp.get(I_FRQ) * self.inp.get(3);
        let wt = self.inp.get(2).max(0.0) as usize;
        (frequency, wt)
    }

    fn apply(&mut self, frequency: f32, wt: usize, init_phase: f32) {
        self.frequency = frequency;
        self.wt = wt;
        self.osc.set_frequency(frequency);
        self.osc.set_wavetable(wt);
        self.osc.reset(init_phase);
    }
}

impl ModUnit for OscUnit {
    unit_plumbing!(OSC_INPUTS);

    fn type_name(&self) -> &'static str {
        self.kind
    }

    fn start(&mut self, _note: &NoteInfo) {
        let (frequency, wt) = self.settings();
        self.apply(frequency, wt, 0.0);
        self.out = 0.0;
    }

    fn tick(&mut self) -> f32 {
        let (frequency, wt) = self.settings();
        if frequency != self.frequency || wt != self.wt {
            self.apply(frequency, wt, -1.0);
        }
        let fm = self.inp.get(4);
        if fm != 0.0 {
            self.osc.modulate_frequency(fm);
        }
        let pm = self.inp.get(5);
        if pm != 0.0 {
            self.osc.phase_mod_wt(pm);
        }
        self.out = self.osc.next_sample() * self.inp.get(I_AMP);
        self.out
    }
}

static FM_INPUTS: &[InputDef] = &[
    InputDef::value("frq", 440.0),
    InputDef::value("amp", 1.0),
    InputDef::value("mul", 1.0),
    InputDef::value("ndx", 1.0),
    InputDef::sum("fm"),
];

#[derive(Debug, Clone)]
struct FmUnit {
    inp: Inputs,
    out: f32,
    osc: FmOsc,
    applied: [f32; 3],
}

impl FmUnit {
    fn new(ctx: Arc<SynthContext>) -> Self {
        Self {
            inp: Inputs::new(FM_INPUTS),
            out: 0.0,
            osc: FmOsc::new(ctx),
            applied: [f32::NAN; 3],
        }
    }

    fn apply(&mut self, init_phase: f32) {
        let settings = [self.inp.get(I_FRQ), self.inp.get(2), self.inp.get(3)];
        if settings == self.applied && init_phase < 0.0 {
            return;
        }
        self.applied = settings;
        self.osc.set_frequency(settings[0]);
        self.osc.set_ratio(settings[1]);
        self.osc.set_index(settings[2]);
        self.osc.reset(init_phase);
    }
}

impl ModUnit for FmUnit {
    unit_plumbing!(FM_INPUTS);

    fn type_name(&self) -> &'static str {
        "FM"
    }

    fn start(&mut self, _note: &NoteInfo) {
        self.apply(0.0);
        self.out = 0.0;
    }

    fn tick(&mut self) -> f32 {
        self.apply(-1.0);
        let fm = self.inp.get(4);
        if fm != 0.0 {
            self.osc.modulate_frequency(fm);
        }
        self.out = self.osc.next_sample() * self.inp.get(I_AMP);
        self.out
    }
}

static AM_INPUTS: &[InputDef] = &[
    InputDef::value("frq", 440.0),
    InputDef::value("amp", 1.0),
    InputDef::value("mul", 1.0),
    InputDef::value("lvl", 1.0),
];

#[derive(Debug, Clone)]
struct AmUnit {
    inp: Inputs,
    out: f32,
    osc: AmOsc,
    applied: [f32; 3],
}

impl AmUnit {
    fn new(ctx: Arc<SynthContext>) -> Self {
        Self {
            inp: Inputs::new(AM_INPUTS),
            out: 0.0,
            osc: AmOsc::new(ctx),
            applied: [f32::NAN; 3],
        }
    }

    fn apply(&mut self, init_phase: f32) {
        let settings = [self.inp.get(I_FRQ), self.inp.get(2), self.inp.get(3)];
        if settings == self.applied && init_phase < 0.0 {
            return;
        }
        self.applied = settings;
        self.osc.set_frequency(settings[0]);
        self.osc.set_ratio(settings[1]);
        self.osc.set_level(settings[2]);
        self.osc.reset(init_phase);
    }
}

impl ModUnit for AmUnit {
    unit_plumbing!(AM_INPUTS);

    fn type_name(&self) -> &'static str {
        "AM"
    }

    fn start(&mut self, _note: &NoteInfo) {
        self.apply(0.0);
        self.out = 0.0;
    }

    fn tick(&mut self) -> f32 {
        self.apply(-1.0);
        self.out = self.osc.next_sample() * self.inp.get(I_AMP);
        self.out
    }
}

static BUZZ_INPUTS: &[InputDef] = &[
    InputDef::value("frq", 440.0),
    InputDef::value("amp", 1.0),
    InputDef::value("harm", 10.0),
    InputDef::sum("fm"),
];

#[derive(Debug, Clone)]
struct BuzzUnit {
    inp: Inputs,
    out: f32,
    osc: BuzzOsc,
    applied: [f32; 2],
}

impl BuzzUnit {
    fn new(ctx: Arc<SynthContext>) -> Self {
        Self {
            inp: Inputs::new(BUZZ_INPUTS),
            out: 0.0,
            osc: BuzzOsc::new(ctx),
            applied: [f32::NAN; 2],
        }
    }

    fn apply(&mut self, init_phase: f32) {
        let settings = [self.inp.get(I_FRQ), self.inp.get(2)];
        if settings == self.applied && init_phase < 0.0 {
            return;
        }
        self.applied = settings;
        self.osc.set_frequency(settings[0]);
        self.osc.set_harmonics(settings[1].max(1.0) as u32);
        self.osc.reset(init_phase);
    }
}

impl ModUnit for BuzzUnit {
    unit_plumbing!(BUZZ_INPUTS);

    fn type_name(&self) -> &'static str {
        "BUZZ"
    }

    fn start(&mut self, _note: &NoteInfo) {
        self.apply(0.0);
        self.out = 0.0;
    }

    fn tick(&mut self) -> f32 {
        self.apply(-1.0);
        let fm = self.inp.get(3);
        if fm != 0.0 {
            self.osc.modulate_frequency(fm);
        }
        self.out = self.osc.next_sample() * self.inp.get(I_AMP);
        self.out
    }
}

/* ----------------------------------------------------------------------- */
/* Noise                                                                   */
/* ----------------------------------------------------------------------- */

static NOISE_INPUTS: &[InputDef] = &[InputDef::value("amp", 1.0)];

#[derive(Debug, Clone)]
struct NoiseUnit {
    inp: Inputs,
    out: f32,
    noise: WhiteNoise,
}

impl NoiseUnit {
    fn new() -> Self {
        Self {
            inp: Inputs::new(NOISE_INPUTS),
            out: 0.0,
            noise: WhiteNoise::new(),
        }
    }
}

impl ModUnit for NoiseUnit {
    unit_plumbing!(NOISE_INPUTS);

    fn type_name(&self) -> &'static str {
        "NOISE"
    }

    fn start(&mut self, _note: &NoteInfo) {
        self.noise.reset(0.0);
        self.out = 0.0;
    }

    fn tick(&mut self) -> f32 {
        self.out = self.noise.next_sample() * self.inp.get(0);
        self.out
    }
}

static NOISE_HOLD_INPUTS: &[InputDef] = &[InputDef::value("rate", 100.0), InputDef::value("amp", 1.0)];

#[derive(Debug, Clone)]
struct NoiseHoldUnit {
    kind: &'static str,
    inp: Inputs,
    out: f32,
    noise: NoiseHold,
}

impl NoiseHoldUnit {
    fn new(kind: &'static str, noise: NoiseHold) -> Self {
        Self {
            kind,
            inp: Inputs::new(NOISE_HOLD_INPUTS),
            out: 0.0,
            noise,
        }
    }
}

impl ModUnit for NoiseHoldUnit {
    unit_plumbing!(NOISE_HOLD_INPUTS);

    fn type_name(&self) -> &'static str {
        self.kind
    }

    fn start(&mut self, _note: &NoteInfo) {
        self.noise.set_rate(self.inp.get(0));
        self.noise.reset(0.0);
        self.out = 0.0;
    }

    fn tick(&mut self) -> f32 {
        self.out = self.noise.next_sample() * self.inp.get(1);
        self.out
    }
}

/* ----------------------------------------------------------------------- */
/* Envelopes, LFO and pitch bend                                           */
/* ----------------------------------------------------------------------- */

static AR_INPUTS: &[InputDef] = &[
    InputDef::value("atk", 0.01),
    InputDef::value("pk", 1.0),
    InputDef::value("rel", 0.1),
];

static ADSR_INPUTS: &[InputDef] = &[
    InputDef::value("atk", 0.01),
    InputDef::value("dec", 0.1),
    InputDef::value("sus", 0.8),
    InputDef::value("rel", 0.2),
];

#[derive(Debug, Clone)]
struct EnvUnit {
    kind: &'static str,
    defs: &'static [InputDef],
    inp: Inputs,
    out: f32,
    env: SegmentEnv,
}

impl EnvUnit {
    fn new(kind: &'static str, defs: &'static [InputDef], sample_rate: f32) -> Self {
        Self {
            kind,
            defs,
            inp: Inputs::new(defs),
            out: 0.0,
            env: SegmentEnv::new(EnvDef::default(), sample_rate),
        }
    }

    fn shape(&self) -> EnvDef {
        let i = &self.inp;
        if self.kind == "ENVAR" {
            EnvDef::ar(i.get(0), i.get(1), i.get(2))
        } else {
            EnvDef::adsr(i.get(0), i.get(1), i.get(2), i.get(3))
        }
    }
}

impl ModUnit for EnvUnit {
    fn boxed_clone(&self) -> Box<dyn ModUnit> {
        Box::new(self.clone())
    }

    fn input_defs(&self) -> &'static [InputDef] {
        self.defs
    }

    fn inputs(&self) -> &Inputs {
        &self.inp
    }

    fn inputs_mut(&mut self) -> &mut Inputs {
        &mut self.inp
    }

    fn output(&self) -> f32 {
        self.out
    }

    fn type_name(&self) -> &'static str {
        self.kind
    }

    fn start(&mut self, _note: &NoteInfo) {
        self.env.set_def(self.shape());
        self.env.reset(0.0);
        self.out = 0.0;
    }

    fn tick(&mut self) -> f32 {
        self.out = self.env.next_sample();
        self.out
    }

    fn stop(&mut self) {
        self.env.release();
    }

    fn is_finished(&self) -> bool {
        self.env.is_finished()
    }
}

static LFO_INPUTS: &[InputDef] = &[
    InputDef::value("frq", 4.0),
    InputDef::value("amp", 1.0),
    InputDef::value("wt", 0.0),
    InputDef::value("atk", 0.0),
];

#[derive(Debug, Clone)]
struct LfoUnit {
    inp: Inputs,
    out: f32,
    lfo: Lfo,
}

impl LfoUnit {
    fn new(ctx: Arc<SynthContext>) -> Self {
        Self {
            inp: Inputs::new(LFO_INPUTS),
            out: 0.0,
            lfo: Lfo::new(ctx, LfoParams::default()),
        }
    }

    fn params(&self) -> LfoParams {
        LfoParams {
            rate: self.inp.get(0),
            depth: self.inp.get(1),
            wt: self.inp.get(2).max(0.0) as usize,
            attack: self.inp.get(3),
        }
    }
}

impl ModUnit for LfoUnit {
    unit_plumbing!(LFO_INPUTS);

    fn type_name(&self) -> &'static str {
        "LFO"
    }

    fn start(&mut self, _note: &NoteInfo) {
        self.lfo.set_params(self.params());
        self.lfo.reset(0.0);
        self.out = 0.0;
    }

    fn tick(&mut self) -> f32 {
        let params = self.params();
        if params != *self.lfo.params() {
            self.lfo.set_params(params);
            self.lfo.reset(-1.0);
        }
        self.out = self.lfo.next_sample();
        self.out
    }
}

static PBEND_INPUTS: &[InputDef] = &[
    InputDef::value("frq", 440.0),
    InputDef::value("r1", 0.0),
    InputDef::value("r2", 0.0),
    InputDef::value("a1", 0.0),
    InputDef::value("a2", 0.0),
    InputDef::value("a3", 0.0),
];

/// Outputs the bend in Hz around `frq`, ready for an oscillator's `fm`.
#[derive(Debug, Clone)]
struct PitchBendUnit {
    inp: Inputs,
    out: f32,
    bend: PitchBend,
}

impl PitchBendUnit {
    fn new(ctx: Arc<SynthContext>) -> Self {
        Self {
            inp: Inputs::new(PBEND_INPUTS),
            out: 0.0,
            bend: PitchBend::new(ctx, PitchBendParams::default()),
        }
    }
}

impl ModUnit for PitchBendUnit {
    unit_plumbing!(PBEND_INPUTS);

    fn type_name(&self) -> &'static str {
        "PBEND"
    }

    fn start(&mut self, _note: &NoteInfo) {
        let i = &self.inp;
        self.bend.set_params(PitchBendParams {
            on: true,
            r1: i.get(1),
            r2: i.get(2),
            a1: i.get(3),
            a2: i.get(4),
            a3: i.get(5),
        });
        self.bend.set_sig_freq(i.get(0));
        self.bend.reset(0.0);
        self.out = 0.0;
    }

    fn tick(&mut self) -> f32 {
        self.out = self.bend.next_sample();
        self.out
    }
}

/* ----------------------------------------------------------------------- */
/* Filters                                                                 */
/* ----------------------------------------------------------------------- */

static FILTER_INPUTS: &[InputDef] = &[
    InputDef::sum("in"),
    InputDef::value("fc", 1000.0),
    InputDef::value("q", 0.707),
];

#[derive(Debug, Clone)]
enum FilterCore {
    Biquad(Biquad),
    Reson(Reson),
}

#[derive(Debug, Clone)]
struct FilterUnit {
    kind: &'static str,
    inp: Inputs,
    out: f32,
    core: FilterCore,
    applied: [f32; 2],
}

impl FilterUnit {
    fn biquad(kind: &'static str, sample_rate: f32, response: FilterType) -> Self {
        Self::with_core(kind, FilterCore::Biquad(Biquad::new(sample_rate, response)))
    }

    fn reson(sample_rate: f32) -> Self {
        Self::with_core("RESON", FilterCore::Reson(Reson::new(sample_rate)))
    }

    fn with_core(kind: &'static str, core: FilterCore) -> Self {
        Self {
            kind,
            inp: Inputs::new(FILTER_INPUTS),
            out: 0.0,
            core,
            applied: [f32::NAN; 2],
        }
    }

    fn update(&mut self) {
        let settings = [self.inp.get(1), self.inp.get(2)];
        if settings == self.applied {
            return;
        }
        self.applied = settings;
        match &mut self.core {
            FilterCore::Biquad(f) => f.calc_coef(settings[0], settings[1]),
            FilterCore::Reson(f) => f.calc_coef(settings[0], settings[1]),
        }
    }
}

impl ModUnit for FilterUnit {
    unit_plumbing!(FILTER_INPUTS);

    fn type_name(&self) -> &'static str {
        self.kind
    }

    fn start(&mut self, _note: &NoteInfo) {
        match &mut self.core {
            FilterCore::Biquad(f) => f.reset(0.0),
            FilterCore::Reson(f) => f.reset(0.0),
        }
        self.applied = [f32::NAN; 2];
        self.update();
        self.out = 0.0;
    }

    fn tick(&mut self) -> f32 {
        self.update();
        let x = self.inp.get(0);
        self.out = match &mut self.core {
            FilterCore::Biquad(f) => f.sample(x),
            FilterCore::Reson(f) => f.sample(x),
        };
        self.out
    }
}

static ALLPASS_INPUTS: &[InputDef] = &[
    InputDef::sum("in"),
    InputDef::value("fc", 1000.0),
    InputDef::value("ord", 1.0),
];

#[derive(Debug, Clone)]
struct AllPassUnit {
    inp: Inputs,
    out: f32,
    filter: AllPass,
    fc: f32,
}

impl AllPassUnit {
    fn new(sample_rate: f32) -> Self {
        Self {
            inp: Inputs::new(ALLPASS_INPUTS),
            out: 0.0,
            filter: AllPass::new(sample_rate),
            fc: f32::NAN,
        }
    }
}

impl ModUnit for AllPassUnit {
    unit_plumbing!(ALLPASS_INPUTS);

    fn type_name(&self) -> &'static str {
        "ALLPASS"
    }

    fn start(&mut self, _note: &NoteInfo) {
        self.filter.set_order(self.inp.get(2).max(1.0) as usize);
        self.filter.reset(0.0);
        self.fc = f32::NAN;
        self.out = 0.0;
    }

    fn tick(&mut self) -> f32 {
        let fc = self.inp.get(1);
        if fc != self.fc {
            self.fc = fc;
            self.filter.calc_coef(fc);
        }
        self.out = self.filter.sample(self.inp.get(0));
        self.out
    }
}

/* ----------------------------------------------------------------------- */
/* Delays and effects                                                      */
/* ----------------------------------------------------------------------- */

static DELAY_INPUTS: &[InputDef] = &[
    InputDef::sum("in"),
    InputDef::value("dly", 0.1),
    InputDef::value("dec", 1.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DelayKind {
    Line,
    Comb,
    AllPass,
}

#[derive(Debug, Clone)]
enum DelayCore {
    Idle,
    Line(DelayLine),
    Comb(CombDelay),
    AllPass(AllPassDelay),
}

/// `dec` is the attenuation for DELAY and the decay time for COMB/APDELAY.
#[derive(Debug, Clone)]
struct DelayUnit {
    kind: DelayKind,
    inp: Inputs,
    out: f32,
    core: DelayCore,
}

impl DelayUnit {
    fn new(kind: DelayKind) -> Self {
        Self {
            kind,
            inp: Inputs::new(DELAY_INPUTS),
            out: 0.0,
            core: DelayCore::Idle,
        }
    }
}

impl ModUnit for DelayUnit {
    unit_plumbing!(DELAY_INPUTS);

    fn type_name(&self) -> &'static str {
        match self.kind {
            DelayKind::Line => "DELAY",
            DelayKind::Comb => "COMB",
            DelayKind::AllPass => "APDELAY",
        }
    }

    fn start(&mut self, note: &NoteInfo) {
        let sr = note.sample_rate();
        let (dly, dec) = (self.inp.get(1).max(0.0), self.inp.get(2));
        self.core = match self.kind {
            DelayKind::Line => {
                let mut line = DelayLine::new(dly, sr);
                line.set_atten(dec);
                DelayCore::Line(line)
            }
            DelayKind::Comb => DelayCore::Comb(CombDelay::new(dly, dec, sr)),
            DelayKind::AllPass => DelayCore::AllPass(AllPassDelay::new(dly, dec, sr)),
        };
        self.out = 0.0;
    }

    fn tick(&mut self) -> f32 {
        let x = self.inp.get(0);
        self.out = match &mut self.core {
            DelayCore::Idle => 0.0,
            DelayCore::Line(d) => d.sample(x),
            DelayCore::Comb(d) => d.sample(x),
            DelayCore::AllPass(d) => d.sample(x),
        };
        self.out
    }
}

static FLANGER_INPUTS: &[InputDef] = &[
    InputDef::sum("in"),
    InputDef::value("center", 0.004),
    InputDef::value("depth", 0.003),
    InputDef::value("rate", 0.2),
    InputDef::value("fb", 0.0),
    InputDef::value("mix", 0.5),
];

#[derive(Debug, Clone)]
struct FlangerUnit {
    inp: Inputs,
    out: f32,
    flanger: Option<Flanger>,
}

impl FlangerUnit {
    fn new() -> Self {
        Self {
            inp: Inputs::new(FLANGER_INPUTS),
            out: 0.0,
            flanger: None,
        }
    }
}

impl ModUnit for FlangerUnit {
    unit_plumbing!(FLANGER_INPUTS);

    fn type_name(&self) -> &'static str {
        "FLANGER"
    }

    fn start(&mut self, note: &NoteInfo) {
        let i = &self.inp;
        let mut flanger = Flanger::new(note.ctx.clone(), i.get(1), i.get(2), i.get(3));
        flanger.set_feedback(i.get(4));
        let mix = i.get(5).clamp(0.0, 1.0);
        flanger.set_mix(1.0 - mix, mix);
        flanger.reset(0.0);
        self.flanger = Some(flanger);
        self.out = 0.0;
    }

    fn tick(&mut self) -> f32 {
        let x = self.inp.get(0);
        self.out = self.flanger.as_mut().map_or(0.0, |f| f.sample(x));
        self.out
    }
}

static REVERB_INPUTS: &[InputDef] = &[
    InputDef::sum("in"),
    InputDef::value("rvt", 1.0),
    InputDef::value("mix", 0.1),
];

#[derive(Debug, Clone)]
struct ReverbUnit {
    inp: Inputs,
    out: f32,
    reverb: Reverb,
}

impl ReverbUnit {
    fn new(sample_rate: f32) -> Self {
        Self {
            inp: Inputs::new(REVERB_INPUTS),
            out: 0.0,
            reverb: Reverb::new(sample_rate, 1.0),
        }
    }
}

impl ModUnit for ReverbUnit {
    unit_plumbing!(REVERB_INPUTS);

    fn type_name(&self) -> &'static str {
        "REVERB"
    }

    fn start(&mut self, _note: &NoteInfo) {
        self.reverb.set_rvt(self.inp.get(1));
        self.reverb.set_mix(self.inp.get(2));
        self.reverb.reset(0.0);
        self.out = 0.0;
    }

    fn tick(&mut self) -> f32 {
        let (rvt, mix) = (self.inp.get(1).max(0.01), self.inp.get(2).clamp(0.0, 1.0));
        if rvt != self.reverb.rvt() {
            self.reverb.set_rvt(rvt);
        }
        if mix != self.reverb.mix() {
            self.reverb.set_mix(mix);
        }
        self.out = self.reverb.sample(self.inp.get(0));
        self.out
    }
}

/* ----------------------------------------------------------------------- */
/* Mixing and arithmetic                                                   */
/* ----------------------------------------------------------------------- */

static MIXER_INPUTS: &[InputDef] = &[
    InputDef::sum("in1"),
    InputDef::sum("in2"),
    InputDef::sum("in3"),
    InputDef::sum("in4"),
    InputDef::value("vol1", 1.0),
    InputDef::value("vol2", 1.0),
    InputDef::value("vol3", 1.0),
    InputDef::value("vol4", 1.0),
];

#[derive(Debug, Clone)]
struct MixerUnit {
    inp: Inputs,
    out: f32,
}

impl MixerUnit {
    fn new() -> Self {
        Self {
            inp: Inputs::new(MIXER_INPUTS),
            out: 0.0,
        }
    }
}

impl ModUnit for MixerUnit {
    unit_plumbing!(MIXER_INPUTS);

    fn type_name(&self) -> &'static str {
        "MIXER"
    }

    fn start(&mut self, _note: &NoteInfo) {
        self.out = 0.0;
    }

    fn tick(&mut self) -> f32 {
        self.out = (0..4).map(|k| self.inp.get(k) * self.inp.get(k + 4)).sum();
        self.out
    }
}

static ADD_INPUTS: &[InputDef] = &[InputDef::sum("in1"), InputDef::sum("in2")];

static MUL_INPUTS: &[InputDef] = &[InputDef::factor("in1"), InputDef::factor("in2")];

static SCALE_INPUTS: &[InputDef] = &[
    InputDef::sum("in"),
    InputDef::value("scl", 1.0),
    InputDef::value("ofs", 0.0),
];

#[derive(Debug, Clone)]
struct MathUnit {
    kind: &'static str,
    defs: &'static [InputDef],
    inp: Inputs,
    out: f32,
}

impl MathUnit {
    fn new(kind: &'static str, defs: &'static [InputDef]) -> Self {
        Self {
            kind,
            defs,
            inp: Inputs::new(defs),
            out: 0.0,
        }
    }
}

impl ModUnit for MathUnit {
    fn boxed_clone(&self) -> Box<dyn ModUnit> {
        Box::new(self.clone())
    }

    fn input_defs(&self) -> &'static [InputDef] {
        self.defs
    }

    fn inputs(&self) -> &Inputs {
        &self.inp
    }

    fn inputs_mut(&mut self) -> &mut Inputs {
        &mut self.inp
    }

    fn output(&self) -> f32 {
        self.out
    }

    fn type_name(&self) -> &'static str {
        self.kind
    }

    fn start(&mut self, _note: &NoteInfo) {
        self.out = 0.0;
    }

    fn tick(&mut self) -> f32 {
        let i = &self.inp;
        self.out = match self.kind {
            "ADD" => i.get(0) + i.get(1),
            "MUL" => i.fed_or_base(0) * i.fed_or_base(1),
            _ => i.get(0) * i.get(1) + i.get(2),
        };
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(ctx: &Arc<SynthContext>) -> NoteInfo {
        NoteInfo {
            ctx: ctx.clone(),
            frequency: 100.0,
            volume: 1.0,
            pitch: 48,
            duration: 0.0,
        }
    }

    #[test]
    fn registry_builds_every_listed_type() {
        let ctx = Arc::new(SynthContext::with_options(8000.0, 1024, false));
        for name in UNIT_TYPES {
            let unit = create_unit(name, &ctx).unwrap_or_else(|| panic!("{name} not registered"));
            assert_eq!(unit.type_name(), *name);
            assert_eq!(unit.inputs().len(), unit.input_defs().len());
        }
        assert!(create_unit("WAVESHAPER", &ctx).is_none());
        assert_eq!(UNIT_TYPES.len(), 28);
    }

    #[test]
    fn input_names_are_unique_per_type() {
        let ctx = Arc::new(SynthContext::with_options(8000.0, 1024, false));
        for name in UNIT_TYPES {
            let unit = create_unit(name, &ctx).unwrap();
            let defs = unit.input_defs();
            for (k, d) in defs.iter().enumerate() {
                assert_eq!(unit.input_index(d.name), Some(k), "{name}.{}", d.name);
            }
        }
    }

    #[test]
    fn oscillator_follows_frequency_changes() {
        let ctx = Arc::new(SynthContext::with_options(8000.0, 1024, false));
        let mut osc = create_unit("OSCIL", &ctx).unwrap();
        osc.inputs_mut().set(0, 1000.0);
        osc.start(&note(&ctx));
        let crossings = |osc: &mut Box<dyn ModUnit>| {
            let mut prev = osc.tick();
            let mut n = 0;
            for _ in 0..8000 {
                let x = osc.tick();
                if prev < 0.0 && x >= 0.0 {
                    n += 1;
                }
                prev = x;
            }
            n
        };
        let at_1k = crossings(&mut osc);
        osc.inputs_mut().set(0, 500.0);
        let at_500 = crossings(&mut osc);
        assert!((999..=1001).contains(&at_1k), "{at_1k}");
        assert!((499..=501).contains(&at_500), "{at_500}");
    }

    #[test]
    fn envelope_unit_releases_on_stop() {
        let ctx = Arc::new(SynthContext::with_options(1000.0, 1024, false));
        let mut env = create_unit("ENVAR", &ctx).unwrap();
        env.inputs_mut().set(0, 0.01);
        env.inputs_mut().set(2, 0.02);
        env.start(&note(&ctx));
        for _ in 0..50 {
            env.tick();
        }
        assert!(!env.is_finished());
        assert!((env.output() - 1.0).abs() < 1e-3);
        env.stop();
        for _ in 0..30 {
            env.tick();
        }
        assert!(env.is_finished());
    }

    #[test]
    fn arithmetic_units() {
        let ctx = Arc::new(SynthContext::default());
        let mut mul = create_unit("MUL", &ctx).unwrap();
        assert_eq!(mul.tick(), 1.0);
        mul.inputs_mut().set(0, 0.5);
        mul.inputs_mut().add(1, 3.0);
        assert_eq!(mul.tick(), 1.5);
        mul.inputs_mut().clear_sums();
        mul.inputs_mut().add(0, 2.0);
        mul.inputs_mut().add(1, 3.0);
        assert_eq!(mul.tick(), 6.0);

        let mut scale = create_unit("SCALE", &ctx).unwrap();
        scale.inputs_mut().add(0, 2.0);
        scale.inputs_mut().set(1, 3.0);
        scale.inputs_mut().set(2, 1.0);
        assert_eq!(scale.tick(), 7.0);
    }

    #[test]
    fn delay_reads_length_at_start() {
        let ctx = Arc::new(SynthContext::with_options(1000.0, 1024, false));
        let mut dly = create_unit("DELAY", &ctx).unwrap();
        dly.inputs_mut().set(1, 0.005);
        dly.start(&note(&ctx));
        let mut out = Vec::new();
        for n in 0..8 {
            dly.inputs_mut().add(0, if n == 0 { 1.0 } else { 0.0 });
            out.push(dly.tick());
            dly.inputs_mut().clear_sums();
        }
        assert_eq!(out[5], 1.0);
        assert_eq!(out.iter().filter(|&&v| v != 0.0).count(), 1);
    }
}
