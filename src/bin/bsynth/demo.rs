//! The demo patch and the phrase it plays.

use std::{thread, time::Duration};

use basicsynth::{
    dsp::{envelope::EnvDef, filter::SweepKind, wavetable::WT_SAW},
    graph::When,
    instruments::{fm_synth::FmAlgorithm, FmSynth, ModSynth, SubSynth, ToneInstr},
    io::MidiEvent,
    synth::{EngineCommand, InstrManager, Instrument},
    EngineConfig,
};

const LEAD: u16 = 0;
const BASS: u16 = 1;
const BELL: u16 = 2;
const PAD: u16 = 3;

/// Channel n plays instrument n.
pub fn install(manager: &mut InstrManager) {
    let ctx = manager.context().clone();

    let mut lead = ToneInstr::new(ctx.clone());
    lead.set_wavetable(WT_SAW);
    lead.set_envelope(EnvDef::adsr(0.01, 0.1, 0.6, 0.2));
    manager.add_instrument(LEAD, Box::new(lead));

    let mut bass = SubSynth::new(ctx.clone());
    bass.set_filter(SweepKind::LowPass, 400.0, 2.0, 1200.0);
    bass.set_envelopes(EnvDef::adsr(0.005, 0.2, 0.5, 0.1), EnvDef::adsr(0.005, 0.3, 0.2, 0.1));
    manager.add_instrument(BASS, Box::new(bass));

    let mut bell = FmSynth::new(ctx.clone());
    bell.set_algorithm(FmAlgorithm::Stack);
    bell.set_operator(1, 1.0, 1.0, EnvDef::adsr(0.001, 1.5, 0.0, 0.5));
    bell.set_operator(2, 3.5, 2.0, EnvDef::adsr(0.001, 0.8, 0.0, 0.5));
    manager.add_instrument(BELL, Box::new(bell));

    let mut pad = ModSynth::new(ctx);
    let g = pad.graph_mut();
    let built = g.add_unit("LFO", "vib").is_some()
        && g.add_unit("OSCILI", "osc").is_some()
        && g.add_unit("ENVADSR", "env").is_some()
        && g.add_unit("LOWPASS", "flt").is_some();
    if built {
        g.set_input("vib.frq", 5.0);
        g.set_input("vib.amp", 3.0);
        g.set_input("env.atk", 0.4);
        g.set_input("env.sus", 0.7);
        g.set_input("env.rel", 0.8);
        g.set_input("flt.fc", 1500.0);
        g.connect("@frq", "osc.frq", When::GEN);
        g.connect("vib", "osc.fm", When::GEN);
        g.connect("env", "osc.amp", When::GEN);
        g.connect("osc", "flt.in", When::GEN);
        g.connect("flt", "out.in", When::GEN);
        g.connect("@vol", "out.vol", When::INIT);
    }
    tracing::debug!(params = pad.param_names().len(), "pad graph built");
    manager.add_instrument(PAD, Box::new(pad));
}

fn note(channel: u16, key: u8, velocity: u8) -> [MidiEvent; 2] {
    let channel = channel as u8;
    [
        MidiEvent::NoteOn {
            channel,
            key,
            velocity,
        },
        MidiEvent::NoteOff {
            channel,
            key,
            velocity: 0,
        },
    ]
}

fn send(tx: &mut rtrb::Producer<EngineCommand>, midi: MidiEvent) {
    if tx.push(EngineCommand::Midi(midi)).is_err() {
        tracing::warn!(?midi, "command queue full; event dropped");
    }
}

/// Play the phrase from the control thread, then let the tails ring out.
pub fn perform(tx: &mut rtrb::Producer<EngineCommand>, config: &EngineConfig) {
    let step = Duration::from_millis(180);
    tracing::info!(sample_rate = config.sample_rate, "playing demo");

    let [pad_on, pad_off] = note(PAD, 48, 90);
    send(tx, pad_on);
    let melody = [60u8, 63, 67, 70, 72, 70, 67, 63];
    let bass = [36u8, 36, 43, 43, 41, 41, 43, 43];
    for bar in 0..2 {
        for (i, (&m, &b)) in melody.iter().zip(bass.iter()).enumerate() {
            let [lead_on, lead_off] = note(LEAD, m, 100);
            let [bass_on, bass_off] = note(BASS, b, 110);
            send(tx, lead_on);
            send(tx, bass_on);
            if i % 4 == 0 {
                let [bell_on, bell_off] = note(BELL, m + 12, 70 + bar * 20);
                send(tx, bell_on);
                send(tx, bell_off);
            }
            thread::sleep(step);
            send(tx, lead_off);
            send(tx, bass_off);
        }
    }
    send(tx, pad_off);
    let _ = tx.push(EngineCommand::AllNotesOff);
    thread::sleep(Duration::from_secs(2));
}
