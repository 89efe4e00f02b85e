//! bsynth - plays a short demo through the default output device
//!
//! Run with: cargo run --bin bsynth [config.toml]
//! Log level follows RUST_LOG (default `info`).

mod audio;
mod demo;

use basicsynth::{synth::InstrManager, EngineConfig};
use color_eyre::eyre::{Result, WrapErr};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_file(&path).wrap_err_with(|| format!("loading {path}"))?,
        None => EngineConfig::default(),
    };

    let output = audio::Output::open()?;
    config.sample_rate = output.sample_rate();
    config.validate()?;
    tracing::info!(sample_rate = config.sample_rate, channels = output.channels(), "output device ready");

    let mut manager = InstrManager::new(&config);
    demo::install(&mut manager);

    let (mut tx, rx) = rtrb::RingBuffer::new(config.command_capacity);
    let _stream = output.play(manager, rx)?;

    demo::perform(&mut tx, &config);
    tracing::info!("done");
    Ok(())
}
