//! cpal output stream driving an `InstrManager`.

use basicsynth::{
    synth::{EngineCommand, InstrManager},
    MAX_BLOCK_SIZE,
};
use color_eyre::eyre::{eyre, Result, WrapErr};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

pub struct Output {
    device: cpal::Device,
    config: cpal::StreamConfig,
}

impl Output {
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| eyre!("no default output device available"))?;
        let supported = device
            .default_output_config()
            .wrap_err("failed to fetch default output config")?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(eyre!("unsupported sample format {:?}", supported.sample_format()));
        }
        Ok(Self {
            device,
            config: supported.into(),
        })
    }

    pub fn sample_rate(&self) -> f32 {
        self.config.sample_rate.0 as f32
    }

    pub fn channels(&self) -> usize {
        usize::from(self.config.channels)
    }

    /// Start the stream. The manager moves to the audio thread; commands
    /// reach it through `rx` at the top of every callback.
    pub fn play(self, mut manager: InstrManager, mut rx: rtrb::Consumer<EngineCommand>) -> Result<cpal::Stream> {
        let channels = self.channels();
        let mut block = vec![0.0f32; MAX_BLOCK_SIZE * 2];

        let stream = self.device.build_output_stream(
            &self.config,
            move |data: &mut [f32], _| {
                manager.drain_commands(&mut rx);
                for out in data.chunks_mut(MAX_BLOCK_SIZE * channels) {
                    let frames = out.len() / channels;
                    let stereo = &mut block[..frames * 2];
                    manager.render(stereo);
                    for (frame, lr) in out.chunks_exact_mut(channels).zip(stereo.chunks_exact(2)) {
                        match frame {
                            [mono] => *mono = 0.5 * (lr[0] + lr[1]),
                            [l, r, rest @ ..] => {
                                *l = lr[0];
                                *r = lr[1];
                                rest.fill(0.0);
                            }
                            [] => {}
                        }
                    }
                }
            },
            |err| tracing::error!(%err, "audio stream error"),
            None,
        )?;
        stream.play()?;
        Ok(stream)
    }
}
