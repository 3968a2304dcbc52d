use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use crossbeam_channel::{Receiver, Sender};
use log::info;

use crate::synth::{SynthCommand, SynthEngine};

/// Opens the default output device and parks the voice engine inside its
/// callback. Returns the stream (keep it alive) and the sample rate the
/// engine runs at.
pub fn start_output(
    commands: Receiver<SynthCommand>,
    tap: Option<Sender<Vec<f32>>>,
) -> Result<(cpal::Stream, f32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No default audio output device"))?;
    let config = device.default_output_config()?;
    let sample_format = config.sample_format();
    let sample_rate = config.sample_rate().0 as f32;
    let config: cpal::StreamConfig = config.into();
    let channels = config.channels as usize;
    info!(
        "Synth output on {} at {} Hz, {} channels",
        device.name().unwrap_or_else(|_| "unknown".into()),
        sample_rate,
        channels
    );

    let mut engine = SynthEngine::new(sample_rate, commands);
    if let Some(tap) = tap {
        engine = engine.with_analyser_tap(tap);
    }

    let err_fn = |err| log::error!("Audio output error: {}", err);
    let stream = match sample_format {
        SampleFormat::F32 => build_output_stream::<f32>(&device, &config, engine, channels, err_fn)?,
        SampleFormat::I16 => build_output_stream::<i16>(&device, &config, engine, channels, err_fn)?,
        SampleFormat::U16 => build_output_stream::<u16>(&device, &config, engine, channels, err_fn)?,
        other => return Err(anyhow!("Unsupported output sample format {:?}", other)),
    };
    Ok((stream, sample_rate))
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut engine: SynthEngine,
    channels: usize,
    err_fn: fn(cpal::StreamError),
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            scratch.resize(data.len(), 0.0);
            engine.process(&mut scratch, channels);
            for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                *out = T::from_sample(sample);
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
