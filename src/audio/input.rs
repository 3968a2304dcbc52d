use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, SizedSample};
use crossbeam_channel::Sender;
use log::info;

/// Names of the available capture devices, for the audioDeviceSelect surface.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    Ok(host
        .input_devices()?
        .filter_map(|d| d.name().ok())
        .collect())
}

/// Starts microphone capture from the named device (or the default).
/// Mono frames are pushed to `tx`; multi-channel input is downmixed.
pub fn start_capture(device_name: Option<&str>, tx: Sender<Vec<f32>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = if let Some(name) = device_name {
        host.input_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| anyhow!("Audio device not found: {}", name))?
    } else {
        host.default_input_device()
            .ok_or_else(|| anyhow!("No default audio input device"))?
    };
    let config = device.default_input_config()?;
    let sample_format = config.sample_format();
    let config: cpal::StreamConfig = config.into();
    info!(
        "Capturing from {} at {} Hz",
        device.name().unwrap_or_else(|_| "unknown".into()),
        config.sample_rate.0
    );
    let err_fn = |err| log::error!("Audio input error: {}", err);
    let stream = match sample_format {
        SampleFormat::F32 => build_input_stream::<f32>(&device, &config, tx, err_fn)?,
        SampleFormat::I16 => build_input_stream::<i16>(&device, &config, tx, err_fn)?,
        SampleFormat::U16 => build_input_stream::<u16>(&device, &config, tx, err_fn)?,
        other => return Err(anyhow!("Unsupported input sample format {:?}", other)),
    };
    Ok(stream)
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tx: Sender<Vec<f32>>,
    err_fn: fn(cpal::StreamError),
) -> Result<cpal::Stream>
where
    T: SizedSample + num_traits::ToPrimitive + Send + 'static,
{
    let channels = config.channels as usize;
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _| {
            let mut mono = Vec::with_capacity(data.len() / channels.max(1));
            for frame in data.chunks(channels.max(1)) {
                let sum: f32 = frame
                    .iter()
                    .map(|s| num_traits::ToPrimitive::to_f32(s).unwrap_or(0.0))
                    .sum();
                mono.push(sum / channels.max(1) as f32);
            }
            // Dropped frames are fine; the analyser only needs recency.
            let _ = tx.try_send(mono);
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
