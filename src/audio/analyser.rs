use std::f32::consts::PI;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::event::BandEnergy;

pub const VALID_FFT_SIZES: [usize; 4] = [1024, 2048, 4096, 8192];
pub const DEFAULT_FFT_SIZE: usize = 8192;
/// Band boundaries in Hz: bass 0-500, mid 500-4k, high 4k-12k.
const BASS_MAX_HZ: f32 = 500.0;
const MID_MAX_HZ: f32 = 4_000.0;
const HIGH_MAX_HZ: f32 = 12_000.0;

/// Windowed band-energy analyser.
///
/// Samples stream into a ring; `analyse` runs a Hann-windowed FFT over the
/// newest window and averages normalised bin magnitudes into three bands
/// plus a spectrum RMS, all in [0, 1]. A smoothing coefficient blends with
/// the previous frame (0 = fastest response).
pub struct BandAnalyser {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    sample_rate: f32,
    smoothing: f32,
    window: Vec<f32>,
    ring: Vec<f32>,
    write_pos: usize,
    filled: usize,
    scratch: Vec<Complex<f32>>,
    prev: Vec<f32>,
    latest: (BandEnergy, f32),
}

impl BandAnalyser {
    pub fn new(fft_size: usize, sample_rate: f32, smoothing: f32) -> Result<Self> {
        if !VALID_FFT_SIZES.contains(&fft_size) {
            return Err(anyhow!(
                "FFT size {} not one of {:?}",
                fft_size,
                VALID_FFT_SIZES
            ));
        }
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let window = (0..fft_size)
            .map(|i| {
                let x = i as f32 / fft_size as f32;
                0.5 - 0.5 * (2.0 * PI * x).cos()
            })
            .collect();
        Ok(Self {
            fft,
            fft_size,
            sample_rate,
            smoothing: smoothing.clamp(0.0, 1.0),
            window,
            ring: vec![0.0; fft_size],
            write_pos: 0,
            filled: 0,
            scratch: vec![Complex::default(); fft_size],
            prev: Vec::new(),
            latest: (BandEnergy::default(), 0.0),
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Most recent band/rms reading, for consumers that poll directly.
    pub fn latest(&self) -> (BandEnergy, f32) {
        self.latest
    }

    pub fn push_samples(&mut self, samples: &[f32]) {
        for &s in samples {
            self.ring[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % self.fft_size;
        }
        self.filled = (self.filled + samples.len()).min(self.fft_size);
    }

    /// Runs one analysis pass. Returns `None` until a full window of
    /// samples has arrived.
    pub fn analyse(&mut self) -> Option<(BandEnergy, f32)> {
        if self.filled < self.fft_size {
            return None;
        }
        // Oldest sample first, windowed.
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let sample = self.ring[(self.write_pos + i) % self.fft_size];
            *slot = Complex {
                re: sample * self.window[i],
                im: 0.0,
            };
        }
        self.fft.process(&mut self.scratch);

        let half = self.fft_size / 2;
        let mut mags: Vec<f32> = self.scratch[..half].iter().map(|c| c.norm()).collect();
        let max = mags.iter().cloned().fold(0.0_f32, f32::max).max(1e-6);
        for m in mags.iter_mut() {
            *m /= max;
        }
        if self.prev.len() == mags.len() && self.smoothing > 0.0 {
            for (m, p) in mags.iter_mut().zip(self.prev.iter()) {
                *m = self.smoothing * *p + (1.0 - self.smoothing) * *m;
            }
        }
        self.prev.clone_from(&mags);

        let hz_per_bin = self.sample_rate / self.fft_size as f32;
        let bin_for = |hz: f32| ((hz / hz_per_bin) as usize).min(half);
        let bass_end = bin_for(BASS_MAX_HZ).max(1);
        let mid_end = bin_for(MID_MAX_HZ).max(bass_end + 1).min(half);
        let high_end = bin_for(HIGH_MAX_HZ).max(mid_end + 1).min(half);

        let avg = |range: &[f32]| {
            if range.is_empty() {
                0.0
            } else {
                range.iter().sum::<f32>() / range.len() as f32
            }
        };
        let bands = BandEnergy {
            bass: avg(&mags[..bass_end]),
            mid: avg(&mags[bass_end..mid_end]),
            high: avg(&mags[mid_end..high_end]),
        };
        let rms =
            (mags.iter().map(|m| m * m).sum::<f32>() / mags.len() as f32).sqrt();
        self.latest = (bands, rms);
        Some((bands, rms))
    }
}
