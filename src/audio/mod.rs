pub mod analyser;
pub mod input;

use std::sync::{Arc, Mutex};

use crate::audio::analyser::BandAnalyser;
use crate::config::VisualAudioSource;
use crate::event::BandEnergy;

/// Engine-side audio actions requested by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioControl {
    /// Restart capture on the named device (`None` = system default).
    SelectDevice(Option<String>),
    /// Switch which feed drives the band-event analyser.
    SelectAnalyserSource(VisualAudioSource),
}

/// Cloneable handle to an analyser, shared read-only with renderers that
/// consume audio directly. There is a single writer: the analysis cadence
/// thread feeding it samples.
#[derive(Clone)]
pub struct SharedAnalyser(Arc<Mutex<BandAnalyser>>);

impl SharedAnalyser {
    pub fn new(analyser: BandAnalyser) -> Self {
        Self(Arc::new(Mutex::new(analyser)))
    }

    pub fn push_samples(&self, samples: &[f32]) {
        if let Ok(mut a) = self.0.lock() {
            a.push_samples(samples);
        }
    }

    pub fn analyse(&self) -> Option<(BandEnergy, f32)> {
        self.0.lock().ok().and_then(|mut a| a.analyse())
    }

    /// Latest reading without running a new pass.
    pub fn latest(&self) -> (BandEnergy, f32) {
        self.0
            .lock()
            .map(|a| a.latest())
            .unwrap_or((BandEnergy::default(), 0.0))
    }
}
