use std::time::{Duration, Instant};

/// The interpolator reports stale when the anchor has not been refreshed
/// for this long while the transport is running.
pub const STALE_AFTER: Duration = Duration::from_secs(5);

/// A continuous phase reading taken on the render tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseSample {
    /// Interpolated song position in sixteenths.
    pub position: f64,
    /// Position within the current quarter note, [0, 1).
    pub beat_phase: f64,
    /// Position within the current 4/4 bar, [0, 1).
    pub bar_phase: f64,
    /// True when the anchor is older than `STALE_AFTER`.
    pub stale: bool,
}

/// Produces continuous beat/bar phase between discrete MIDI updates.
///
/// Beat events are anchor notifications; this is the authoritative source
/// of smooth phase. Anchors come from the clock estimator (every sixteenth,
/// and authoritatively on SPP).
#[derive(Debug, Clone, Copy)]
pub struct PhaseInterpolator {
    anchor_position: f64,
    anchor_at: Option<Instant>,
    bpm: f64,
}

impl Default for PhaseInterpolator {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseInterpolator {
    pub fn new() -> Self {
        Self {
            anchor_position: 0.0,
            anchor_at: None,
            bpm: 120.0,
        }
    }

    pub fn set_anchor(&mut self, position_sixteenths: f64, at: Instant) {
        self.anchor_position = position_sixteenths;
        self.anchor_at = Some(at);
    }

    pub fn set_bpm(&mut self, bpm: f32) {
        self.bpm = f64::from(bpm);
    }

    pub fn bpm(&self) -> f32 {
        self.bpm as f32
    }

    /// Samples the phase at `now`. Before any anchor arrives the phase sits
    /// at the origin and is reported stale.
    pub fn sample(&self, now: Instant) -> PhaseSample {
        match self.anchor_at {
            None => PhaseSample {
                position: self.anchor_position,
                beat_phase: 0.0,
                bar_phase: 0.0,
                stale: true,
            },
            Some(at) => {
                let elapsed_ms = now.saturating_duration_since(at).as_secs_f64() * 1000.0;
                let sixteenths = self.bpm * 4.0 / 60_000.0 * elapsed_ms;
                let position = self.anchor_position + sixteenths;
                PhaseSample {
                    position,
                    beat_phase: (position / 4.0).fract(),
                    bar_phase: (position / 16.0).fract(),
                    stale: now.saturating_duration_since(at) > STALE_AFTER,
                }
            }
        }
    }
}
