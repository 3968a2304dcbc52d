use std::time::Instant;

use log::debug;

use crate::event::{Event, SourceId, TransportState};

/// MIDI clock resolution, pulses per quarter note.
pub const PULSES_PER_QUARTER: u32 = 24;
const PULSES_PER_SIXTEENTH: u32 = 6;

pub const BPM_MIN: f32 = 20.0;
pub const BPM_MAX: f32 = 300.0;

/// SPP deltas outside this window contribute no BPM sample.
const SPP_DELTA_MIN_MS: f64 = 100.0;
const SPP_DELTA_MAX_MS: f64 = 5000.0;
/// Ring mean must move at least this far from the current BPM to publish.
const SPP_PUBLISH_THRESHOLD: f32 = 2.0;
const SPP_RING_LEN: usize = 8;

/// Interpolation anchor: the song position at a known wall instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub position_sixteenths: u32,
    pub at: Instant,
    pub bpm: f32,
}

/// Derives tempo and song position from the MIDI real-time stream.
///
/// Two independent BPM paths: the 24-ppqn clock-tick period and Song
/// Position Pointer deltas. SPP is authoritative for position; between SPP
/// messages the clock-tick path advances the counter and drives the anchor.
pub struct ClockEstimator {
    source: SourceId,
    bpm: f32,
    position_sixteenths: u32,
    is_playing: bool,
    pulses: u32,
    quarter_anchor: Option<Instant>,
    anchor: Option<Anchor>,
    last_spp: Option<(u16, Instant)>,
    spp_ring: Vec<f32>,
    rejected_samples: u64,
}

impl ClockEstimator {
    pub fn new(source: impl Into<SourceId>) -> Self {
        Self {
            source: source.into(),
            bpm: 120.0,
            position_sixteenths: 0,
            is_playing: false,
            pulses: 0,
            quarter_anchor: None,
            anchor: None,
            last_spp: None,
            spp_ring: Vec::with_capacity(SPP_RING_LEN),
            rejected_samples: 0,
        }
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn position_sixteenths(&self) -> u32 {
        self.position_sixteenths
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Latest interpolation anchor, if any beat or SPP has been seen.
    pub fn anchor(&self) -> Option<Anchor> {
        self.anchor
    }

    /// BPM samples rejected for being outside [20, 300] or from bad deltas.
    pub fn rejected_count(&self) -> u64 {
        self.rejected_samples
    }

    /// One 0xF8 pulse. Every sixth pulse emits a `Beat` and advances the
    /// sixteenth counter; every 24th recomputes BPM from the full
    /// quarter-note period.
    pub fn on_clock_pulse(&mut self, now: Instant) -> Vec<Event> {
        let mut events = Vec::new();
        self.pulses += 1;

        if self.pulses % PULSES_PER_SIXTEENTH == 0 {
            // The beat carries the phase of the sixteenth just traversed;
            // the anchor tracks the position actually reached.
            let phase = (self.position_sixteenths % 4) as f32 / 4.0;
            self.position_sixteenths = self.position_sixteenths.wrapping_add(1);
            self.anchor = Some(Anchor {
                position_sixteenths: self.position_sixteenths,
                at: now,
                bpm: self.bpm,
            });
            events.push(Event::Beat {
                phase,
                intensity: 1.0,
                source: self.source.clone(),
            });
        }

        if self.pulses >= PULSES_PER_QUARTER {
            self.pulses = 0;
            if let Some(start) = self.quarter_anchor {
                let elapsed_ms = now.duration_since(start).as_secs_f64() * 1000.0;
                if elapsed_ms > 0.0 {
                    // BPM over the full 24-pulse quarter-note period.
                    let bpm = (60_000.0 / elapsed_ms).round() as f32;
                    if (BPM_MIN..=BPM_MAX).contains(&bpm) {
                        self.bpm = bpm;
                        if let Some(anchor) = self.anchor.as_mut() {
                            anchor.bpm = bpm;
                        }
                        events.push(Event::Transport {
                            state: TransportState::BpmUpdate,
                            bpm: Some(bpm),
                            source: self.source.clone(),
                        });
                    } else {
                        debug!("Clock-path BPM {} outside range, ignored", bpm);
                        self.rejected_samples += 1;
                    }
                }
            }
            self.quarter_anchor = Some(now);
        }
        events
    }

    /// Song Position Pointer. Always resets the counter; feeds the SPP-delta
    /// BPM ring when the delta is usable.
    pub fn on_song_position(&mut self, position: u16, now: Instant) -> Vec<Event> {
        let mut events = Vec::new();
        if let Some((prev_pos, prev_at)) = self.last_spp {
            let delta_pos = i32::from(position) - i32::from(prev_pos);
            let delta_ms = now.duration_since(prev_at).as_secs_f64() * 1000.0;
            if delta_pos > 0 && delta_ms > SPP_DELTA_MIN_MS && delta_ms < SPP_DELTA_MAX_MS {
                let quarters = f64::from(delta_pos) / 4.0;
                let sample = (quarters / (delta_ms / 60_000.0)).round() as f32;
                if (BPM_MIN..=BPM_MAX).contains(&sample) {
                    if self.spp_ring.len() == SPP_RING_LEN {
                        self.spp_ring.remove(0);
                    }
                    self.spp_ring.push(sample);
                    let mean =
                        self.spp_ring.iter().sum::<f32>() / self.spp_ring.len() as f32;
                    if (mean - self.bpm).abs() >= SPP_PUBLISH_THRESHOLD {
                        self.bpm = mean.round();
                        events.push(Event::Transport {
                            state: TransportState::BpmUpdate,
                            bpm: Some(self.bpm),
                            source: self.source.clone(),
                        });
                    }
                } else {
                    debug!("SPP-path BPM {} outside range, ignored", sample);
                    self.rejected_samples += 1;
                }
            } else if delta_pos != 0 {
                self.rejected_samples += 1;
            }
        }
        self.last_spp = Some((position, now));

        // SPP is authoritative for the position counter and the anchor.
        self.position_sixteenths = u32::from(position);
        self.pulses = 0;
        self.anchor = Some(Anchor {
            position_sixteenths: self.position_sixteenths,
            at: now,
            bpm: self.bpm,
        });
        events
    }

    pub fn on_start(&mut self, now: Instant) -> Vec<Event> {
        self.position_sixteenths = 0;
        self.pulses = 0;
        self.is_playing = true;
        self.quarter_anchor = Some(now);
        self.anchor = Some(Anchor {
            position_sixteenths: 0,
            at: now,
            bpm: self.bpm,
        });
        vec![Event::Transport {
            state: TransportState::Play,
            bpm: Some(self.bpm),
            source: self.source.clone(),
        }]
    }

    pub fn on_continue(&mut self, now: Instant) -> Vec<Event> {
        self.is_playing = true;
        self.quarter_anchor = Some(now);
        self.anchor = Some(Anchor {
            position_sixteenths: self.position_sixteenths,
            at: now,
            bpm: self.bpm,
        });
        vec![Event::Transport {
            state: TransportState::Continue,
            bpm: Some(self.bpm),
            source: self.source.clone(),
        }]
    }

    /// Stop clears the playing flag but keeps the position.
    pub fn on_stop(&mut self) -> Vec<Event> {
        self.is_playing = false;
        vec![Event::Transport {
            state: TransportState::Stop,
            bpm: Some(self.bpm),
            source: self.source.clone(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const TICK_120: Duration = Duration::from_micros(20_833);

    fn pulses(est: &mut ClockEstimator, t0: Instant, from: u32, count: u32) -> Vec<Event> {
        let mut out = Vec::new();
        for i in from..from + count {
            out.extend(est.on_clock_pulse(t0 + TICK_120 * (i + 1)));
        }
        out
    }

    #[test]
    fn clock_startup_reaches_120_bpm() {
        let t0 = Instant::now();
        let mut est = ClockEstimator::new("midi");
        est.on_start(t0);
        let events = pulses(&mut est, t0, 0, 48);

        let bpm_updates: Vec<f32> = events
            .iter()
            .filter_map(|e| match e {
                Event::Transport {
                    state: TransportState::BpmUpdate,
                    bpm,
                    ..
                } => *bpm,
                _ => None,
            })
            .collect();
        assert!(!bpm_updates.is_empty());
        for bpm in bpm_updates {
            assert!((bpm - 120.0).abs() < 1.0, "bpm = {}", bpm);
        }
        assert_eq!(est.position_sixteenths(), 8);
    }

    #[test]
    fn beats_carry_quantised_phases() {
        let t0 = Instant::now();
        let mut est = ClockEstimator::new("midi");
        est.on_start(t0);
        let events = pulses(&mut est, t0, 0, 24);
        let phases: Vec<f32> = events
            .iter()
            .filter_map(|e| match e {
                Event::Beat { phase, .. } => Some(*phase),
                _ => None,
            })
            .collect();
        assert_eq!(phases, vec![0.0, 0.25, 0.5, 0.75]);
        assert_eq!(est.position_sixteenths(), 4);
    }

    #[test]
    fn out_of_range_clock_bpm_is_rejected() {
        let t0 = Instant::now();
        let mut est = ClockEstimator::new("midi");
        est.on_start(t0);
        // 24 pulses over 24 * 2ms: ~1250 BPM, rejected.
        for i in 0..24u32 {
            est.on_clock_pulse(t0 + Duration::from_millis(2 * (u64::from(i) + 1)));
        }
        assert!((est.bpm() - 120.0).abs() < f32::EPSILON);
        assert!(est.rejected_count() > 0);
    }

    #[test]
    fn spp_resets_position_authoritatively() {
        let t0 = Instant::now();
        let mut est = ClockEstimator::new("midi");
        est.on_start(t0);
        pulses(&mut est, t0, 0, 24);
        assert_eq!(est.position_sixteenths(), 4);
        est.on_song_position(32, t0 + Duration::from_secs(2));
        assert_eq!(est.position_sixteenths(), 32);
        let anchor = est.anchor().unwrap();
        assert_eq!(anchor.position_sixteenths, 32);
    }

    #[test]
    fn spp_delta_bpm_publishes_after_threshold() {
        let t0 = Instant::now();
        let mut est = ClockEstimator::new("midi");
        est.on_start(t0);
        // 4 sixteenths (one quarter) every 600ms = 100 BPM.
        let mut events = Vec::new();
        for i in 0..4u32 {
            events.extend(
                est.on_song_position((i * 4) as u16, t0 + Duration::from_millis(u64::from(i) * 600)),
            );
        }
        let published: Vec<f32> = events
            .iter()
            .filter_map(|e| match e {
                Event::Transport {
                    state: TransportState::BpmUpdate,
                    bpm,
                    ..
                } => *bpm,
                _ => None,
            })
            .collect();
        assert_eq!(published, vec![100.0]);
        assert!((est.bpm() - 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn spp_bad_deltas_contribute_no_sample() {
        let t0 = Instant::now();
        let mut est = ClockEstimator::new("midi");
        est.on_start(t0);
        est.on_song_position(0, t0);
        // Too fast.
        let e1 = est.on_song_position(4, t0 + Duration::from_millis(50));
        // Too slow.
        let e2 = est.on_song_position(8, t0 + Duration::from_millis(5100));
        // Backwards.
        let e3 = est.on_song_position(4, t0 + Duration::from_millis(6000));
        assert!(e1.is_empty() && e2.is_empty() && e3.is_empty());
        assert!((est.bpm() - 120.0).abs() < f32::EPSILON);
    }

    #[test]
    fn stop_preserves_position_continue_resumes() {
        let t0 = Instant::now();
        let mut est = ClockEstimator::new("midi");
        est.on_start(t0);
        pulses(&mut est, t0, 0, 24);
        est.on_stop();
        assert!(!est.is_playing());
        assert_eq!(est.position_sixteenths(), 4);
        est.on_continue(t0 + Duration::from_secs(3));
        assert!(est.is_playing());
        assert_eq!(est.position_sixteenths(), 4);
    }
}
