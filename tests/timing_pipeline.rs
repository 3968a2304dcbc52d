//! End-to-end timing scenarios: raw MIDI bytes through the stream parser,
//! the clock estimator and the fusion bus.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pulsevis::bus::FusionBus;
use pulsevis::event::{Event, EventKind, TransportState};
use pulsevis::midi::clock::ClockEstimator;
use pulsevis::midi::listener::dispatch_message;
use pulsevis::midi::parser::MidiStreamParser;
use pulsevis::midi::phase::PhaseInterpolator;

const TICK_120: Duration = Duration::from_micros(20_833);

struct Rig {
    parser: MidiStreamParser,
    timing: ClockEstimator,
    events: Vec<Event>,
}

impl Rig {
    fn new() -> Self {
        Self {
            parser: MidiStreamParser::new(),
            timing: ClockEstimator::new("midi"),
            events: Vec::new(),
        }
    }

    fn feed(&mut self, bytes: &[u8], at: Instant) {
        for msg in self.parser.feed(bytes) {
            self.events
                .extend(dispatch_message(&msg, at, &mut self.timing, "midi"));
        }
    }

    fn beats(&self) -> Vec<f32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Beat { phase, .. } => Some(*phase),
                _ => None,
            })
            .collect()
    }

    fn bpm_updates(&self) -> Vec<f32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Transport {
                    state: TransportState::BpmUpdate,
                    bpm,
                    ..
                } => *bpm,
                _ => None,
            })
            .collect()
    }
}

#[test]
fn clock_startup_scenario() {
    let t0 = Instant::now();
    let mut rig = Rig::new();
    rig.feed(&[0xFA], t0);
    for i in 0..48u32 {
        rig.feed(&[0xF8], t0 + TICK_120 * (i + 1));
    }

    let updates = rig.bpm_updates();
    assert!(!updates.is_empty(), "no BPM update after 24 clocks");
    for bpm in &updates {
        assert!((bpm - 120.0).abs() < 1.0, "bpm = {}", bpm);
    }
    assert_eq!(rig.timing.position_sixteenths(), 8);

    // First quarter note: four beats at the quantised phases.
    assert_eq!(rig.beats()[..4], [0.0, 0.25, 0.5, 0.75]);
}

#[test]
fn spp_correction_scenario() {
    let t0 = Instant::now();
    let mut rig = Rig::new();
    rig.feed(&[0xFA], t0);
    // Continuous clock at 120 BPM for 2 seconds = 96 pulses.
    for i in 0..96u32 {
        rig.feed(&[0xF8], t0 + TICK_120 * (i + 1));
    }
    assert_eq!(rig.timing.position_sixteenths(), 16);

    let spp_at = t0 + Duration::from_secs(2);
    rig.feed(&[0xF2, 0x20, 0x00], spp_at);
    assert_eq!(rig.timing.position_sixteenths(), 32);

    // SPP authority: the interpolation anchor jumps to position 32.
    let anchor = rig.timing.anchor().unwrap();
    assert_eq!(anchor.position_sixteenths, 32);
    assert_eq!(anchor.at, spp_at);

    // The next beat derives from position 32: phase (32 % 4) / 4 = 0.
    rig.events.clear();
    for i in 0..6u32 {
        rig.feed(&[0xF8], spp_at + TICK_120 * (i + 1));
    }
    assert_eq!(rig.beats(), vec![0.0]);
    assert_eq!(rig.timing.position_sixteenths(), 33);
}

#[test]
fn sysex_with_interleaved_clock_scenario() {
    let t0 = Instant::now();
    let mut rig = Rig::new();
    rig.feed(&[0xFA], t0);
    // Five pulses so the clock inside the SysEx lands on a beat boundary.
    for i in 0..5u32 {
        rig.feed(&[0xF8], t0 + TICK_120 * (i + 1));
    }
    rig.events.clear();
    rig.feed(&[0xF0, 0x7D, 0x03, 0x02, 0xF8, 0xF7], t0 + TICK_120 * 6);

    // The inner 0xF8 produced its beat first, then the SysEx completed
    // with the payload bytes on either side of the real-time byte.
    assert_eq!(rig.events.len(), 2);
    assert!(matches!(rig.events[0], Event::Beat { .. }));
    assert_eq!(
        rig.events[1],
        Event::SysEx {
            manufacturer: 0x7D,
            payload: vec![0x03, 0x02],
            source: "midi".into()
        }
    );
}

#[test]
fn interpolated_phase_follows_the_anchor() {
    let t0 = Instant::now();
    let mut rig = Rig::new();
    rig.feed(&[0xFA], t0);
    for i in 0..24u32 {
        rig.feed(&[0xF8], t0 + TICK_120 * (i + 1));
    }

    let mut interp = PhaseInterpolator::new();
    let anchor = rig.timing.anchor().unwrap();
    interp.set_anchor(f64::from(anchor.position_sixteenths), anchor.at);
    interp.set_bpm(anchor.bpm);

    // Anchor sits at position 4 (phase 0); an eighth note later the beat
    // phase reads one half.
    let sample = interp.sample(anchor.at + Duration::from_millis(250));
    assert!((sample.beat_phase - 0.5).abs() < 0.01, "{}", sample.beat_phase);
    assert!(!sample.stale);

    // Beat phase at the render tick never runs behind the beat event.
    let at_beat = interp.sample(anchor.at);
    assert!(at_beat.beat_phase >= 0.0);
}

#[test]
fn bus_fans_out_the_midi_pipeline() {
    let t0 = Instant::now();
    let mut bus = FusionBus::new();
    bus.register_source("midi");
    let beats = Arc::new(Mutex::new(0usize));
    let all = Arc::new(Mutex::new(0usize));
    {
        let beats = beats.clone();
        bus.subscribe(
            "beat-counter",
            EventKind::Beat,
            Box::new(move |_| {
                *beats.lock().unwrap() += 1;
                Ok(())
            }),
        );
        let all = all.clone();
        bus.subscribe_all(
            "wildcard",
            Box::new(move |_| {
                *all.lock().unwrap() += 1;
                Ok(())
            }),
        );
    }

    let mut rig = Rig::new();
    rig.feed(&[0xFA], t0);
    for i in 0..24u32 {
        rig.feed(&[0xF8], t0 + TICK_120 * (i + 1));
    }
    for event in &rig.events {
        bus.publish(event);
    }

    assert_eq!(*beats.lock().unwrap(), 4);
    // Wildcard saw the transport events too.
    assert!(*all.lock().unwrap() > 4);
}
