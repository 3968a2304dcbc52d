use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info};
use tokio::net::UdpSocket;
use tokio::runtime::Runtime;

use crate::bus::FusionBus;
use crate::event::Event;
use crate::midi::clock::ClockEstimator;
use crate::midi::parser::{normalise_pitch_bend, MidiMessage, MidiStreamParser};

pub const DEFAULT_MIDI_PORT: u16 = 5004;

/// Turns one parsed MIDI message into bus events, running the timing core
/// for the real-time family. `now` is the arrival timestamp captured on the
/// receive thread.
pub fn dispatch_message(
    msg: &MidiMessage,
    now: Instant,
    timing: &mut ClockEstimator,
    source: &str,
) -> Vec<Event> {
    match msg {
        MidiMessage::TimingClock => timing.on_clock_pulse(now),
        MidiMessage::Start => timing.on_start(now),
        MidiMessage::Continue => timing.on_continue(now),
        MidiMessage::Stop => timing.on_stop(),
        MidiMessage::SongPosition(position) => timing.on_song_position(*position, now),
        MidiMessage::NoteOn {
            channel,
            note,
            velocity,
        } => vec![Event::Note {
            note: *note,
            velocity: *velocity,
            channel: *channel,
            source: source.to_string(),
        }],
        // Velocity 0 is the uniform note-off encoding on the bus.
        MidiMessage::NoteOff { channel, note, .. } => vec![Event::Note {
            note: *note,
            velocity: 0,
            channel: *channel,
            source: source.to_string(),
        }],
        MidiMessage::ControlChange {
            channel,
            control,
            value,
        } => vec![Event::Control {
            id: crate::event::ControlId::Cc(*control),
            value: f32::from(*value) / 127.0,
            channel: *channel,
            source: source.to_string(),
        }],
        MidiMessage::PitchBend { channel, value } => vec![Event::Control {
            id: crate::event::ControlId::PitchBend,
            value: normalise_pitch_bend(*value),
            channel: *channel,
            source: source.to_string(),
        }],
        MidiMessage::SysEx {
            manufacturer,
            payload,
        } => vec![Event::SysEx {
            manufacturer: *manufacturer,
            payload: payload.clone(),
            source: source.to_string(),
        }],
        other => {
            debug!("MIDI message without bus mapping: {:?}", other);
            Vec::new()
        }
    }
}

/// Spawns the UDP MIDI feed: each datagram is a well-framed message from
/// the sender, though SysEx may span datagrams. Parsing and bus fan-out
/// run synchronously on this thread.
pub fn spawn_midi_listener(
    port: u16,
    sysex_cap: usize,
    source: String,
    bus: Arc<Mutex<FusionBus>>,
    timing: Arc<Mutex<ClockEstimator>>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let rt = match Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                error!("Failed to create runtime for MIDI listener: {}", e);
                return;
            }
        };
        rt.block_on(async move {
            let addr = format!("0.0.0.0:{}", port);
            let sock = match UdpSocket::bind(&addr).await {
                Ok(s) => s,
                Err(e) => {
                    error!("Failed to bind MIDI UDP socket on {}: {}", addr, e);
                    return;
                }
            };
            info!("MIDI listener started on UDP port {}", port);
            let mut parser = MidiStreamParser::with_sysex_cap(sysex_cap);
            let mut buf = [0u8; 2048];
            while running.load(Ordering::Relaxed) {
                let recv = tokio::time::timeout(Duration::from_secs(1), sock.recv_from(&mut buf));
                if let Ok(Ok((len, _))) = recv.await {
                    let now = Instant::now();
                    let messages = parser.feed(&buf[..len]);
                    if messages.is_empty() {
                        continue;
                    }
                    let mut events = Vec::new();
                    {
                        let mut timing = timing.lock().unwrap();
                        for msg in &messages {
                            events.extend(dispatch_message(msg, now, &mut timing, &source));
                        }
                    }
                    let mut bus = bus.lock().unwrap();
                    for event in &events {
                        bus.publish(event);
                    }
                }
            }
            info!("MIDI listener stopped");
        });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TransportState;

    #[test]
    fn notes_and_controls_map_onto_the_bus_shape() {
        let t0 = Instant::now();
        let mut timing = ClockEstimator::new("midi");
        let on = dispatch_message(
            &MidiMessage::NoteOn {
                channel: 2,
                note: 64,
                velocity: 99,
            },
            t0,
            &mut timing,
            "midi",
        );
        assert_eq!(
            on,
            vec![Event::Note {
                note: 64,
                velocity: 99,
                channel: 2,
                source: "midi".into()
            }]
        );
        let off = dispatch_message(
            &MidiMessage::NoteOff {
                channel: 2,
                note: 64,
                velocity: 40,
            },
            t0,
            &mut timing,
            "midi",
        );
        assert_eq!(
            off,
            vec![Event::Note {
                note: 64,
                velocity: 0,
                channel: 2,
                source: "midi".into()
            }]
        );
        let cc = dispatch_message(
            &MidiMessage::ControlChange {
                channel: 0,
                control: 1,
                value: 127,
            },
            t0,
            &mut timing,
            "midi",
        );
        match &cc[0] {
            Event::Control { id, value, .. } => {
                assert_eq!(*id, crate::event::ControlId::Cc(1));
                assert!((value - 1.0).abs() < 1e-6);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn clock_messages_drive_the_timing_core() {
        let t0 = Instant::now();
        let mut timing = ClockEstimator::new("midi");
        let start = dispatch_message(&MidiMessage::Start, t0, &mut timing, "midi");
        assert!(matches!(
            start[0],
            Event::Transport {
                state: TransportState::Play,
                ..
            }
        ));
        for i in 0..6u32 {
            dispatch_message(
                &MidiMessage::TimingClock,
                t0 + Duration::from_micros(20_833 * u64::from(i + 1)),
                &mut timing,
                "midi",
            );
        }
        assert_eq!(timing.position_sixteenths(), 1);
    }
}
