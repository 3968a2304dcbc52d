use serde::{Deserialize, Serialize};

/// Name of the input source an event originated from, as registered on the
/// fusion bus ("midi", "microphone", "synth", ...).
pub type SourceId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportState {
    Play,
    Continue,
    Stop,
    BpmUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Connected,
    Disconnected,
}

/// Coarse spectral descriptor: average normalised bin magnitude per band.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BandEnergy {
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
}

/// Identifies a continuous controller. Pitch bend rides the same path as CC
/// messages once normalised, so it gets its own id instead of a fake CC
/// number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlId {
    Cc(u8),
    PitchBend,
}

/// Uniform event stream emitted by every input source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Anchor notification at a sixteenth boundary. `phase` is the quantised
    /// position within the current quarter note; continuous phase comes from
    /// the interpolator, not from these events.
    Beat {
        phase: f32,
        intensity: f32,
        source: SourceId,
    },
    /// Velocity 0 means note-off.
    Note {
        note: u8,
        velocity: u8,
        channel: u8,
        source: SourceId,
    },
    /// CC or pitch bend, value normalised to [0, 1].
    Control {
        id: ControlId,
        value: f32,
        channel: u8,
        source: SourceId,
    },
    Transport {
        state: TransportState,
        bpm: Option<f32>,
        source: SourceId,
    },
    Frequency {
        bands: BandEnergy,
        rms: f32,
        source: SourceId,
    },
    SysEx {
        manufacturer: u8,
        payload: Vec<u8>,
        source: SourceId,
    },
    DeviceChange {
        name: String,
        state: DeviceState,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Beat,
    Note,
    Control,
    Transport,
    Frequency,
    SysEx,
    DeviceChange,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Beat { .. } => EventKind::Beat,
            Event::Note { .. } => EventKind::Note,
            Event::Control { .. } => EventKind::Control,
            Event::Transport { .. } => EventKind::Transport,
            Event::Frequency { .. } => EventKind::Frequency,
            Event::SysEx { .. } => EventKind::SysEx,
            Event::DeviceChange { .. } => EventKind::DeviceChange,
        }
    }

    /// Device-change notifications are bus-level, not source-level.
    pub fn source(&self) -> Option<&str> {
        match self {
            Event::Beat { source, .. }
            | Event::Note { source, .. }
            | Event::Control { source, .. }
            | Event::Transport { source, .. }
            | Event::Frequency { source, .. }
            | Event::SysEx { source, .. } => Some(source),
            Event::DeviceChange { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_reports_its_kind() {
        let source = "midi".to_string();
        let cases = [
            (
                Event::Beat {
                    phase: 0.25,
                    intensity: 1.0,
                    source: source.clone(),
                },
                EventKind::Beat,
            ),
            (
                Event::Note {
                    note: 60,
                    velocity: 100,
                    channel: 0,
                    source: source.clone(),
                },
                EventKind::Note,
            ),
            (
                Event::Control {
                    id: ControlId::Cc(7),
                    value: 0.5,
                    channel: 0,
                    source: source.clone(),
                },
                EventKind::Control,
            ),
            (
                Event::Transport {
                    state: TransportState::Play,
                    bpm: Some(120.0),
                    source: source.clone(),
                },
                EventKind::Transport,
            ),
            (
                Event::Frequency {
                    bands: BandEnergy::default(),
                    rms: 0.0,
                    source: source.clone(),
                },
                EventKind::Frequency,
            ),
            (
                Event::SysEx {
                    manufacturer: 0x7D,
                    payload: vec![0x01],
                    source: source.clone(),
                },
                EventKind::SysEx,
            ),
        ];
        for (event, kind) in &cases {
            assert_eq!(event.kind(), *kind);
            assert_eq!(event.source(), Some("midi"));
        }
        let device = Event::DeviceChange {
            name: "usb mic".to_string(),
            state: DeviceState::Connected,
        };
        assert_eq!(device.kind(), EventKind::DeviceChange);
        assert_eq!(device.source(), None);
    }

    #[test]
    fn events_round_trip_as_json() {
        let event = Event::Control {
            id: ControlId::PitchBend,
            value: 0.75,
            channel: 3,
            source: "midi".to_string(),
        };
        let wire = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, event);
    }
}
