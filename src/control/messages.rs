use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{ChannelFilter, RendererPref, VisualAudioSource};
use crate::render::RendererKind;

/// Wire envelope carried by every control transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEnvelope {
    pub command: String,
    #[serde(default)]
    pub data: Value,
}

impl ControlEnvelope {
    pub fn new(command: &str, data: Value) -> Self {
        Self {
            command: command.to_string(),
            data,
        }
    }

    pub fn bare(command: &str) -> Self {
        Self::new(command, Value::Null)
    }
}

/// Typed commands a control client can issue.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    SwitchMode(RendererKind),
    SwitchScene(u8),
    MilkdropNext,
    MilkdropPrev,
    MilkdropSelect(usize),
    AudioDeviceSelect(String),
    MidiSynthEnable(bool),
    MilkdropAudioSource(VisualAudioSource),
    MidiSynthChannel(ChannelFilter),
    MidiSynthAudible(bool),
    MidiInputSelect(String),
    SysexEnable(bool),
    RendererSelect(RendererPref),
    OscServer(String),
    RequestState,
}

impl ControlCommand {
    /// Parses an envelope; unknown commands and malformed data yield `None`
    /// and are logged, never surfaced as errors.
    pub fn parse(envelope: &ControlEnvelope) -> Option<Self> {
        let data = &envelope.data;
        let parsed = match envelope.command.as_str() {
            "switchMode" => RendererKind::from_wire_name(data.as_str()?).map(Self::SwitchMode),
            "switchScene" => data.as_u64().map(|s| Self::SwitchScene(s as u8)),
            "milkdropNext" => Some(Self::MilkdropNext),
            "milkdropPrev" => Some(Self::MilkdropPrev),
            "milkdropSelect" => data.as_u64().map(|i| Self::MilkdropSelect(i as usize)),
            "audioDeviceSelect" => data.as_str().map(|s| Self::AudioDeviceSelect(s.to_string())),
            "midiSynthEnable" => data.as_bool().map(Self::MidiSynthEnable),
            "milkdropAudioSource" => serde_json::from_value(data.clone())
                .ok()
                .map(Self::MilkdropAudioSource),
            "midiSynthChannel" => serde_json::from_value(data.clone())
                .ok()
                .map(Self::MidiSynthChannel),
            "midiSynthAudible" => data.as_bool().map(Self::MidiSynthAudible),
            "midiInputSelect" => data.as_str().map(|s| Self::MidiInputSelect(s.to_string())),
            "sysexEnable" => data.as_bool().map(Self::SysexEnable),
            "rendererSelect" => serde_json::from_value(data.clone())
                .ok()
                .map(Self::RendererSelect),
            "oscServer" => data.as_str().map(|s| Self::OscServer(s.to_string())),
            "requestState" => Some(Self::RequestState),
            other => {
                debug!("Unknown control command {:?}", other);
                None
            }
        };
        if parsed.is_none() {
            debug!(
                "Control command {:?} with unusable data {:?}",
                envelope.command, envelope.data
            );
        }
        parsed
    }

    pub fn to_envelope(&self) -> ControlEnvelope {
        match self {
            Self::SwitchMode(kind) => ControlEnvelope::new("switchMode", json!(kind.wire_name())),
            Self::SwitchScene(scene) => ControlEnvelope::new("switchScene", json!(scene)),
            Self::MilkdropNext => ControlEnvelope::bare("milkdropNext"),
            Self::MilkdropPrev => ControlEnvelope::bare("milkdropPrev"),
            Self::MilkdropSelect(index) => ControlEnvelope::new("milkdropSelect", json!(index)),
            Self::AudioDeviceSelect(name) => {
                ControlEnvelope::new("audioDeviceSelect", json!(name))
            }
            Self::MidiSynthEnable(on) => ControlEnvelope::new("midiSynthEnable", json!(on)),
            Self::MilkdropAudioSource(source) => {
                ControlEnvelope::new("milkdropAudioSource", json!(source))
            }
            Self::MidiSynthChannel(filter) => {
                ControlEnvelope::new("midiSynthChannel", json!(filter))
            }
            Self::MidiSynthAudible(on) => ControlEnvelope::new("midiSynthAudible", json!(on)),
            Self::MidiInputSelect(id) => ControlEnvelope::new("midiInputSelect", json!(id)),
            Self::SysexEnable(on) => ControlEnvelope::new("sysexEnable", json!(on)),
            Self::RendererSelect(pref) => ControlEnvelope::new("rendererSelect", json!(pref)),
            Self::OscServer(addr) => ControlEnvelope::new("oscServer", json!(addr)),
            Self::RequestState => ControlEnvelope::bare("requestState"),
        }
    }
}

/// Snapshot broadcast back to control clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub mode: String,
    pub scene: u8,
    pub milkdrop_index: usize,
    pub bpm: f32,
    pub song_position: u32,
    pub playing: bool,
    pub position_stale: bool,
    pub midi_synth_enabled: bool,
    pub midi_synth_audible: bool,
    pub audio_source: String,
    pub status: String,
}

pub fn state_update(state: &EngineState) -> ControlEnvelope {
    ControlEnvelope::new("stateUpdate", serde_json::to_value(state).unwrap_or(Value::Null))
}

pub fn preset_list(keys: &[String]) -> ControlEnvelope {
    ControlEnvelope::new("presetList", json!(keys))
}
