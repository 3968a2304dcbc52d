use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};

/// Application configuration loaded from config.toml
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct Config {
    /// UDP port for raw MIDI datagrams (default: 5004)
    pub midi_port: Option<u16>,
    /// UDP port for the OSC control surface (default: 9000)
    pub osc_port: Option<u16>,
    /// WebSocket relay for the remote control channel (optional)
    pub control_url: Option<String>,
    /// Audio input device name (optional, default: system default)
    pub audio_device: Option<String>,
    /// FFT window for the band analyser
    pub fft_size: Option<usize>,
    /// Band-event cadence in milliseconds
    pub analysis_interval_ms: Option<u64>,
    /// Spectrum smoothing coefficient
    pub smoothing: Option<f32>,
    /// Cap on SysEx reassembly, in bytes
    pub sysex_cap: Option<usize>,
    /// Where user settings are persisted
    pub settings_path: Option<String>,
    /// Log level (info, debug, etc.)
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Renderer implementation preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RendererPref {
    #[default]
    Webgl,
    Canvas2d,
}

/// Which audio feed drives the visualisers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VisualAudioSource {
    #[default]
    Microphone,
    Midi,
}

/// MIDI channel filter for the synth: every channel or exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFilter {
    All,
    Only(u8),
}

impl Default for ChannelFilter {
    fn default() -> Self {
        ChannelFilter::All
    }
}

impl ChannelFilter {
    pub fn accepts(&self, channel: u8) -> bool {
        match self {
            ChannelFilter::All => true,
            ChannelFilter::Only(only) => *only == channel,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChannelFilterRepr {
    Index(u8),
    Text(String),
}

impl Serialize for ChannelFilter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ChannelFilter::All => serializer.serialize_str("all"),
            ChannelFilter::Only(ch) => serializer.serialize_u8(*ch),
        }
    }
}

impl<'de> Deserialize<'de> for ChannelFilter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match ChannelFilterRepr::deserialize(deserializer)? {
            ChannelFilterRepr::Index(ch) if ch <= 15 => Ok(ChannelFilter::Only(ch)),
            ChannelFilterRepr::Index(ch) => Err(serde::de::Error::custom(format!(
                "MIDI channel {} out of range",
                ch
            ))),
            ChannelFilterRepr::Text(s) if s == "all" => Ok(ChannelFilter::All),
            ChannelFilterRepr::Text(s) => Err(serde::de::Error::custom(format!(
                "unknown channel filter {:?}",
                s
            ))),
        }
    }
}

/// User settings that survive restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub midi_input_id: Option<String>,
    pub renderer: RendererPref,
    pub osc_server: Option<String>,
    pub last_scene: u8,
    pub preset_type: Option<String>,
    pub enable_sysex: bool,
    pub audio_input: Option<String>,
    pub visual_audio_source: VisualAudioSource,
    pub midi_synth_channel: ChannelFilter,
    pub midi_synth_audible: bool,
}

/// Loads and saves `Settings` as TOML. Missing or unreadable files fall
/// back to defaults; save failures are logged, never fatal.
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Settings {
        match fs::read_to_string(&self.path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("Settings file {:?} unreadable: {}", self.path, e);
                    Settings::default()
                }
            },
            Err(_) => Settings::default(),
        }
    }

    pub fn save(&self, settings: &Settings) {
        match toml::to_string_pretty(settings) {
            Ok(content) => {
                if let Err(e) = fs::write(&self.path, content) {
                    warn!("Failed to persist settings to {:?}: {}", self.path, e);
                }
            }
            Err(e) => warn!("Failed to serialise settings: {}", e),
        }
    }
}
