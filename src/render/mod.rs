pub mod backends;
pub mod library;
pub mod multiplexer;

use serde::{Deserialize, Serialize};

use crate::audio::SharedAnalyser;
use crate::event::{BandEnergy, ControlId};
use crate::render::library::LibraryId;

/// The renderer variants the multiplexer can switch between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RendererKind {
    Builtin,
    ThreeD,
    Milkdrop,
    Video,
    Blank,
}

impl RendererKind {
    /// Library that must be active before this renderer can start.
    pub fn required_library(&self) -> Option<LibraryId> {
        match self {
            RendererKind::Milkdrop => Some(LibraryId::MusicVisualiser),
            RendererKind::ThreeD => Some(LibraryId::SceneToolkit),
            _ => None,
        }
    }

    /// Wire name used by the control channel and the OSC surface.
    pub fn wire_name(&self) -> &'static str {
        match self {
            RendererKind::Builtin => "builtin",
            RendererKind::ThreeD => "threejs",
            RendererKind::Milkdrop => "milkdrop",
            RendererKind::Video => "video",
            RendererKind::Blank => "blank",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "builtin" => Some(RendererKind::Builtin),
            "threejs" | "3d" => Some(RendererKind::ThreeD),
            "milkdrop" => Some(RendererKind::Milkdrop),
            "video" => Some(RendererKind::Video),
            "blank" => Some(RendererKind::Blank),
            _ => None,
        }
    }
}

/// Canvas handle owned by the multiplexer. Drawing itself lives behind the
/// renderer backends; the engine only manages geometry and visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub visible: bool,
}

impl Canvas {
    pub fn hidden() -> Self {
        Self {
            width: 0,
            height: 0,
            visible: false,
        }
    }
}

/// Preset data handed to a renderer by value at switch time; backends never
/// hold a reference back into the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresetHandle {
    Scene(u8),
    MilkdropKey(String),
    MediaUrl(String),
}

/// Capability surface every renderer backend presents.
pub trait Renderer: Send {
    fn initialise(&mut self) -> anyhow::Result<()>;
    fn start(&mut self);
    fn stop(&mut self);
    fn resize(&mut self, width: u32, height: u32);
    fn on_beat(&mut self, phase: f32, intensity: f32);
    fn on_note(&mut self, note: u8, velocity: u8, channel: u8);
    fn on_control(&mut self, id: ControlId, value: f32);
    fn on_frequency(&mut self, bands: &BandEnergy, rms: f32) {
        let _ = (bands, rms);
    }
    fn connect_audio(&mut self, analyser: SharedAnalyser) {
        let _ = analyser;
    }
    fn load_preset(&mut self, preset: PresetHandle) {
        let _ = preset;
    }
    fn dispose(&mut self);
}
