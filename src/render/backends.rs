//! Renderer backends. The drawing bodies (scene presets, the external
//! visualiser, raw-canvas primitives, camera capture) are replaceable hosts
//! behind the `Renderer` trait; these implementations carry the state and
//! behaviour the engine itself owns.

use log::{debug, info};

use crate::audio::SharedAnalyser;
use crate::event::{BandEnergy, ControlId};
use crate::render::{PresetHandle, Renderer, RendererKind};

pub const BUILTIN_SCENE_COUNT: u8 = 5;

/// Scene-based renderer driven by beat/note/band events.
pub struct BuiltinRenderer {
    running: bool,
    scene: u8,
    size: (u32, u32),
    last_beat: (f32, f32),
    last_bands: BandEnergy,
    last_rms: f32,
}

impl BuiltinRenderer {
    pub fn new() -> Self {
        Self {
            running: false,
            scene: 0,
            size: (0, 0),
            last_beat: (0.0, 0.0),
            last_bands: BandEnergy::default(),
            last_rms: 0.0,
        }
    }

    pub fn scene(&self) -> u8 {
        self.scene
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.size
    }

    /// Latest beat pulse, for scene bodies that animate on it.
    pub fn pulse(&self) -> (f32, f32) {
        self.last_beat
    }

    pub fn spectrum(&self) -> (BandEnergy, f32) {
        (self.last_bands, self.last_rms)
    }
}

impl Default for BuiltinRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for BuiltinRenderer {
    fn initialise(&mut self) -> anyhow::Result<()> {
        info!("Builtin renderer initialised");
        Ok(())
    }
    fn start(&mut self) {
        self.running = true;
    }
    fn stop(&mut self) {
        self.running = false;
    }
    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }
    fn on_beat(&mut self, phase: f32, intensity: f32) {
        self.last_beat = (phase, intensity);
    }
    fn on_note(&mut self, note: u8, velocity: u8, channel: u8) {
        debug!("Builtin note {} vel {} ch {}", note, velocity, channel);
    }
    fn on_control(&mut self, _id: ControlId, _value: f32) {}
    fn on_frequency(&mut self, bands: &BandEnergy, rms: f32) {
        self.last_bands = *bands;
        self.last_rms = rms;
    }
    fn load_preset(&mut self, preset: PresetHandle) {
        if let PresetHandle::Scene(scene) = preset {
            if scene < BUILTIN_SCENE_COUNT {
                self.scene = scene;
            }
        }
    }
    fn dispose(&mut self) {
        self.running = false;
    }
}

/// Milkdrop-style renderer: consumes the audio analyser directly instead of
/// per-frame band events.
pub struct MilkdropRenderer {
    running: bool,
    analyser: Option<SharedAnalyser>,
    current_preset: Option<String>,
}

impl MilkdropRenderer {
    pub fn new() -> Self {
        Self {
            running: false,
            analyser: None,
            current_preset: None,
        }
    }

    pub fn current_preset(&self) -> Option<&str> {
        self.current_preset.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn has_audio(&self) -> bool {
        self.analyser.is_some()
    }
}

impl Default for MilkdropRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for MilkdropRenderer {
    fn initialise(&mut self) -> anyhow::Result<()> {
        info!("Milkdrop renderer initialised");
        Ok(())
    }
    fn start(&mut self) {
        self.running = true;
    }
    fn stop(&mut self) {
        self.running = false;
    }
    fn resize(&mut self, _width: u32, _height: u32) {}
    fn on_beat(&mut self, _phase: f32, _intensity: f32) {}
    fn on_note(&mut self, _note: u8, _velocity: u8, _channel: u8) {}
    fn on_control(&mut self, _id: ControlId, _value: f32) {}
    fn connect_audio(&mut self, analyser: SharedAnalyser) {
        self.analyser = Some(analyser);
    }
    fn load_preset(&mut self, preset: PresetHandle) {
        if let PresetHandle::MilkdropKey(key) = preset {
            info!("Milkdrop preset: {}", key);
            self.current_preset = Some(key);
        }
    }
    fn dispose(&mut self) {
        self.running = false;
        self.analyser = None;
    }
}

/// 3D scene renderer; the preset bodies live in the external scene toolkit.
pub struct ThreeDRenderer {
    running: bool,
    scene: u8,
}

impl ThreeDRenderer {
    pub fn new() -> Self {
        Self {
            running: false,
            scene: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn scene(&self) -> u8 {
        self.scene
    }
}

impl Default for ThreeDRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for ThreeDRenderer {
    fn initialise(&mut self) -> anyhow::Result<()> {
        info!("3D renderer initialised");
        Ok(())
    }
    fn start(&mut self) {
        self.running = true;
    }
    fn stop(&mut self) {
        self.running = false;
    }
    fn resize(&mut self, _width: u32, _height: u32) {}
    fn on_beat(&mut self, _phase: f32, _intensity: f32) {}
    fn on_note(&mut self, _note: u8, _velocity: u8, _channel: u8) {}
    fn on_control(&mut self, _id: ControlId, _value: f32) {}
    fn load_preset(&mut self, preset: PresetHandle) {
        if let PresetHandle::Scene(scene) = preset {
            self.scene = scene;
        }
    }
    fn dispose(&mut self) {
        self.running = false;
    }
}

/// Video playback surface; the media pipeline is host-provided.
pub struct VideoRenderer {
    running: bool,
    url: Option<String>,
}

impl VideoRenderer {
    pub fn new() -> Self {
        Self {
            running: false,
            url: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn source(&self) -> Option<&str> {
        self.url.as_deref()
    }
}

impl Default for VideoRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for VideoRenderer {
    fn initialise(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
    fn start(&mut self) {
        self.running = true;
    }
    fn stop(&mut self) {
        self.running = false;
    }
    fn resize(&mut self, _width: u32, _height: u32) {}
    fn on_beat(&mut self, _phase: f32, _intensity: f32) {}
    fn on_note(&mut self, _note: u8, _velocity: u8, _channel: u8) {}
    fn on_control(&mut self, _id: ControlId, _value: f32) {}
    fn load_preset(&mut self, preset: PresetHandle) {
        if let PresetHandle::MediaUrl(url) = preset {
            info!("Video source: {}", url);
            self.url = Some(url);
        }
    }
    fn dispose(&mut self) {
        self.running = false;
        self.url = None;
    }
}

/// Black screen.
pub struct BlankRenderer {
    running: bool,
}

impl BlankRenderer {
    pub fn new() -> Self {
        Self { running: false }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl Default for BlankRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for BlankRenderer {
    fn initialise(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
    fn start(&mut self) {
        self.running = true;
    }
    fn stop(&mut self) {
        self.running = false;
    }
    fn resize(&mut self, _width: u32, _height: u32) {}
    fn on_beat(&mut self, _phase: f32, _intensity: f32) {}
    fn on_note(&mut self, _note: u8, _velocity: u8, _channel: u8) {}
    fn on_control(&mut self, _id: ControlId, _value: f32) {}
    fn dispose(&mut self) {
        self.running = false;
    }
}

/// Default backend factory used by the engine.
pub fn create_backend(kind: RendererKind) -> Box<dyn Renderer> {
    match kind {
        RendererKind::Builtin => Box::new(BuiltinRenderer::new()),
        RendererKind::Milkdrop => Box::new(MilkdropRenderer::new()),
        RendererKind::ThreeD => Box::new(ThreeDRenderer::new()),
        RendererKind::Video => Box::new(VideoRenderer::new()),
        RendererKind::Blank => Box::new(BlankRenderer::new()),
    }
}
