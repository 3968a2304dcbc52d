use std::sync::{Arc, Mutex};
use std::time::Instant;

use crossbeam_channel::Sender;
use log::{debug, info, warn};

use crate::audio::{AudioControl, SharedAnalyser};
use crate::config::{Settings, SettingsStore, VisualAudioSource};
use crate::control::messages::{
    preset_list, state_update, ControlCommand, ControlEnvelope, EngineState,
};
use crate::event::{ControlId, Event, TransportState};
use crate::host::GraphicsEvent;
use crate::midi::clock::ClockEstimator;
use crate::midi::phase::{PhaseInterpolator, PhaseSample};
use crate::midi::sysex::{parse_performance_command, PerformanceCommand, MANUFACTURER_EDUCATIONAL};
use crate::render::multiplexer::RendererMux;
use crate::render::{PresetHandle, RendererKind};
use crate::synth::SynthCommand;

/// Notes 60..=63 select builtin scenes directly from a keyboard.
const SCENE_NOTE_BASE: u8 = 60;
const SCENE_NOTE_TOP: u8 = 63;
/// CC 1 sweeps the milkdrop preset list.
const CC_PRESET_SWEEP: u8 = 1;

/// Owns the state machine that wires events to the active renderer, the
/// voice engine and the control surface.
pub struct Coordinator {
    mux: RendererMux,
    timing: Arc<Mutex<ClockEstimator>>,
    interpolator: PhaseInterpolator,
    synth_tx: Sender<SynthCommand>,
    audio_ctl: Sender<AudioControl>,
    outbound: Sender<ControlEnvelope>,
    settings: Settings,
    store: Option<SettingsStore>,
    mic_analyser: SharedAnalyser,
    synth_analyser: SharedAnalyser,
    midi_source: String,
    midi_synth_enabled: bool,
    milkdrop_keys: Vec<String>,
    milkdrop_index: usize,
    playing: bool,
    bpm: f32,
    position: u32,
    stale: bool,
    status: String,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mux: RendererMux,
        timing: Arc<Mutex<ClockEstimator>>,
        synth_tx: Sender<SynthCommand>,
        audio_ctl: Sender<AudioControl>,
        outbound: Sender<ControlEnvelope>,
        settings: Settings,
        store: Option<SettingsStore>,
        mic_analyser: SharedAnalyser,
        synth_analyser: SharedAnalyser,
        midi_source: String,
    ) -> Self {
        Self {
            mux,
            timing,
            interpolator: PhaseInterpolator::new(),
            synth_tx,
            audio_ctl,
            outbound,
            settings,
            store,
            mic_analyser,
            synth_analyser,
            midi_source,
            midi_synth_enabled: false,
            milkdrop_keys: Vec::new(),
            milkdrop_index: 0,
            playing: false,
            bpm: 120.0,
            position: 0,
            stale: false,
            status: "idle".to_string(),
        }
    }

    pub fn mux(&self) -> &RendererMux {
        &self.mux
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn milkdrop_index(&self) -> usize {
        self.milkdrop_index
    }

    pub fn engine_state(&self) -> EngineState {
        EngineState {
            mode: self
                .mux
                .active()
                .map(|k| k.wire_name().to_string())
                .unwrap_or_else(|| "none".to_string()),
            scene: self.settings.last_scene,
            milkdrop_index: self.milkdrop_index,
            bpm: self.bpm,
            song_position: self.position,
            playing: self.playing,
            position_stale: self.stale,
            midi_synth_enabled: self.midi_synth_enabled,
            midi_synth_audible: self.settings.midi_synth_audible,
            audio_source: match self.settings.visual_audio_source {
                VisualAudioSource::Microphone => "microphone".to_string(),
                VisualAudioSource::Midi => "midi".to_string(),
            },
            status: self.status.clone(),
        }
    }

    /// Installs the milkdrop preset key list and announces it.
    pub fn set_milkdrop_keys(&mut self, keys: Vec<String>) {
        self.milkdrop_index = 0;
        self.milkdrop_keys = keys;
        let _ = self.outbound.try_send(preset_list(&self.milkdrop_keys));
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            store.save(&self.settings);
        }
    }

    // Outbound is never waited on; a full queue drops the snapshot and the
    // next one carries the same information.
    fn broadcast_state(&self) {
        let _ = self.outbound.try_send(state_update(&self.engine_state()));
    }

    fn synth_accepts(&self, source: &str, channel: u8) -> bool {
        self.midi_synth_enabled
            && source == self.midi_source
            && self.settings.midi_synth_channel.accepts(channel)
    }

    /// Re-syncs the interpolator from the timing core's anchor.
    fn sync_anchor(&mut self) {
        if let Ok(timing) = self.timing.lock() {
            if let Some(anchor) = timing.anchor() {
                self.interpolator
                    .set_anchor(f64::from(anchor.position_sixteenths), anchor.at);
                self.interpolator.set_bpm(anchor.bpm);
                self.position = anchor.position_sixteenths;
            }
        }
    }

    /// Bus event entry point.
    pub fn handle_event(&mut self, event: &Event) {
        match event {
            Event::Beat {
                phase,
                intensity,
                source,
            } => {
                if source == &self.midi_source {
                    self.sync_anchor();
                }
                if self.midi_synth_enabled {
                    let _ = self.synth_tx.try_send(SynthCommand::Beat {
                        intensity: *intensity,
                    });
                }
                if let Some(renderer) = self.mux.active_backend() {
                    renderer.on_beat(*phase, *intensity);
                }
            }
            Event::Note {
                note,
                velocity,
                channel,
                source,
            } => {
                let from_midi = source == &self.midi_source;
                let scene_key = (SCENE_NOTE_BASE..=SCENE_NOTE_TOP).contains(note);
                if from_midi
                    && scene_key
                    && *velocity > 0
                    && self.mux.active() == Some(RendererKind::Builtin)
                {
                    self.switch_scene(note - SCENE_NOTE_BASE);
                    return;
                }
                if self.synth_accepts(source, *channel) {
                    let command = if *velocity > 0 {
                        SynthCommand::NoteOn {
                            note: *note,
                            velocity: *velocity,
                        }
                    } else {
                        SynthCommand::NoteOff { note: *note }
                    };
                    let _ = self.synth_tx.try_send(command);
                }
                if let Some(renderer) = self.mux.active_backend() {
                    renderer.on_note(*note, *velocity, *channel);
                }
            }
            Event::Control {
                id,
                value,
                channel,
                source,
            } => {
                if *id == ControlId::Cc(CC_PRESET_SWEEP)
                    && self.mux.active() == Some(RendererKind::Milkdrop)
                    && !self.milkdrop_keys.is_empty()
                {
                    let count = self.milkdrop_keys.len();
                    let index = ((value * count as f32) as usize).min(count - 1);
                    self.load_milkdrop(index);
                }
                if let ControlId::Cc(control) = id {
                    if self.synth_accepts(source, *channel) {
                        let _ = self.synth_tx.try_send(SynthCommand::ControlChange {
                            control: *control,
                            value: (value * 127.0).round() as u8,
                        });
                    }
                }
                if let Some(renderer) = self.mux.active_backend() {
                    renderer.on_control(*id, *value);
                }
            }
            Event::Transport { state, bpm, .. } => {
                if let Some(bpm) = bpm {
                    self.bpm = *bpm;
                    self.interpolator.set_bpm(*bpm);
                }
                match state {
                    TransportState::Play => {
                        self.playing = true;
                        self.sync_anchor();
                        self.status = "playing".to_string();
                    }
                    TransportState::Continue => {
                        self.playing = true;
                        self.sync_anchor();
                        self.status = "playing".to_string();
                    }
                    TransportState::Stop => {
                        self.playing = false;
                        self.status = "stopped".to_string();
                    }
                    TransportState::BpmUpdate => {}
                }
                self.broadcast_state();
            }
            Event::Frequency { bands, rms, .. } => {
                // Milkdrop consumes the analyser directly, not band events.
                if self.mux.active() != Some(RendererKind::Milkdrop) {
                    if let Some(renderer) = self.mux.active_backend() {
                        renderer.on_frequency(bands, *rms);
                    }
                }
            }
            Event::SysEx {
                manufacturer,
                payload,
                ..
            } => {
                if !self.settings.enable_sysex {
                    debug!("SysEx ignored, reception disabled");
                    return;
                }
                if *manufacturer != MANUFACTURER_EDUCATIONAL {
                    debug!("SysEx for manufacturer 0x{:02X} ignored", manufacturer);
                    return;
                }
                if let Some(command) = parse_performance_command(payload) {
                    self.apply_performance_command(command);
                }
            }
            Event::DeviceChange { name, state } => {
                info!("Device {} now {:?}", name, state);
                self.status = format!("device {} {:?}", name, state);
                self.broadcast_state();
            }
        }
    }

    fn apply_performance_command(&mut self, command: PerformanceCommand) {
        match command {
            PerformanceCommand::SwitchMode(kind) => self.switch_mode(kind),
            PerformanceCommand::LoadMilkdropPreset(index) => {
                if self.mux.active() == Some(RendererKind::Milkdrop) {
                    self.load_milkdrop(usize::from(index));
                }
            }
            PerformanceCommand::SwitchScene(scene) => self.switch_scene(scene),
            PerformanceCommand::MilkdropNext => self.milkdrop_step(1),
            PerformanceCommand::MilkdropPrev => self.milkdrop_step(-1),
        }
    }

    /// Control channel / OSC entry point.
    pub fn handle_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::SwitchMode(kind) => self.switch_mode(kind),
            ControlCommand::SwitchScene(scene) => self.switch_scene(scene),
            ControlCommand::MilkdropNext => self.milkdrop_step(1),
            ControlCommand::MilkdropPrev => self.milkdrop_step(-1),
            ControlCommand::MilkdropSelect(index) => self.load_milkdrop(index),
            ControlCommand::AudioDeviceSelect(name) => {
                self.settings.audio_input = Some(name.clone());
                self.persist();
                let _ = self.audio_ctl.send(AudioControl::SelectDevice(Some(name)));
            }
            ControlCommand::MidiSynthEnable(enabled) => {
                self.midi_synth_enabled = enabled;
                self.broadcast_state();
            }
            ControlCommand::MilkdropAudioSource(source) => {
                self.settings.visual_audio_source = source;
                self.persist();
                let _ = self
                    .audio_ctl
                    .send(AudioControl::SelectAnalyserSource(source));
                self.reconnect_milkdrop_audio();
                self.broadcast_state();
            }
            ControlCommand::MidiSynthChannel(filter) => {
                self.settings.midi_synth_channel = filter;
                self.persist();
            }
            ControlCommand::MidiSynthAudible(audible) => {
                self.settings.midi_synth_audible = audible;
                self.persist();
                let _ = self.synth_tx.try_send(SynthCommand::SetAudible(audible));
                self.broadcast_state();
            }
            ControlCommand::MidiInputSelect(id) => {
                self.settings.midi_input_id = Some(id);
                self.persist();
            }
            ControlCommand::SysexEnable(enabled) => {
                self.settings.enable_sysex = enabled;
                self.persist();
            }
            ControlCommand::RendererSelect(pref) => {
                self.settings.renderer = pref;
                self.persist();
            }
            ControlCommand::OscServer(addr) => {
                self.settings.osc_server = Some(addr);
                self.persist();
                self.status = "osc server change applies on restart".to_string();
                self.broadcast_state();
            }
            ControlCommand::RequestState => {
                let _ = self.outbound.try_send(preset_list(&self.milkdrop_keys));
                self.broadcast_state();
            }
        }
    }

    pub fn handle_graphics(&mut self, event: GraphicsEvent) {
        match event {
            GraphicsEvent::ContextLost => {
                self.mux.suspend_active();
                self.status = "graphics context lost".to_string();
            }
            GraphicsEvent::ContextRestored => {
                match self.mux.resume_active() {
                    Ok(()) => self.status = "running".to_string(),
                    Err(e) => {
                        warn!("Renderer failed to resume: {}", e);
                        self.status = format!("renderer unavailable: {}", e);
                    }
                }
            }
        }
        self.broadcast_state();
    }

    /// Render-tick entry point: samples the continuous phase and surfaces
    /// staleness instead of drifting silently.
    pub fn tick(&mut self, now: Instant) -> PhaseSample {
        let sample = self.interpolator.sample(now);
        self.position = sample.position.max(0.0) as u32;
        if self.playing && sample.stale != self.stale {
            self.stale = sample.stale;
            self.status = if sample.stale {
                "position stale".to_string()
            } else {
                "playing".to_string()
            };
            self.broadcast_state();
        }
        sample
    }

    pub fn switch_mode(&mut self, kind: RendererKind) {
        match self.mux.switch(kind) {
            Ok(()) => {
                // Preset handles go to the backend by value at switch time.
                match kind {
                    RendererKind::Builtin => {
                        let scene = self.settings.last_scene;
                        if let Some(renderer) = self.mux.backend(RendererKind::Builtin) {
                            renderer.load_preset(PresetHandle::Scene(scene));
                        }
                    }
                    RendererKind::Milkdrop => {
                        self.reconnect_milkdrop_audio();
                        if let Some(key) =
                            self.milkdrop_keys.get(self.milkdrop_index).cloned()
                        {
                            if let Some(renderer) = self.mux.backend(RendererKind::Milkdrop) {
                                renderer.load_preset(PresetHandle::MilkdropKey(key));
                            }
                        }
                    }
                    _ => {}
                }
                self.status = "running".to_string();
            }
            Err(e) => {
                warn!("Renderer switch to {:?} failed: {}", kind, e);
                self.status = format!("{} unavailable: {}", kind.wire_name(), e);
            }
        }
        self.broadcast_state();
    }

    pub fn switch_scene(&mut self, scene: u8) {
        self.settings.last_scene = scene;
        self.persist();
        if self.mux.active() == Some(RendererKind::Builtin) {
            if let Some(renderer) = self.mux.backend(RendererKind::Builtin) {
                renderer.load_preset(PresetHandle::Scene(scene));
            }
        }
        self.broadcast_state();
    }

    fn load_milkdrop(&mut self, index: usize) {
        if self.milkdrop_keys.is_empty() {
            return;
        }
        let index = index.min(self.milkdrop_keys.len() - 1);
        self.milkdrop_index = index;
        let key = self.milkdrop_keys[index].clone();
        if let Some(renderer) = self.mux.backend(RendererKind::Milkdrop) {
            renderer.load_preset(PresetHandle::MilkdropKey(key));
        }
        self.broadcast_state();
    }

    fn milkdrop_step(&mut self, step: isize) {
        if self.milkdrop_keys.is_empty() {
            return;
        }
        let count = self.milkdrop_keys.len() as isize;
        let next = (self.milkdrop_index as isize + step).rem_euclid(count);
        self.load_milkdrop(next as usize);
    }

    /// Milkdrop audio policy: the voice engine's analyser when the user
    /// selected the MIDI source, otherwise the microphone.
    fn reconnect_milkdrop_audio(&mut self) {
        let analyser = match self.settings.visual_audio_source {
            VisualAudioSource::Midi => self.synth_analyser.clone(),
            VisualAudioSource::Microphone => self.mic_analyser.clone(),
        };
        if let Some(renderer) = self.mux.backend(RendererKind::Milkdrop) {
            renderer.connect_audio(analyser);
        }
    }
}
