pub mod audio;
pub mod bus;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod event;
pub mod host;
pub mod midi;
pub mod render;
pub mod synth;

pub use crate::config::Config;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use cpal::traits::StreamTrait;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{error, info, warn};

use crate::audio::analyser::BandAnalyser;
use crate::audio::{AudioControl, SharedAnalyser};
use crate::bus::FusionBus;
use crate::config::{SettingsStore, VisualAudioSource};
use crate::control::channel::{ControlChannel, Role};
use crate::control::messages::{ControlCommand, ControlEnvelope};
use crate::control::osc::{spawn_osc_listener, DEFAULT_OSC_PORT};
use crate::coordinator::Coordinator;
use crate::event::{DeviceState, Event};
use crate::host::{GraphicsEvent, HostProfile, NoopWakeLock, WakeLock};
use crate::midi::clock::ClockEstimator;
use crate::midi::listener::{spawn_midi_listener, DEFAULT_MIDI_PORT};
use crate::midi::parser::DEFAULT_SYSEX_CAP;
use crate::render::library::LibraryLoader;
use crate::render::multiplexer::RendererMux;
use crate::render::RendererKind;
use crate::synth::SynthCommand;

/// Source names on the fusion bus.
pub const MIDI_SOURCE: &str = "midi";
pub const MICROPHONE_SOURCE: &str = "microphone";
pub const SYNTH_SOURCE: &str = "synth";

/// Preset keys shipped with the bundled visualiser library.
const DEFAULT_MILKDROP_PRESETS: &[&str] = &[
    "spectrum-rings",
    "phase-tunnel",
    "particle-bloom",
    "waveform-lattice",
    "strobe-cascade",
    "aurora-field",
];

const RENDER_TICK: Duration = Duration::from_millis(16);

fn analyser_source_name(source: VisualAudioSource) -> &'static str {
    match source {
        VisualAudioSource::Microphone => MICROPHONE_SOURCE,
        VisualAudioSource::Midi => SYNTH_SOURCE,
    }
}

/// The performance engine. Constructed once at entry and threaded into
/// every subsystem; there are no process-wide globals.
pub struct Engine {
    config: Config,
    channel: ControlChannel,
    graphics_tx: Sender<GraphicsEvent>,
    graphics_rx: Receiver<GraphicsEvent>,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let (graphics_tx, graphics_rx) = bounded(16);
        Self {
            config,
            channel: ControlChannel::new(Role::Program),
            graphics_tx,
            graphics_rx,
        }
    }

    /// Handle for in-process control clients (UI widgets, tests).
    pub fn control_sender(&self) -> Sender<ControlEnvelope> {
        self.channel.sender()
    }

    /// Handle the host shell uses to report graphics-context events.
    pub fn graphics_sender(&self) -> Sender<GraphicsEvent> {
        self.graphics_tx.clone()
    }

    /// Runs the engine until `running` clears. Blocks the calling thread
    /// with the coordinator loop; everything else runs on service threads.
    pub fn run(mut self, running: Arc<AtomicBool>) -> Result<()> {
        info!("Engine starting");
        let profile = HostProfile::detect();
        let optimal = profile.optimal_settings();
        let fft_size = self.config.fft_size.unwrap_or(optimal.fft_size);
        let smoothing = self.config.smoothing.unwrap_or(0.0);
        let interval =
            Duration::from_millis(self.config.analysis_interval_ms.unwrap_or(50));
        let sysex_cap = self.config.sysex_cap.unwrap_or(DEFAULT_SYSEX_CAP);

        let store = SettingsStore::new(
            self.config
                .settings_path
                .clone()
                .unwrap_or_else(|| "settings.toml".to_string()),
        );
        let settings = store.load();
        let mut handles = Vec::new();
        // Keep the display awake for the duration of the performance.
        let mut wake_lock = NoopWakeLock;
        wake_lock.acquire();
        match audio::input::list_input_devices() {
            Ok(devices) => info!("Capture devices: {:?}", devices),
            Err(e) => warn!("Could not enumerate capture devices: {}", e),
        }

        let bus = Arc::new(Mutex::new(FusionBus::new()));
        let timing = Arc::new(Mutex::new(ClockEstimator::new(MIDI_SOURCE)));

        // --- Voice engine on the audio-output callback ---
        let (synth_tx, synth_rx) = bounded::<SynthCommand>(256);
        let (tap_tx, tap_rx) = bounded::<Vec<f32>>(8);
        let mut synth_sample_rate = 48_000.0;
        let _synth_stream = match synth::output::start_output(synth_rx, Some(tap_tx)) {
            Ok((stream, rate)) => {
                if let Err(e) = stream.play() {
                    error!("Failed to start synth output: {}", e);
                }
                synth_sample_rate = rate;
                Some(stream)
            }
            Err(e) => {
                warn!("Synth output unavailable: {}", e);
                None
            }
        };
        let _ = synth_tx.try_send(SynthCommand::SetAudible(settings.midi_synth_audible));

        // --- Microphone capture; the stream lives on its own thread ---
        let (mic_tx, mic_rx) = bounded::<Vec<f32>>(8);
        let (device_tx, device_rx) = bounded::<Option<String>>(4);
        let initial_device = settings
            .audio_input
            .clone()
            .or_else(|| self.config.audio_device.clone());
        let running_capture = running.clone();
        handles.push(thread::spawn(move || {
            let mut device = initial_device;
            while running_capture.load(Ordering::Relaxed) {
                match audio::input::start_capture(device.as_deref(), mic_tx.clone()) {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            error!("Failed to start capture: {}", e);
                        }
                        loop {
                            if !running_capture.load(Ordering::Relaxed) {
                                return;
                            }
                            match device_rx.recv_timeout(Duration::from_millis(200)) {
                                Ok(next) => {
                                    // Rebuild the stream on the new device.
                                    device = next;
                                    break;
                                }
                                Err(RecvTimeoutError::Timeout) => {}
                                Err(RecvTimeoutError::Disconnected) => return,
                            }
                        }
                    }
                    Err(e) => {
                        // Microphone denied or missing: capability stays off
                        // until another device is selected.
                        warn!("Microphone unavailable: {}", e);
                        match device_rx.recv_timeout(Duration::from_secs(1)) {
                            Ok(next) => device = next,
                            Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => return,
                        }
                    }
                }
            }
            info!("Audio capture stopped");
        }));

        // --- Band analysis cadence ---
        let mic_analyser = SharedAnalyser::new(BandAnalyser::new(fft_size, 48_000.0, smoothing)?);
        let synth_analyser =
            SharedAnalyser::new(BandAnalyser::new(fft_size, synth_sample_rate, smoothing)?);
        let (source_tx, source_rx) = bounded::<VisualAudioSource>(4);
        let initial_source = settings.visual_audio_source;
        {
            let mut bus = bus.lock().unwrap();
            bus.register_source(MIDI_SOURCE);
            bus.register_source(analyser_source_name(initial_source));
        }
        {
            let bus = bus.clone();
            let mic_analyser = mic_analyser.clone();
            let synth_analyser = synth_analyser.clone();
            let running = running.clone();
            handles.push(thread::spawn(move || {
                let mut selected = initial_source;
                while running.load(Ordering::Relaxed) {
                    let deadline = Instant::now() + interval;
                    while let Ok(frames) = mic_rx.try_recv() {
                        mic_analyser.push_samples(&frames);
                    }
                    while let Ok(frames) = tap_rx.try_recv() {
                        synth_analyser.push_samples(&frames);
                    }
                    while let Ok(next) = source_rx.try_recv() {
                        if next != selected {
                            let mut bus = bus.lock().unwrap();
                            bus.unregister_source(analyser_source_name(selected));
                            bus.register_source(analyser_source_name(next));
                            selected = next;
                        }
                    }
                    // Both stay fresh for direct consumers; only the
                    // selected source emits band events.
                    mic_analyser.analyse();
                    synth_analyser.analyse();
                    let active = match selected {
                        VisualAudioSource::Microphone => &mic_analyser,
                        VisualAudioSource::Midi => &synth_analyser,
                    };
                    let (bands, rms) = active.latest();
                    bus.lock().unwrap().publish(&Event::Frequency {
                        bands,
                        rms,
                        source: analyser_source_name(selected).to_string(),
                    });
                    thread::sleep(deadline.saturating_duration_since(Instant::now()));
                }
                info!("Analysis thread stopped");
            }));
        }

        // --- MIDI input ---
        handles.push(spawn_midi_listener(
            self.config.midi_port.unwrap_or(DEFAULT_MIDI_PORT),
            sysex_cap,
            MIDI_SOURCE.to_string(),
            bus.clone(),
            timing.clone(),
            running.clone(),
        ));

        // --- Control surfaces ---
        if let Some(url) = self.config.control_url.clone() {
            self.channel.connect_remote(&url, running.clone());
        }
        let osc_port = settings
            .osc_server
            .as_deref()
            .and_then(|s| s.parse::<u16>().ok())
            .or(self.config.osc_port)
            .unwrap_or(DEFAULT_OSC_PORT);
        match spawn_osc_listener(osc_port, self.channel.sender(), running.clone()) {
            Ok(handle) => handles.push(handle),
            Err(e) => warn!("OSC listener unavailable: {}", e),
        }

        // --- Coordinator wiring ---
        let (events_tx, events_rx) = bounded::<Event>(256);
        {
            let mut bus = bus.lock().unwrap();
            let events_tx = events_tx.clone();
            bus.subscribe_all(
                "coordinator",
                Box::new(move |event| {
                    events_tx
                        .try_send(event.clone())
                        .map_err(|_| anyhow::anyhow!("coordinator queue full"))
                }),
            );
        }
        let (outbound_tx, outbound_rx) = bounded::<ControlEnvelope>(64);
        let (audio_ctl_tx, audio_ctl_rx) = bounded::<AudioControl>(16);
        let mut coordinator = Coordinator::new(
            RendererMux::new(LibraryLoader::bundled()),
            timing,
            synth_tx,
            audio_ctl_tx,
            outbound_tx,
            settings,
            Some(store),
            mic_analyser,
            synth_analyser,
            MIDI_SOURCE.to_string(),
        );
        coordinator.set_milkdrop_keys(
            DEFAULT_MILKDROP_PRESETS
                .iter()
                .map(|k| k.to_string())
                .collect(),
        );
        coordinator.switch_mode(RendererKind::Builtin);

        // --- Coordinator loop, doubling as the render tick ---
        let incoming = self.channel.incoming();
        while running.load(Ordering::Relaxed) {
            let frame_deadline = Instant::now() + RENDER_TICK;
            while let Ok(envelope) = incoming.try_recv() {
                if let Some(command) = ControlCommand::parse(&envelope) {
                    coordinator.handle_command(command);
                }
            }
            while let Ok(event) = events_rx.try_recv() {
                coordinator.handle_event(&event);
            }
            while let Ok(action) = audio_ctl_rx.try_recv() {
                match action {
                    AudioControl::SelectDevice(device) => {
                        let name = device.clone().unwrap_or_else(|| "default".to_string());
                        let _ = device_tx.try_send(device);
                        bus.lock().unwrap().publish(&Event::DeviceChange {
                            name,
                            state: DeviceState::Connected,
                        });
                    }
                    AudioControl::SelectAnalyserSource(source) => {
                        let _ = source_tx.try_send(source);
                    }
                }
            }
            while let Ok(event) = self.graphics_rx.try_recv() {
                coordinator.handle_graphics(event);
            }
            while let Ok(envelope) = outbound_rx.try_recv() {
                self.channel.broadcast(&envelope);
            }
            coordinator.tick(Instant::now());
            thread::sleep(frame_deadline.saturating_duration_since(Instant::now()));
        }

        info!("Engine stopping");
        for handle in handles {
            let _ = handle.join();
        }
        self.channel.join();
        wake_lock.release();
        info!("All service threads joined");
        Ok(())
    }
}
