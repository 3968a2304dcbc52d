//! Coordinator-level scenarios: mode switching from the control channel,
//! preset sweeps, SysEx steering and graphics-context recovery.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver};
use serde_json::json;

use pulsevis::audio::analyser::BandAnalyser;
use pulsevis::audio::{AudioControl, SharedAnalyser};
use pulsevis::config::{Settings, VisualAudioSource};
use pulsevis::control::messages::{ControlCommand, ControlEnvelope, EngineState};
use pulsevis::coordinator::Coordinator;
use pulsevis::event::{ControlId, Event};
use pulsevis::host::GraphicsEvent;
use pulsevis::midi::clock::ClockEstimator;
use pulsevis::render::library::LibraryLoader;
use pulsevis::render::multiplexer::RendererMux;
use pulsevis::render::RendererKind;
use pulsevis::synth::SynthCommand;

const PRESETS: [&str; 6] = [
    "alpha", "beta", "gamma", "delta", "epsilon", "zeta",
];

struct Rig {
    coordinator: Coordinator,
    outbound: Receiver<ControlEnvelope>,
    synth: Receiver<SynthCommand>,
    audio_ctl: Receiver<AudioControl>,
}

fn rig_with(settings: Settings) -> Rig {
    let (synth_tx, synth_rx) = bounded(64);
    let (audio_tx, audio_rx) = bounded(16);
    let (outbound_tx, outbound_rx) = bounded(64);
    let analyser = || {
        SharedAnalyser::new(BandAnalyser::new(1024, 48_000.0, 0.0).unwrap())
    };
    let mut coordinator = Coordinator::new(
        RendererMux::new(LibraryLoader::bundled()),
        Arc::new(Mutex::new(ClockEstimator::new("midi"))),
        synth_tx,
        audio_tx,
        outbound_tx,
        settings,
        None,
        analyser(),
        analyser(),
        "midi".to_string(),
    );
    coordinator.set_milkdrop_keys(PRESETS.iter().map(|k| k.to_string()).collect());
    coordinator.switch_mode(RendererKind::Builtin);
    let rig = Rig {
        coordinator,
        outbound: outbound_rx,
        synth: synth_rx,
        audio_ctl: audio_rx,
    };
    // Drain the wiring chatter (presetList, initial stateUpdate).
    while rig.outbound.try_recv().is_ok() {}
    rig
}

fn rig() -> Rig {
    rig_with(Settings::default())
}

fn last_state(outbound: &Receiver<ControlEnvelope>) -> Option<EngineState> {
    let mut state = None;
    while let Ok(envelope) = outbound.try_recv() {
        if envelope.command == "stateUpdate" {
            state = serde_json::from_value(envelope.data).ok();
        }
    }
    state
}

#[test]
fn mode_switch_round_trip_with_preset_sweep() {
    let mut rig = rig();
    let envelope = ControlEnvelope::new("switchMode", json!("milkdrop"));
    let command = ControlCommand::parse(&envelope).unwrap();
    rig.coordinator.handle_command(command);

    // Milkdrop visible, previous renderer stopped, state broadcast once.
    let mux = rig.coordinator.mux();
    assert_eq!(mux.active(), Some(RendererKind::Milkdrop));
    assert_eq!(mux.visible_count(), 1);
    assert!(mux.canvas(RendererKind::Milkdrop).unwrap().visible);
    assert!(!mux.canvas(RendererKind::Builtin).unwrap().visible);
    let state = last_state(&rig.outbound).expect("stateUpdate after switch");
    assert_eq!(state.mode, "milkdrop");

    // CC 1 at 64/127 sweeps to preset floor(64/127 * 6) = 3.
    rig.coordinator.handle_event(&Event::Control {
        id: ControlId::Cc(1),
        value: 64.0 / 127.0,
        channel: 0,
        source: "midi".to_string(),
    });
    assert_eq!(rig.coordinator.milkdrop_index(), 3);
}

#[test]
fn scene_notes_switch_builtin_scenes() {
    let mut rig = rig();
    rig.coordinator.handle_event(&Event::Note {
        note: 62,
        velocity: 100,
        channel: 0,
        source: "midi".to_string(),
    });
    assert_eq!(rig.coordinator.settings().last_scene, 2);
    // A note-off on the same key changes nothing.
    rig.coordinator.handle_event(&Event::Note {
        note: 63,
        velocity: 0,
        channel: 0,
        source: "midi".to_string(),
    });
    assert_eq!(rig.coordinator.settings().last_scene, 2);
}

#[test]
fn notes_route_to_the_synth_when_enabled() {
    let mut rig = rig();
    rig.coordinator
        .handle_command(ControlCommand::MidiSynthEnable(true));
    rig.coordinator.handle_event(&Event::Note {
        note: 40,
        velocity: 90,
        channel: 0,
        source: "midi".to_string(),
    });
    assert_eq!(
        rig.synth.try_recv(),
        Ok(SynthCommand::NoteOn {
            note: 40,
            velocity: 90
        })
    );
    rig.coordinator.handle_event(&Event::Note {
        note: 40,
        velocity: 0,
        channel: 0,
        source: "midi".to_string(),
    });
    assert_eq!(rig.synth.try_recv(), Ok(SynthCommand::NoteOff { note: 40 }));

    // Non-MIDI sources never reach the synth.
    rig.coordinator.handle_event(&Event::Note {
        note: 41,
        velocity: 90,
        channel: 0,
        source: "network".to_string(),
    });
    assert!(rig.synth.try_recv().is_err());
}

#[test]
fn channel_filter_gates_the_synth() {
    let mut rig = rig();
    rig.coordinator
        .handle_command(ControlCommand::MidiSynthEnable(true));
    rig.coordinator.handle_command(ControlCommand::MidiSynthChannel(
        pulsevis::config::ChannelFilter::Only(5),
    ));
    rig.coordinator.handle_event(&Event::Note {
        note: 40,
        velocity: 90,
        channel: 3,
        source: "midi".to_string(),
    });
    assert!(rig.synth.try_recv().is_err());
    rig.coordinator.handle_event(&Event::Note {
        note: 40,
        velocity: 90,
        channel: 5,
        source: "midi".to_string(),
    });
    assert!(rig.synth.try_recv().is_ok());
}

#[test]
fn sysex_commands_steer_the_show() {
    let mut settings = Settings::default();
    settings.enable_sysex = true;
    let mut rig = rig_with(settings);

    // 0x01 0x02: switch to milkdrop.
    rig.coordinator.handle_event(&Event::SysEx {
        manufacturer: 0x7D,
        payload: vec![0x01, 0x02],
        source: "midi".to_string(),
    });
    assert_eq!(
        rig.coordinator.mux().active(),
        Some(RendererKind::Milkdrop)
    );

    // 0x02 msb lsb: select a preset while milkdrop is active.
    rig.coordinator.handle_event(&Event::SysEx {
        manufacturer: 0x7D,
        payload: vec![0x02, 0x00, 0x04],
        source: "midi".to_string(),
    });
    assert_eq!(rig.coordinator.milkdrop_index(), 4);

    // 0x10 / 0x11: next wraps, prev returns.
    rig.coordinator.handle_event(&Event::SysEx {
        manufacturer: 0x7D,
        payload: vec![0x10],
        source: "midi".to_string(),
    });
    assert_eq!(rig.coordinator.milkdrop_index(), 5);
    rig.coordinator.handle_event(&Event::SysEx {
        manufacturer: 0x7D,
        payload: vec![0x10],
        source: "midi".to_string(),
    });
    assert_eq!(rig.coordinator.milkdrop_index(), 0);
    rig.coordinator.handle_event(&Event::SysEx {
        manufacturer: 0x7D,
        payload: vec![0x11],
        source: "midi".to_string(),
    });
    assert_eq!(rig.coordinator.milkdrop_index(), 5);
}

#[test]
fn sysex_is_inert_until_enabled() {
    let mut rig = rig();
    rig.coordinator.handle_event(&Event::SysEx {
        manufacturer: 0x7D,
        payload: vec![0x01, 0x02],
        source: "midi".to_string(),
    });
    assert_eq!(rig.coordinator.mux().active(), Some(RendererKind::Builtin));
}

#[test]
fn context_loss_recovery_keeps_the_mode() {
    let mut rig = rig();
    rig.coordinator
        .handle_command(ControlCommand::SwitchMode(RendererKind::Milkdrop));
    rig.coordinator.handle_graphics(GraphicsEvent::ContextLost);
    assert_eq!(rig.coordinator.mux().visible_count(), 0);

    rig.coordinator
        .handle_graphics(GraphicsEvent::ContextRestored);
    let mux = rig.coordinator.mux();
    assert_eq!(mux.active(), Some(RendererKind::Milkdrop));
    assert_eq!(mux.visible_count(), 1);
}

#[test]
fn audio_source_choice_reaches_the_engine() {
    let mut rig = rig();
    rig.coordinator
        .handle_command(ControlCommand::MilkdropAudioSource(VisualAudioSource::Midi));
    assert_eq!(
        rig.audio_ctl.try_recv(),
        Ok(AudioControl::SelectAnalyserSource(VisualAudioSource::Midi))
    );
    let state = last_state(&rig.outbound).unwrap();
    assert_eq!(state.audio_source, "midi");
}

#[test]
fn request_state_answers_with_presets_and_state() {
    let mut rig = rig();
    rig.coordinator.handle_command(ControlCommand::RequestState);
    let mut saw_presets = false;
    let mut saw_state = false;
    while let Ok(envelope) = rig.outbound.try_recv() {
        match envelope.command.as_str() {
            "presetList" => {
                let keys: Vec<String> = serde_json::from_value(envelope.data).unwrap();
                assert_eq!(keys.len(), PRESETS.len());
                saw_presets = true;
            }
            "stateUpdate" => saw_state = true,
            _ => {}
        }
    }
    assert!(saw_presets && saw_state);
}

#[test]
fn stale_position_is_surfaced_not_hidden() {
    let mut rig = rig();
    // Transport starts playing with no anchor refresh afterwards.
    rig.coordinator.handle_event(&Event::Transport {
        state: pulsevis::event::TransportState::Play,
        bpm: Some(120.0),
        source: "midi".to_string(),
    });
    while rig.outbound.try_recv().is_ok() {}
    let sample = rig
        .coordinator
        .tick(Instant::now() + std::time::Duration::from_secs(6));
    assert!(sample.stale);
    let state = last_state(&rig.outbound).unwrap();
    assert!(state.position_stale);
    assert_eq!(state.status, "position stale");
}
