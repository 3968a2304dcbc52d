pub mod output;
pub mod voice;

use crossbeam_channel::{Receiver, Sender};
use log::debug;

use crate::synth::voice::{KickDrum, Voice};

pub const VOICE_COUNT: usize = 8;

/// Master gain CC.
const CC_VOLUME: u8 = 7;

/// Commands crossing from the coordinator thread into the audio callback.
/// The queue is bounded; the callback side only ever `try_recv`s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SynthCommand {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    Beat { intensity: f32 },
    ControlChange { control: u8, value: u8 },
    SetAudible(bool),
}

/// 8-voice polyphonic synthesiser.
///
/// `process` runs on the audio callback thread: it drains the command
/// queue, enforces voice deadlines, and renders the mix. The speaker leg
/// obeys `audible`; the analyser tap always receives the mix.
pub struct SynthEngine {
    voices: [Voice; VOICE_COUNT],
    kick: KickDrum,
    master_gain: f32,
    audible: bool,
    commands: Receiver<SynthCommand>,
    tap: Option<Sender<Vec<f32>>>,
    sample_clock: u64,
    sample_rate: f32,
    next_generation: u64,
}

impl SynthEngine {
    pub fn new(sample_rate: f32, commands: Receiver<SynthCommand>) -> Self {
        Self {
            voices: std::array::from_fn(|_| Voice::idle(sample_rate)),
            kick: KickDrum::new(sample_rate),
            master_gain: 0.5,
            audible: true,
            commands,
            tap: None,
            sample_clock: 0,
            sample_rate,
            next_generation: 1,
        }
    }

    /// Adds the analyser tap; mono frames are pushed per `process` call.
    pub fn with_analyser_tap(mut self, tap: Sender<Vec<f32>>) -> Self {
        self.tap = Some(tap);
        self
    }

    /// Current note per pool slot, for displays and tests.
    pub fn voice_notes(&self) -> [Option<u8>; VOICE_COUNT] {
        std::array::from_fn(|i| {
            let v = &self.voices[i];
            if v.is_idle() {
                None
            } else {
                Some(v.note())
            }
        })
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn is_audible(&self) -> bool {
        self.audible
    }

    fn note_on(&mut self, note: u8, velocity: u8) {
        // First idle slot, else steal slot 0: the pool is allocated once,
        // so slot 0 is the oldest by construction.
        let slot = self
            .voices
            .iter()
            .position(Voice::is_idle)
            .unwrap_or(0);
        if !self.voices[slot].is_idle() {
            debug!("Voice pool full, stealing slot {}", slot);
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        self.voices[slot].assign(note, velocity, self.sample_rate, self.sample_clock, generation);
    }

    fn note_off(&mut self, note: u8) {
        if let Some(v) = self
            .voices
            .iter_mut()
            .find(|v| v.is_held() && v.note() == note)
        {
            v.begin_release();
        }
        // A note stolen away earlier has no matching voice: no-op.
    }

    fn apply(&mut self, command: SynthCommand) {
        match command {
            SynthCommand::NoteOn { note, velocity } => self.note_on(note, velocity),
            SynthCommand::NoteOff { note } => self.note_off(note),
            SynthCommand::Beat { intensity } => self.kick.trigger(intensity),
            SynthCommand::ControlChange { control, value } => {
                if control == CC_VOLUME {
                    self.master_gain = f32::from(value) / 127.0 * 0.5;
                }
            }
            SynthCommand::SetAudible(audible) => self.audible = audible,
        }
    }

    /// Renders `frames` interleaved frames into `output`.
    ///
    /// Wait-free with respect to the producer: commands are drained with
    /// `try_recv` and the tap is fed with `try_send`.
    pub fn process(&mut self, output: &mut [f32], channels: usize) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }
        for v in self.voices.iter_mut() {
            v.check_deadline(self.sample_clock);
        }

        let frames = if channels == 0 {
            0
        } else {
            output.len() / channels
        };
        let mut tap_frames = self
            .tap
            .as_ref()
            .map(|_| Vec::with_capacity(frames));
        for frame in 0..frames {
            let mut mix: f32 = self.voices.iter_mut().map(Voice::render).sum();
            mix += self.kick.render();
            mix *= self.master_gain;
            if let Some(buf) = tap_frames.as_mut() {
                buf.push(mix);
            }
            let out = if self.audible { mix } else { 0.0 };
            for ch in 0..channels {
                output[frame * channels + ch] = out;
            }
            self.sample_clock += 1;
        }
        if let (Some(tap), Some(buf)) = (self.tap.as_ref(), tap_frames) {
            // Dropped frames are fine; the analyser only needs recency.
            let _ = tap.try_send(buf);
        }
    }
}
