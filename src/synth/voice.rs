use std::f32::consts::TAU;

/// Envelope timing, in seconds.
const ATTACK: f32 = 0.010;
const DECAY: f32 = 0.090;
const SUSTAIN: f32 = 1.900;
const RELEASE: f32 = 0.300;
/// A voice that never receives its note-off is force-released this long
/// after assignment.
pub const SAFETY_TIMEOUT: f32 = 2.4;

/// Level ratios relative to the velocity peak `g`.
const DECAY_TARGET: f32 = 0.7;
const SUSTAIN_TARGET: f32 = 0.5;
/// Exponential release aims at this fraction of its starting level.
const RELEASE_FLOOR: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sawtooth,
    Square,
    Sine,
}

/// Phase-accumulator oscillator, one per partial.
#[derive(Debug, Clone, Copy)]
pub struct Oscillator {
    waveform: Waveform,
    phase: f32,
    step: f32,
    gain: f32,
}

impl Oscillator {
    fn new(waveform: Waveform, freq: f32, gain: f32, sample_rate: f32) -> Self {
        Self {
            waveform,
            phase: 0.0,
            step: freq / sample_rate,
            gain,
        }
    }

    fn tick(&mut self) -> f32 {
        let sample = match self.waveform {
            Waveform::Sawtooth => 2.0 * self.phase - 1.0,
            Waveform::Square => {
                if self.phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sine => (TAU * self.phase).sin(),
        };
        self.phase += self.step;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        sample * self.gain
    }
}

pub fn note_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((f32::from(note) - 69.0) / 12.0)
}

/// One slot of the fixed voice pool.
///
/// A voice is either idle with no live oscillators or fully assigned; the
/// safety deadline and steal generation belong to the current assignment and
/// are overwritten on reassignment, so a deadline can never tear down a
/// stolen-and-reassigned voice.
#[derive(Debug, Clone, Copy)]
pub struct Voice {
    note: u8,
    velocity: u8,
    stage: EnvelopeStage,
    stage_elapsed: f32,
    peak: f32,
    release_from: f32,
    oscillators: [Oscillator; 3],
    generation: u64,
    assigned_at: u64,
    deadline: u64,
    inv_sample_rate: f32,
}

impl Voice {
    pub fn idle(sample_rate: f32) -> Self {
        Self {
            note: 0,
            velocity: 0,
            stage: EnvelopeStage::Idle,
            stage_elapsed: 0.0,
            peak: 0.0,
            release_from: 0.0,
            oscillators: [
                Oscillator::new(Waveform::Sawtooth, 440.0, 0.0, sample_rate),
                Oscillator::new(Waveform::Square, 440.0, 0.0, sample_rate),
                Oscillator::new(Waveform::Sine, 220.0, 0.0, sample_rate),
            ],
            generation: 0,
            assigned_at: 0,
            deadline: 0,
            inv_sample_rate: 1.0 / sample_rate,
        }
    }

    /// Assigns the slot to a note: main sawtooth at f, detuned square at
    /// 1.005f, sub-octave sine at f/2, peak gain (velocity/127)·0.6.
    pub fn assign(
        &mut self,
        note: u8,
        velocity: u8,
        sample_rate: f32,
        now_samples: u64,
        generation: u64,
    ) {
        let f = note_to_freq(note);
        self.note = note;
        self.velocity = velocity;
        self.stage = EnvelopeStage::Attack;
        self.stage_elapsed = 0.0;
        self.peak = f32::from(velocity) / 127.0 * 0.6;
        self.release_from = 0.0;
        self.oscillators = [
            Oscillator::new(Waveform::Sawtooth, f, 0.5, sample_rate),
            Oscillator::new(Waveform::Square, f * 1.005, 0.3, sample_rate),
            Oscillator::new(Waveform::Sine, f * 0.5, 0.4, sample_rate),
        ];
        self.generation = generation;
        self.assigned_at = now_samples;
        self.deadline = now_samples + (SAFETY_TIMEOUT * sample_rate) as u64;
        self.inv_sample_rate = 1.0 / sample_rate;
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn assigned_at(&self) -> u64 {
        self.assigned_at
    }

    pub fn is_idle(&self) -> bool {
        self.stage == EnvelopeStage::Idle
    }

    pub fn is_held(&self) -> bool {
        matches!(
            self.stage,
            EnvelopeStage::Attack | EnvelopeStage::Decay | EnvelopeStage::Sustain
        )
    }

    pub fn begin_release(&mut self) {
        if self.is_held() {
            self.release_from = self.current_level();
            self.stage = EnvelopeStage::Release;
            self.stage_elapsed = 0.0;
        }
    }

    /// Enforces the safety timeout. The deadline is compared against the
    /// current assignment only; a reassigned slot carries a fresh deadline.
    pub fn check_deadline(&mut self, now_samples: u64) {
        if self.is_held() && now_samples >= self.deadline {
            self.begin_release();
        }
    }

    fn current_level(&self) -> f32 {
        let t = self.stage_elapsed;
        match self.stage {
            EnvelopeStage::Idle => 0.0,
            EnvelopeStage::Attack => self.peak * (t / ATTACK).min(1.0),
            EnvelopeStage::Decay => self.peak * DECAY_TARGET.powf(t / DECAY),
            EnvelopeStage::Sustain => {
                self.peak * DECAY_TARGET * (SUSTAIN_TARGET / DECAY_TARGET).powf(t / SUSTAIN)
            }
            EnvelopeStage::Release => self.release_from * RELEASE_FLOOR.powf(t / RELEASE),
        }
    }

    /// Produces one sample and advances the envelope.
    pub fn render(&mut self) -> f32 {
        if self.stage == EnvelopeStage::Idle {
            return 0.0;
        }
        let level = self.current_level();
        self.stage_elapsed += self.inv_sample_rate;
        match self.stage {
            EnvelopeStage::Attack if self.stage_elapsed >= ATTACK => {
                self.stage = EnvelopeStage::Decay;
                self.stage_elapsed = 0.0;
            }
            EnvelopeStage::Decay if self.stage_elapsed >= DECAY => {
                self.stage = EnvelopeStage::Sustain;
                self.stage_elapsed = 0.0;
            }
            EnvelopeStage::Sustain if self.stage_elapsed >= SUSTAIN => {
                // Auto-release when the sustain slope runs out.
                self.release_from = self.peak * SUSTAIN_TARGET;
                self.stage = EnvelopeStage::Release;
                self.stage_elapsed = 0.0;
            }
            EnvelopeStage::Release if self.stage_elapsed >= RELEASE => {
                self.stage = EnvelopeStage::Idle;
                self.peak = 0.0;
            }
            _ => {}
        }
        let mix: f32 = self.oscillators.iter_mut().map(Oscillator::tick).sum();
        mix * level
    }
}

/// Dedicated kick-drum oscillator: sine sweep 150 Hz → 40 Hz over 100 ms,
/// amplitude 2·intensity decaying to near-zero over 200 ms.
#[derive(Debug, Clone, Copy)]
pub struct KickDrum {
    phase: f32,
    elapsed: f32,
    intensity: f32,
    active: bool,
    inv_sample_rate: f32,
}

const KICK_SWEEP: f32 = 0.100;
const KICK_DECAY: f32 = 0.200;
const KICK_FREQ_START: f32 = 150.0;
const KICK_FREQ_END: f32 = 40.0;

impl KickDrum {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            phase: 0.0,
            elapsed: 0.0,
            intensity: 0.0,
            active: false,
            inv_sample_rate: 1.0 / sample_rate,
        }
    }

    pub fn trigger(&mut self, intensity: f32) {
        self.phase = 0.0;
        self.elapsed = 0.0;
        self.intensity = intensity.clamp(0.0, 1.0);
        self.active = true;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn render(&mut self) -> f32 {
        if !self.active {
            return 0.0;
        }
        let t = self.elapsed;
        let sweep = (t / KICK_SWEEP).min(1.0);
        let freq = KICK_FREQ_START + (KICK_FREQ_END - KICK_FREQ_START) * sweep;
        let amp = 2.0 * self.intensity * RELEASE_FLOOR.powf(t / KICK_DECAY);
        let sample = (TAU * self.phase).sin() * amp;
        self.phase += freq * self.inv_sample_rate;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        self.elapsed += self.inv_sample_rate;
        if amp < 1e-4 {
            self.active = false;
        }
        sample
    }
}
