use log::{debug, warn};

/// Default cap on SysEx reassembly, in bytes.
pub const DEFAULT_SYSEX_CAP: usize = 64 * 1024;

/// A complete MIDI message produced by the streaming parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOff { channel: u8, note: u8, velocity: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    PolyPressure { channel: u8, note: u8, pressure: u8 },
    ControlChange { channel: u8, control: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, pressure: u8 },
    PitchBend { channel: u8, value: u16 },
    /// 14-bit position in sixteenth notes from song start.
    SongPosition(u16),
    SongSelect(u8),
    MtcQuarterFrame(u8),
    TuneRequest,
    TimingClock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    SystemReset,
    SysEx { manufacturer: u8, payload: Vec<u8> },
}

const STATUS_NOTE_OFF: u8 = 0x80;
const STATUS_NOTE_ON: u8 = 0x90;
const STATUS_POLY_PRESSURE: u8 = 0xA0;
const STATUS_CONTROL_CHANGE: u8 = 0xB0;
const STATUS_PROGRAM_CHANGE: u8 = 0xC0;
const STATUS_CHANNEL_PRESSURE: u8 = 0xD0;
const STATUS_PITCH_BEND: u8 = 0xE0;
const SYSEX_START: u8 = 0xF0;
const MTC_QUARTER_FRAME: u8 = 0xF1;
const SONG_POSITION: u8 = 0xF2;
const SONG_SELECT: u8 = 0xF3;
const TUNE_REQUEST: u8 = 0xF6;
const SYSEX_END: u8 = 0xF7;

/// Streaming byte-at-a-time MIDI parser.
///
/// System Real-Time bytes (0xF8..=0xFF) are dispatched the moment they
/// arrive, even in the middle of a SysEx transfer, without disturbing the
/// reassembly buffer. SysEx payloads may span any number of `feed` calls and
/// are only emitted on 0xF7.
pub struct MidiStreamParser {
    status: Option<u8>,
    channel: u8,
    d0: Option<u8>,
    in_sysex: bool,
    sysex: Vec<u8>,
    sysex_cap: usize,
    sysex_overflowed: bool,
    malformed: u64,
    overflows: u64,
}

impl Default for MidiStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiStreamParser {
    pub fn new() -> Self {
        Self::with_sysex_cap(DEFAULT_SYSEX_CAP)
    }

    pub fn with_sysex_cap(sysex_cap: usize) -> Self {
        Self {
            status: None,
            channel: 0,
            d0: None,
            in_sysex: false,
            sysex: Vec::new(),
            sysex_cap,
            sysex_overflowed: false,
            malformed: 0,
            overflows: 0,
        }
    }

    /// Messages dropped because of missing or orphaned data bytes.
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }

    /// SysEx transfers that exceeded the cap and were truncated.
    pub fn overflow_count(&self) -> u64 {
        self.overflows
    }

    /// Feeds a chunk of bytes and returns every message completed by it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<MidiMessage> {
        let mut out = Vec::new();
        for &b in bytes {
            if let Some(msg) = self.feed_byte(b) {
                out.push(msg);
            }
        }
        out
    }

    /// Feeds a single byte; returns a message if it completed one.
    pub fn feed_byte(&mut self, byte: u8) -> Option<MidiMessage> {
        if byte >= 0xF8 {
            // System Real-Time passes through any in-progress message.
            return self.real_time(byte);
        }
        if byte & 0x80 != 0 {
            if byte >= 0xF0 {
                self.system_common(byte)
            } else {
                self.channel_status(byte)
            }
        } else {
            self.data_byte(byte)
        }
    }

    fn real_time(&mut self, byte: u8) -> Option<MidiMessage> {
        match byte {
            0xF8 => Some(MidiMessage::TimingClock),
            0xFA => Some(MidiMessage::Start),
            0xFB => Some(MidiMessage::Continue),
            0xFC => Some(MidiMessage::Stop),
            0xFE => Some(MidiMessage::ActiveSensing),
            0xFF => Some(MidiMessage::SystemReset),
            undefined => {
                debug!("Undefined real-time byte 0x{:02X}", undefined);
                None
            }
        }
    }

    fn channel_status(&mut self, byte: u8) -> Option<MidiMessage> {
        self.note_incomplete();
        self.status = Some(byte & 0xF0);
        self.channel = byte & 0x0F;
        self.d0 = None;
        None
    }

    fn system_common(&mut self, byte: u8) -> Option<MidiMessage> {
        match byte {
            SYSEX_START => {
                self.note_incomplete();
                self.status = None;
                self.d0 = None;
                self.in_sysex = true;
                self.sysex.clear();
                self.sysex_overflowed = false;
                None
            }
            SYSEX_END => {
                if !self.in_sysex {
                    warn!("End of SysEx without a matching start");
                    self.malformed += 1;
                    return None;
                }
                self.in_sysex = false;
                if self.sysex.is_empty() {
                    warn!("SysEx without manufacturer byte dropped");
                    self.malformed += 1;
                    return None;
                }
                let manufacturer = self.sysex[0];
                let payload = self.sysex[1..].to_vec();
                self.sysex.clear();
                Some(MidiMessage::SysEx {
                    manufacturer,
                    payload,
                })
            }
            SONG_POSITION | SONG_SELECT | MTC_QUARTER_FRAME => {
                self.note_incomplete();
                self.status = Some(byte);
                self.d0 = None;
                None
            }
            TUNE_REQUEST => {
                self.note_incomplete();
                self.status = None;
                Some(MidiMessage::TuneRequest)
            }
            undefined => {
                self.note_incomplete();
                debug!("Undefined system common byte 0x{:02X}", undefined);
                self.status = None;
                None
            }
        }
    }

    fn data_byte(&mut self, byte: u8) -> Option<MidiMessage> {
        if self.in_sysex {
            if self.sysex.len() < self.sysex_cap {
                self.sysex.push(byte);
            } else if !self.sysex_overflowed {
                warn!("SysEx exceeded {} bytes, truncating", self.sysex_cap);
                self.sysex_overflowed = true;
                self.overflows += 1;
            }
            return None;
        }
        let status = match self.status {
            Some(s) => s,
            None => {
                debug!("Orphaned data byte 0x{:02X}", byte);
                self.malformed += 1;
                return None;
            }
        };
        match status {
            STATUS_NOTE_OFF => self.two_data(byte, |ch, note, velocity| MidiMessage::NoteOff {
                channel: ch,
                note,
                velocity,
            }),
            STATUS_NOTE_ON => self.two_data(byte, |ch, note, velocity| {
                // Note On at velocity 0 is a note-off by convention.
                if velocity == 0 {
                    MidiMessage::NoteOff {
                        channel: ch,
                        note,
                        velocity,
                    }
                } else {
                    MidiMessage::NoteOn {
                        channel: ch,
                        note,
                        velocity,
                    }
                }
            }),
            STATUS_POLY_PRESSURE => self.two_data(byte, |ch, note, pressure| {
                MidiMessage::PolyPressure {
                    channel: ch,
                    note,
                    pressure,
                }
            }),
            STATUS_CONTROL_CHANGE => self.two_data(byte, |ch, control, value| {
                MidiMessage::ControlChange {
                    channel: ch,
                    control,
                    value,
                }
            }),
            STATUS_PROGRAM_CHANGE => Some(MidiMessage::ProgramChange {
                channel: self.channel,
                program: byte,
            }),
            STATUS_CHANNEL_PRESSURE => Some(MidiMessage::ChannelPressure {
                channel: self.channel,
                pressure: byte,
            }),
            STATUS_PITCH_BEND => {
                if let Some(lsb) = self.d0.take() {
                    let value = ((byte as u16) << 7) | (lsb as u16);
                    Some(MidiMessage::PitchBend {
                        channel: self.channel,
                        value,
                    })
                } else {
                    self.d0 = Some(byte);
                    None
                }
            }
            SONG_POSITION => {
                if let Some(lsb) = self.d0.take() {
                    // System common does not establish running status.
                    self.status = None;
                    Some(MidiMessage::SongPosition(
                        ((byte as u16) << 7) | (lsb as u16),
                    ))
                } else {
                    self.d0 = Some(byte);
                    None
                }
            }
            SONG_SELECT => {
                self.status = None;
                Some(MidiMessage::SongSelect(byte))
            }
            MTC_QUARTER_FRAME => {
                self.status = None;
                Some(MidiMessage::MtcQuarterFrame(byte))
            }
            other => {
                debug!("Data byte in unexpected state 0x{:02X}", other);
                self.malformed += 1;
                self.status = None;
                None
            }
        }
    }

    fn two_data(
        &mut self,
        byte: u8,
        build: impl FnOnce(u8, u8, u8) -> MidiMessage,
    ) -> Option<MidiMessage> {
        if let Some(first) = self.d0.take() {
            Some(build(self.channel, first, byte))
        } else {
            self.d0 = Some(byte);
            None
        }
    }

    /// Counts an in-flight message cut short by a new status byte. An
    /// unterminated SysEx is abandoned the same way.
    fn note_incomplete(&mut self) {
        if self.d0.is_some() {
            self.malformed += 1;
            self.d0 = None;
        }
        if self.in_sysex {
            warn!("SysEx interrupted by non-real-time status byte");
            self.malformed += 1;
            self.in_sysex = false;
            self.sysex.clear();
        }
    }
}

/// Normalises a 14-bit pitch-bend value to [0, 1].
pub fn normalise_pitch_bend(value: u16) -> f32 {
    f32::from(value.min(16383)) / 16383.0
}
