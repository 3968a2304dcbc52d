use anyhow::{anyhow, Result};
use bytes::{BufMut, BytesMut};
use log::debug;
use serde_json::json;

use crate::control::messages::ControlEnvelope;
use crate::render::RendererKind;

/// Non-commercial manufacturer id used for the whole command surface.
pub const MANUFACTURER_EDUCATIONAL: u8 = 0x7D;

const SYSEX_START: u8 = 0xF0;
const SYSEX_END: u8 = 0xF7;

/// Longest ASCII argument the bridge encoding carries.
const MAX_TEXT_LEN: usize = 120;

/// Performance vocabulary: commands addressed to the running show, arriving
/// as manufacturer-0x7D SysEx on the live MIDI input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceCommand {
    /// 0=builtin, 1=3D, 2=milkdrop.
    SwitchMode(RendererKind),
    LoadMilkdropPreset(u16),
    SwitchScene(u8),
    MilkdropNext,
    MilkdropPrev,
}

/// Parses the payload of a 0x7D SysEx message. Unknown or short commands are
/// logged and yield `None`; they never fail the stream.
pub fn parse_performance_command(payload: &[u8]) -> Option<PerformanceCommand> {
    let (&cmd, args) = payload.split_first()?;
    match cmd {
        0x01 => {
            let mode = match *args.first()? {
                0 => RendererKind::Builtin,
                1 => RendererKind::ThreeD,
                2 => RendererKind::Milkdrop,
                other => {
                    debug!("SysEx mode {} out of range, ignored", other);
                    return None;
                }
            };
            Some(PerformanceCommand::SwitchMode(mode))
        }
        0x02 => {
            if args.len() < 2 {
                debug!("SysEx preset command missing index bytes");
                return None;
            }
            let index = (u16::from(args[0] & 0x7F) << 7) | u16::from(args[1] & 0x7F);
            Some(PerformanceCommand::LoadMilkdropPreset(index))
        }
        0x03 => {
            let scene = *args.first()?;
            if scene > 3 {
                debug!("SysEx scene {} out of range, ignored", scene);
                return None;
            }
            Some(PerformanceCommand::SwitchScene(scene))
        }
        0x10 => Some(PerformanceCommand::MilkdropNext),
        0x11 => Some(PerformanceCommand::MilkdropPrev),
        other => {
            debug!("Unknown SysEx command 0x{:02X}, ignored", other);
            None
        }
    }
}

/// Bridge encoding: remote-control messages packed into SysEx so they can
/// ride the same MIDI plumbing as live note data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    /// 0x01=builtin .. 0x06=milkdrop.
    SwitchMode(u8),
    SwitchScene(u8),
    StreamSelect(String),
    MediaSelect(String),
    RendererSelect(u8),
    BlackScreen,
}

impl BridgeCommand {
    /// Encodes a full `F0 7D cmd data... F7` frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u8(SYSEX_START);
        buf.put_u8(MANUFACTURER_EDUCATIONAL);
        match self {
            BridgeCommand::SwitchMode(mode) => {
                buf.put_u8(0x01);
                buf.put_u8(mode & 0x7F);
            }
            BridgeCommand::SwitchScene(scene) => {
                buf.put_u8(0x02);
                buf.put_u8(scene & 0x7F);
            }
            BridgeCommand::StreamSelect(text) => {
                buf.put_u8(0x03);
                put_text(&mut buf, text)?;
            }
            BridgeCommand::MediaSelect(text) => {
                buf.put_u8(0x04);
                put_text(&mut buf, text)?;
            }
            BridgeCommand::RendererSelect(renderer) => {
                buf.put_u8(0x05);
                buf.put_u8(renderer & 0x7F);
            }
            BridgeCommand::BlackScreen => buf.put_u8(0x10),
        }
        buf.put_u8(SYSEX_END);
        Ok(buf.to_vec())
    }

    /// Decodes the payload of a 0x7D SysEx frame (manufacturer byte already
    /// stripped by the parser).
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let (&cmd, args) = payload
            .split_first()
            .ok_or_else(|| anyhow!("Empty bridge payload"))?;
        match cmd {
            0x01 => Ok(BridgeCommand::SwitchMode(
                *args.first().ok_or_else(|| anyhow!("Missing mode byte"))?,
            )),
            0x02 => Ok(BridgeCommand::SwitchScene(
                *args.first().ok_or_else(|| anyhow!("Missing scene byte"))?,
            )),
            0x03 => Ok(BridgeCommand::StreamSelect(take_text(args)?)),
            0x04 => Ok(BridgeCommand::MediaSelect(take_text(args)?)),
            0x05 => Ok(BridgeCommand::RendererSelect(
                *args
                    .first()
                    .ok_or_else(|| anyhow!("Missing renderer byte"))?,
            )),
            0x10 => Ok(BridgeCommand::BlackScreen),
            other => Err(anyhow!("Unknown bridge command 0x{:02X}", other)),
        }
    }
}

/// Mode bytes carried by the bridge wire format.
const BRIDGE_MODES: [(u8, &str); 5] = [
    (0x01, "builtin"),
    (0x02, "threejs"),
    (0x03, "video"),
    (0x04, "blank"),
    (0x06, "milkdrop"),
];

impl BridgeCommand {
    /// Packs a control envelope for transport over MIDI plumbing. Commands
    /// without a bridge encoding return `None` and stay on the JSON path.
    pub fn from_envelope(envelope: &ControlEnvelope) -> Option<Self> {
        match envelope.command.as_str() {
            "switchMode" => {
                let name = envelope.data.as_str()?;
                BRIDGE_MODES
                    .iter()
                    .find(|(_, n)| *n == name)
                    .map(|(byte, _)| BridgeCommand::SwitchMode(*byte))
            }
            "switchScene" => envelope
                .data
                .as_u64()
                .map(|s| BridgeCommand::SwitchScene(s as u8)),
            "streamSelect" => envelope
                .data
                .as_str()
                .map(|s| BridgeCommand::StreamSelect(s.to_string())),
            "mediaSelect" => envelope
                .data
                .as_str()
                .map(|s| BridgeCommand::MediaSelect(s.to_string())),
            "rendererSelect" => match envelope.data.as_str()? {
                "webgl" => Some(BridgeCommand::RendererSelect(0)),
                "canvas2d" => Some(BridgeCommand::RendererSelect(1)),
                _ => None,
            },
            "blackScreen" => Some(BridgeCommand::BlackScreen),
            _ => None,
        }
    }

    /// Unpacks back into the envelope vocabulary on the receiving side.
    pub fn to_envelope(&self) -> Option<ControlEnvelope> {
        match self {
            BridgeCommand::SwitchMode(byte) => BRIDGE_MODES
                .iter()
                .find(|(b, _)| b == byte)
                .map(|(_, name)| ControlEnvelope::new("switchMode", json!(name))),
            BridgeCommand::SwitchScene(scene) => {
                Some(ControlEnvelope::new("switchScene", json!(scene)))
            }
            BridgeCommand::StreamSelect(text) => {
                Some(ControlEnvelope::new("streamSelect", json!(text)))
            }
            BridgeCommand::MediaSelect(text) => {
                Some(ControlEnvelope::new("mediaSelect", json!(text)))
            }
            BridgeCommand::RendererSelect(byte) => {
                let pref = match byte {
                    0 => "webgl",
                    1 => "canvas2d",
                    _ => return None,
                };
                Some(ControlEnvelope::new("rendererSelect", json!(pref)))
            }
            // A black screen is the blank renderer by another name.
            BridgeCommand::BlackScreen => {
                Some(ControlEnvelope::new("switchMode", json!("blank")))
            }
        }
    }
}

fn put_text(buf: &mut BytesMut, text: &str) -> Result<()> {
    if !text.is_ascii() {
        return Err(anyhow!("Bridge text must be ASCII"));
    }
    if text.len() > MAX_TEXT_LEN {
        return Err(anyhow!(
            "Bridge text too long: {} > {} bytes",
            text.len(),
            MAX_TEXT_LEN
        ));
    }
    for b in text.bytes() {
        buf.put_u8(b & 0x7F);
    }
    Ok(())
}

fn take_text(args: &[u8]) -> Result<String> {
    if args.len() > MAX_TEXT_LEN {
        return Err(anyhow!("Bridge text too long: {} bytes", args.len()));
    }
    String::from_utf8(args.to_vec()).map_err(|e| anyhow!("Bridge text not ASCII: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn performance_vocabulary_round_trip() {
        assert_eq!(
            parse_performance_command(&[0x01, 2]),
            Some(PerformanceCommand::SwitchMode(RendererKind::Milkdrop))
        );
        assert_eq!(
            parse_performance_command(&[0x02, 0x01, 0x05]),
            Some(PerformanceCommand::LoadMilkdropPreset(133))
        );
        assert_eq!(
            parse_performance_command(&[0x03, 2]),
            Some(PerformanceCommand::SwitchScene(2))
        );
        assert_eq!(
            parse_performance_command(&[0x10]),
            Some(PerformanceCommand::MilkdropNext)
        );
        assert_eq!(
            parse_performance_command(&[0x11]),
            Some(PerformanceCommand::MilkdropPrev)
        );
    }

    #[test]
    fn unknown_and_short_commands_are_ignored() {
        assert_eq!(parse_performance_command(&[]), None);
        assert_eq!(parse_performance_command(&[0x7F]), None);
        assert_eq!(parse_performance_command(&[0x01, 9]), None);
        assert_eq!(parse_performance_command(&[0x02, 0x01]), None);
        assert_eq!(parse_performance_command(&[0x03, 4]), None);
    }

    #[test]
    fn bridge_frames_are_well_formed() {
        let frame = BridgeCommand::SwitchMode(0x06).encode().unwrap();
        assert_eq!(frame, vec![0xF0, 0x7D, 0x01, 0x06, 0xF7]);
        let frame = BridgeCommand::BlackScreen.encode().unwrap();
        assert_eq!(frame, vec![0xF0, 0x7D, 0x10, 0xF7]);
    }

    #[test]
    fn bridge_text_round_trip() {
        let cmd = BridgeCommand::StreamSelect("rtsp://host/live".to_string());
        let frame = cmd.encode().unwrap();
        // Strip F0 7D ... F7 envelope and the manufacturer byte.
        let payload = &frame[2..frame.len() - 1];
        assert_eq!(BridgeCommand::decode(payload).unwrap(), cmd);
    }

    #[test]
    fn bridge_text_is_capped() {
        let long = "x".repeat(121);
        assert!(BridgeCommand::StreamSelect(long).encode().is_err());
    }

    #[test]
    fn envelopes_survive_the_midi_bridge() {
        let envelope = ControlEnvelope::new("switchMode", serde_json::json!("milkdrop"));
        let bridged = BridgeCommand::from_envelope(&envelope).unwrap();
        assert_eq!(bridged, BridgeCommand::SwitchMode(0x06));
        assert_eq!(bridged.to_envelope().unwrap(), envelope);

        // Commands with no bridge encoding stay on the JSON path.
        let json_only = ControlEnvelope::new("milkdropSelect", serde_json::json!(4));
        assert_eq!(BridgeCommand::from_envelope(&json_only), None);
    }

    #[test]
    fn black_screen_unpacks_to_the_blank_renderer() {
        let envelope = BridgeCommand::BlackScreen.to_envelope().unwrap();
        assert_eq!(envelope.command, "switchMode");
        assert_eq!(envelope.data, serde_json::json!("blank"));
    }
}
