use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use rosc::{OscMessage, OscPacket, OscType};

use crate::control::messages::{ControlCommand, ControlEnvelope};
use crate::render::RendererKind;

pub const DEFAULT_OSC_PORT: u16 = 9000;

/// Maps one OSC message onto the control vocabulary. Unrecognised addresses
/// are ignored.
pub fn route_message(msg: &OscMessage) -> Option<ControlCommand> {
    match msg.addr.as_str() {
        "/preset/milkdrop/select" => msg.args.first().and_then(|arg| match arg {
            OscType::Int(i) if *i >= 0 => Some(ControlCommand::MilkdropSelect(*i as usize)),
            other => {
                debug!("OSC select with non-int argument {:?}", other);
                None
            }
        }),
        "/preset/milkdrop/next" => Some(ControlCommand::MilkdropNext),
        "/preset/milkdrop/prev" => Some(ControlCommand::MilkdropPrev),
        "/preset/mode" => msg.args.first().and_then(|arg| match arg {
            OscType::String(name) => {
                RendererKind::from_wire_name(name).map(ControlCommand::SwitchMode)
            }
            other => {
                debug!("OSC mode with non-string argument {:?}", other);
                None
            }
        }),
        other => {
            debug!("OSC address {} not routed", other);
            None
        }
    }
}

fn routed_commands(packet: &OscPacket, out: &mut Vec<ControlCommand>) {
    match packet {
        OscPacket::Message(msg) => {
            if let Some(cmd) = route_message(msg) {
                out.push(cmd);
            }
        }
        OscPacket::Bundle(bundle) => {
            for inner in &bundle.content {
                routed_commands(inner, out);
            }
        }
    }
}

/// Spawns the OSC receiver: decodes datagrams and forwards recognised
/// commands to the coordinator as control envelopes.
pub fn spawn_osc_listener(
    port: u16,
    tx: Sender<ControlEnvelope>,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let socket = UdpSocket::bind(("0.0.0.0", port))?;
    socket.set_read_timeout(Some(Duration::from_secs(1)))?;
    info!("OSC listener started on UDP port {}", port);
    let handle = thread::spawn(move || {
        let mut buf = [0u8; rosc::decoder::MTU];
        while running.load(Ordering::Relaxed) {
            match socket.recv_from(&mut buf) {
                Ok((len, _)) => match rosc::decoder::decode_udp(&buf[..len]) {
                    Ok((_, packet)) => {
                        let mut commands = Vec::new();
                        routed_commands(&packet, &mut commands);
                        for cmd in commands {
                            if tx.try_send(cmd.to_envelope()).is_err() {
                                warn!("Control queue full, OSC command dropped");
                            }
                        }
                    }
                    Err(e) => warn!("Failed to decode OSC packet: {}", e),
                },
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    warn!("OSC socket error: {}", e);
                    break;
                }
            }
        }
        info!("OSC listener stopped");
    });
    Ok(handle)
}
