use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::runtime::Runtime;
use tokio::sync::broadcast;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use serde_json::json;
use url::Url;
use uuid::Uuid;

use crate::control::messages::ControlEnvelope;

/// Fixed delay between remote reconnection attempts.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

const INCOMING_CAPACITY: usize = 64;
const OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Broadcast,
    Remote,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The performance engine itself.
    Program,
    /// A steering client.
    Control,
}

/// Bidirectional control channel with dual transport.
///
/// Local transport is an in-process broadcast: clients post envelopes
/// through `sender()` and observe state through `subscribe()`. The remote
/// transport is a WebSocket client that carries the same JSON envelopes and
/// reconnects on a fixed ~2 s backoff for as long as the engine runs. Until
/// a remote has connected at least once, the channel reports the broadcast
/// transport.
pub struct ControlChannel {
    role: Role,
    incoming_tx: Sender<ControlEnvelope>,
    incoming_rx: Receiver<ControlEnvelope>,
    outbound: broadcast::Sender<String>,
    remote_seen: Arc<AtomicBool>,
    remote_handle: Option<JoinHandle<()>>,
}

impl ControlChannel {
    pub fn new(role: Role) -> Self {
        let (incoming_tx, incoming_rx) = bounded(INCOMING_CAPACITY);
        let (outbound, _) = broadcast::channel(OUTBOUND_CAPACITY);
        Self {
            role,
            incoming_tx,
            incoming_rx,
            outbound,
            remote_seen: Arc::new(AtomicBool::new(false)),
            remote_handle: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn transport(&self) -> TransportKind {
        if self.remote_seen.load(Ordering::Relaxed) {
            TransportKind::Remote
        } else {
            TransportKind::Broadcast
        }
    }

    /// Handle local clients use to issue commands.
    pub fn sender(&self) -> Sender<ControlEnvelope> {
        self.incoming_tx.clone()
    }

    /// Command stream for the coordinator loop.
    pub fn incoming(&self) -> Receiver<ControlEnvelope> {
        self.incoming_rx.clone()
    }

    /// Local observers of the reverse direction (stateUpdate, presetList).
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.outbound.subscribe()
    }

    /// Sends an envelope out through every transport.
    pub fn broadcast(&self, envelope: &ControlEnvelope) {
        match serde_json::to_string(envelope) {
            Ok(text) => {
                // No receivers is fine; nobody is watching yet.
                let _ = self.outbound.send(text);
            }
            Err(e) => error!("Failed to serialise control envelope: {}", e),
        }
    }

    /// Starts the remote transport towards `url`.
    pub fn connect_remote(&mut self, url: &str, running: Arc<AtomicBool>) {
        let url = match Url::parse(url) {
            Ok(url) => url,
            Err(e) => {
                error!("Remote control url {:?} unusable: {}", url, e);
                return;
            }
        };
        let role = self.role;
        let incoming = self.incoming_tx.clone();
        let outbound = self.outbound.clone();
        let remote_seen = self.remote_seen.clone();
        self.remote_handle = Some(thread::spawn(move || {
            let rt = match Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Failed to create runtime for remote control: {}", e);
                    return;
                }
            };
            rt.block_on(remote_loop(url, role, incoming, outbound, remote_seen, running));
        }));
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.remote_handle.take() {
            let _ = handle.join();
        }
    }
}

async fn remote_loop(
    url: Url,
    role: Role,
    incoming: Sender<ControlEnvelope>,
    outbound: broadcast::Sender<String>,
    remote_seen: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
) {
    let client_id = Uuid::new_v4().to_string();
    while running.load(Ordering::Relaxed) {
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!("Remote control connected to {} as {}", url, client_id);
                remote_seen.store(true, Ordering::Relaxed);
                let (mut ws_tx, mut ws_rx) = ws.split();
                let mut out_rx = outbound.subscribe();
                // Identify ourselves to the relay before anything else.
                let register = ControlEnvelope::new(
                    "register",
                    json!({
                        "client_id": client_id,
                        "role": match role {
                            Role::Program => "program",
                            Role::Control => "control",
                        },
                    }),
                );
                if let Ok(text) = serde_json::to_string(&register) {
                    if ws_tx.send(Message::text(text)).await.is_err() {
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                        continue;
                    }
                }
                loop {
                    tokio::select! {
                        msg = ws_rx.next() => match msg {
                            Some(Ok(msg)) if msg.is_text() => {
                                let text = msg.to_text().unwrap_or_default();
                                match serde_json::from_str::<ControlEnvelope>(text) {
                                    Ok(envelope) => {
                                        if incoming.try_send(envelope).is_err() {
                                            warn!("Control queue full, command dropped");
                                        }
                                    }
                                    Err(e) => warn!("Unparseable control message: {}", e),
                                }
                            }
                            Some(Ok(msg)) if msg.is_close() => {
                                info!("Remote control closed by peer");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("Remote control read error: {}", e);
                                break;
                            }
                            None => break,
                        },
                        out = out_rx.recv() => match out {
                            Ok(text) => {
                                if ws_tx.send(Message::text(text)).await.is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                debug!("Remote writer lagged {} messages", n);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {
                            if !running.load(Ordering::Relaxed) {
                                let _ = ws_tx.send(Message::Close(None)).await;
                                return;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                debug!("Remote control connect failed: {}", e);
            }
        }
        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}
