//! Per-connection STOMP state of the mock broker.
//!
//! Kept free of sockets: the downstream loop feeds raw WebSocket payloads in
//! and writes whatever [`Reply`] comes back.

use std::collections::BTreeMap;
use std::time::Duration;

use lib_realtime::stomp::frame::{decode_packets, Command, Frame, Packet};
use lib_realtime::stomp::heartbeat::{negotiate, HeartBeat};

use crate::stomp_mock::state::{BrokerState, Published};

const SERVER_NAME: &str = concat!("stomp-mock/", env!("CARGO_PKG_VERSION"));
const SUPPORTED_VERSIONS: [&str; 3] = ["1.2", "1.1", "1.0"];

/// Frames to write back, and whether the connection ends afterwards.
#[derive(Debug, Default)]
pub struct Reply {
    /// Write a heart-beat EOL before the frames.
    pub heartbeat: bool,
    pub frames: Vec<Frame>,
    pub close: bool,
}

impl Reply {
    pub fn heartbeat() -> Self {
        Self {
            heartbeat: true,
            ..Self::default()
        }
    }

    fn error(&mut self, message: &str, detail: &str) {
        self.frames.push(
            Frame::new(Command::Error)
                .header("message", message)
                .header("content-type", "text/plain")
                .with_body(detail.to_string()),
        );
        // STOMP requires the server to close after ERROR
        self.close = true;
    }
}

pub struct Session {
    client_id: usize,
    connected: bool,
    // subscription id -> destination
    subscriptions: BTreeMap<String, String>,
    heartbeat_every: Option<Duration>,
}

impl Session {
    pub fn new(client_id: usize) -> Self {
        Self {
            client_id,
            connected: false,
            subscriptions: BTreeMap::new(),
            heartbeat_every: None,
        }
    }

    /// How often the broker owes this client a heart-beat, once CONNECTED is sent.
    pub fn heartbeat_every(&self) -> Option<Duration> {
        self.heartbeat_every
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Handles one WebSocket payload, which may hold several frames and heart-beats.
    pub fn on_data(&mut self, data: &[u8], state: &BrokerState) -> Reply {
        let mut reply = Reply::default();

        let packets = match decode_packets(data) {
            Ok(packets) => packets,
            Err(e) => {
                log::warn!("Client {} sent a malformed frame: {}", self.client_id, e);
                reply.error("malformed frame received", &e.to_string());
                return reply;
            }
        };

        for packet in packets {
            if let Packet::Frame(frame) = packet {
                self.on_frame(frame, state, &mut reply);
                if reply.close {
                    break;
                }
            }
        }
        reply
    }

    fn on_frame(&mut self, frame: Frame, state: &BrokerState, reply: &mut Reply) {
        log::debug!("Client {} <<< {}", self.client_id, frame.command);

        if !self.connected && !matches!(frame.command, Command::Connect | Command::Stomp) {
            reply.error("not connected", "CONNECT must be the first frame");
            return;
        }

        match frame.command {
            Command::Connect | Command::Stomp => {
                if self.connected {
                    reply.error("already connected", "CONNECT sent twice");
                    return;
                }
                let Some(version) = negotiate_version(frame.get_header("accept-version")) else {
                    reply.error(
                        "unsupported protocol version",
                        "Supported protocol versions are 1.2,1.1,1.0",
                    );
                    return;
                };
                self.connected = true;
                // Seen from the broker, its own offer is "ours" and the client's is "theirs".
                let offer = HeartBeat::new(state.heartbeat_ms, state.heartbeat_ms);
                let requested = frame
                    .get_header("heart-beat")
                    .map(HeartBeat::parse)
                    .unwrap_or_default();
                self.heartbeat_every = negotiate(offer, requested).send_every;
                log::info!("Client {} connected with STOMP {}", self.client_id, version);
                reply.frames.push(
                    Frame::new(Command::Connected)
                        .header("version", version)
                        .header("heart-beat", format!("{},{}", state.heartbeat_ms, state.heartbeat_ms))
                        .header("server", SERVER_NAME)
                        .header("session", format!("session-{}", self.client_id)),
                );
            }
            Command::Subscribe => {
                let (Some(id), Some(destination)) =
                    (frame.get_header("id"), frame.get_header("destination"))
                else {
                    reply.error("invalid SUBSCRIBE", "SUBSCRIBE requires id and destination");
                    return;
                };
                log::info!("Client {} subscribed to {} as {}", self.client_id, destination, id);
                self.subscriptions.insert(id.to_string(), destination.to_string());
            }
            Command::Unsubscribe => {
                let Some(id) = frame.get_header("id") else {
                    reply.error("invalid UNSUBSCRIBE", "UNSUBSCRIBE requires id");
                    return;
                };
                if let Some(destination) = self.subscriptions.remove(id) {
                    log::info!("Client {} unsubscribed from {}", self.client_id, destination);
                }
            }
            Command::Send => {
                let Some(destination) = frame.get_header("destination") else {
                    reply.error("invalid SEND", "SEND requires destination");
                    return;
                };
                let content_type = frame.get_header("content-type").map(str::to_string);
                state.publish(destination, content_type, frame.body.clone());
            }
            Command::Disconnect => {
                log::info!("Client {} sent DISCONNECT", self.client_id);
                reply.close = true;
            }
            other => log::debug!("Client {}: ignoring {}", self.client_id, other),
        }

        if let Some(receipt) = frame.get_header("receipt") {
            reply
                .frames
                .push(Frame::new(Command::Receipt).header("receipt-id", receipt));
        }
    }

    /// MESSAGE frames for every subscription matching `message`.
    pub fn deliver(&self, message: &Published) -> Reply {
        let mut reply = Reply::default();
        if !self.connected {
            return reply;
        }

        for (id, destination) in &self.subscriptions {
            if *destination != message.destination {
                continue;
            }
            let mut frame = Frame::new(Command::Message)
                .header("destination", destination.as_str())
                .header("subscription", id.as_str())
                .header("message-id", message.id.to_string());
            if let Some(content_type) = &message.content_type {
                frame = frame.header("content-type", content_type.as_str());
            }
            reply.frames.push(frame.with_body(message.body.clone()));
        }
        reply
    }
}

fn negotiate_version(accept_version: Option<&str>) -> Option<&'static str> {
    let Some(accepted) = accept_version else {
        return Some("1.0");
    };
    let accepted: Vec<&str> = accepted.split(',').map(str::trim).collect();
    SUPPORTED_VERSIONS
        .iter()
        .copied()
        .find(|version| accepted.contains(version))
}
