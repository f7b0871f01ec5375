//! In-memory broker for driving `StompClient` without sockets.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use lib_realtime::stomp::{Command, Connector, Frame, Packet, Transport, TransportError};

/// How the broker answers a CONNECT.
#[derive(Debug, Clone)]
pub enum Reply {
    /// CONNECTED with the given `heart-beat` header.
    Connected { heart_beat: String },
    /// ERROR with the given `message` header.
    Reject(String),
    /// Never answer.
    Hang,
}

#[derive(Debug)]
struct BrokerState {
    refuse: bool,
    reply: Reply,
    opens: usize,
    live: usize,
    max_live: usize,
    // (connection number, frame), connection numbers start at 1.
    frames: Vec<(usize, Frame)>,
    link: Option<mpsc::UnboundedSender<Result<Packet, TransportError>>>,
}

#[derive(Debug, Clone)]
pub struct FakeBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for FakeBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                refuse: false,
                reply: Reply::Connected {
                    heart_beat: "0,0".to_string(),
                },
                opens: 0,
                live: 0,
                max_live: 0,
                frames: Vec::new(),
                link: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(FakeConnector {
            broker: self.clone(),
        })
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse = refuse;
    }

    pub fn set_reply(&self, reply: Reply) {
        self.lock().reply = reply;
    }

    /// Connection attempts, refused ones included.
    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    pub fn live(&self) -> usize {
        self.lock().live
    }

    pub fn max_live(&self) -> usize {
        self.lock().max_live
    }

    /// Frames the client sent with `command`, tagged with their connection number.
    pub fn sent(&self, command: Command) -> Vec<(usize, Frame)> {
        self.lock()
            .frames
            .iter()
            .filter(|(_, frame)| frame.command == command)
            .cloned()
            .collect()
    }

    /// Drops the current link as if the network went away.
    pub fn kill_link(&self) {
        self.lock().link = None;
    }

    pub fn push(&self, packet: Packet) -> bool {
        self.push_result(Ok(packet))
    }

    /// Makes the client's next `recv` fail with `error`, as a broken peer would.
    pub fn push_error(&self, error: TransportError) -> bool {
        self.push_result(Err(error))
    }

    fn push_result(&self, item: Result<Packet, TransportError>) -> bool {
        match &self.lock().link {
            Some(link) => link.send(item).is_ok(),
            None => false,
        }
    }

    pub fn push_message(&self, destination: &str, subscription: &str, body: &str) -> bool {
        let frame = Frame::new(Command::Message)
            .header("destination", destination)
            .header("subscription", subscription)
            .header("message-id", "m-1")
            .with_body(body);
        self.push(frame.into())
    }
}

struct FakeConnector {
    broker: FakeBroker,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        let mut state = self.broker.lock();
        state.opens += 1;
        if state.refuse {
            return Err(TransportError::ConnectFailed("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.link = Some(tx);
        state.live += 1;
        state.max_live = state.max_live.max(state.live);

        Ok(Box::new(FakeTransport {
            broker: self.broker.clone(),
            connection: state.opens,
            inbound: rx,
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        "fake://broker".to_string()
    }
}

struct FakeTransport {
    broker: FakeBroker,
    connection: usize,
    inbound: mpsc::UnboundedReceiver<Result<Packet, TransportError>>,
    closed: bool,
}

impl FakeTransport {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.broker.lock().live -= 1;
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&mut self, packet: Packet) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let Packet::Frame(frame) = packet else {
            return Ok(());
        };

        let mut state = self.broker.lock();
        let reply = match frame.command {
            Command::Connect => match &state.reply {
                Reply::Connected { heart_beat } => Some(
                    Frame::new(Command::Connected)
                        .header("version", "1.2")
                        .header("heart-beat", heart_beat.as_str()),
                ),
                Reply::Reject(message) => {
                    Some(Frame::new(Command::Error).header("message", message.as_str()))
                }
                Reply::Hang => None,
            },
            _ => None,
        };
        state.frames.push((self.connection, frame));

        if let (Some(reply), Some(link)) = (reply, &state.link) {
            let _ = link.send(Ok(reply.into()));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Packet, TransportError>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        self.release();
    }
}

/// Polls `condition` until it holds, letting paused time run forward in small steps.
pub async fn until<F: FnMut() -> bool>(what: &str, mut condition: F) {
    for _ in 0..4000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}
