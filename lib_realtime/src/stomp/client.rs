//! # Reconnecting STOMP Client
//!
//! Keeps a logical "always connected" publish/subscribe channel over an
//! unreliable transport.
//!
//! ## Structure
//!
//! [`StompClient`] is a cheap, cloneable handle. Creating one spawns a single
//! client task (the `Engine`) that exclusively owns the transport, the
//! subscription registry and the reconnect timer. Handles talk to it through an
//! unbounded request channel and observe it through a `watch` channel carrying
//! the current [`ClientStatus`]. Because only the task touches the registry, no
//! lock guards it.
//!
//! ## State machine
//!
//! ```text
//!   DISCONNECTED --connect()--> CONNECTING --CONNECTED frame--> CONNECTED
//!        ^                          |                               |
//!        |<---- refused / timeout --+                               |
//!        |<------------------ transport drop / heart-beat loss -----+
//!        |
//!        +-- after `reconnect_delay`, while attempts < max --> CONNECTING
//!
//!   CONNECTING | CONNECTED --ERROR frame / undecodable frame--> ERROR(msg)
//! ```
//!
//! - Transport-level failures are retried after a fixed delay, up to
//!   `max_reconnect_attempts`; the counter resets on every successful connect.
//!   Once exhausted the client stays DISCONNECTED until `connect()` is called.
//! - Protocol-level failures land in `Error` and are not retried.
//! - Either way the reason is kept in [`ClientStatus::last_error`] until the
//!   next successful connect.
//! - Every registered subscription is replayed on each successful connect.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

use crate::stomp::auth::TokenProvider;
use crate::stomp::frame::{Command, Frame, Packet};
use crate::stomp::heartbeat::{negotiate, HeartBeat};
use crate::stomp::message::{MessageHandler, StompMessage};
use crate::stomp::options::ClientOptions;
use crate::stomp::transport::{Connector, Transport, TransportError};

/// Header list attached to a published message.
pub type Headers = Vec<(String, String)>;

const FALLBACK_ERROR: &str = "WebSocket connection error";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("The STOMP client task has stopped")]
    Stopped,
}

/// Connection lifecycle states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// A protocol-level failure, carrying the broker's (or decoder's) message.
    Error(String),
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Error(_) => "ERROR",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Error(message) => write!(f, "ERROR ({})", message),
            other => f.write_str(other.label()),
        }
    }
}

/// Snapshot published by the client task on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStatus {
    pub state: ConnectionState,
    /// Automatic reconnect attempts made since the last successful connect.
    pub reconnect_attempts: u32,
    /// Why the last connection attempt or session ended, cleared once connected.
    pub last_error: Option<String>,
}

impl ClientStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }

    pub fn has_error(&self) -> bool {
        matches!(self.state, ConnectionState::Error(_))
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Error(message) => Some(message),
            _ => None,
        }
    }
}

impl Default for ClientStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            last_error: None,
        }
    }
}

/// Returned by [`StompClient::subscribe`]; identifies the registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    topic: String,
    id: String,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The STOMP subscription id, reused on every replay.
    pub fn id(&self) -> &str {
        &self.id
    }
}

enum Request {
    Connect,
    Disconnect,
    Subscribe {
        topic: String,
        id: String,
        handler: MessageHandler,
    },
    Unsubscribe {
        topic: String,
        // Only remove the registration if it still carries this id.
        id: Option<String>,
    },
    Publish {
        destination: String,
        body: Vec<u8>,
        headers: Headers,
    },
}

/// # STOMP Client Handle
///
/// Every method is non-blocking: requests are queued to the client task and
/// applied in order. Observe the outcome through [`StompClient::status`],
/// [`StompClient::state_changes`] or [`StompClient::wait_for`].
///
/// Dropping the last handle disconnects and stops the client task.
#[derive(Clone)]
pub struct StompClient {
    requests: mpsc::UnboundedSender<Request>,
    status: watch::Receiver<ClientStatus>,
    next_subscription: Arc<AtomicU64>,
}

impl StompClient {
    /// Spawns the client task. Must be called inside a tokio runtime.
    pub fn new(options: ClientOptions, connector: Arc<dyn Connector>) -> Self {
        Self::spawn(options, connector, None)
    }

    /// Like [`StompClient::new`], adding `Authorization: Bearer <token>` to every CONNECT.
    pub fn with_token_provider(
        options: ClientOptions,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self::spawn(options, connector, Some(tokens))
    }

    fn spawn(
        options: ClientOptions,
        connector: Arc<dyn Connector>,
        tokens: Option<Arc<dyn TokenProvider>>,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ClientStatus::default());
        let auto_connect = options.auto_connect;

        let engine = Engine {
            options,
            connector,
            tokens,
            requests: request_rx,
            status: status_tx,
            registry: HashMap::new(),
            session: None,
            reconnect_at: None,
            reconnect_attempts: 0,
            last_error: None,
        };
        tokio::spawn(engine.run());

        let client = Self {
            requests: request_tx,
            status: status_rx,
            next_subscription: Arc::new(AtomicU64::new(0)),
        };
        if auto_connect {
            client.connect();
        }
        client
    }

    /// Opens the connection. Ignored while already connected or connecting.
    pub fn connect(&self) {
        self.send(Request::Connect);
    }

    /// Cancels any pending reconnect, closes the transport and forgets every subscription.
    pub fn disconnect(&self) {
        self.send(Request::Disconnect);
    }

    /// Registers `handler` for `topic`, replacing any earlier handler for the
    /// same topic. The subscription is sent now if connected, and replayed on
    /// every reconnect.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Option<SubscriptionHandle>
    where
        F: Fn(&StompMessage) + Send + Sync + 'static,
    {
        if topic.trim().is_empty() {
            log::warn!("Invalid topic for subscription");
            return None;
        }

        let id = format!("sub-{}", self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.send(Request::Subscribe {
            topic: topic.to_string(),
            id: id.clone(),
            handler: Arc::new(handler),
        });

        Some(SubscriptionHandle {
            topic: topic.to_string(),
            id,
        })
    }

    /// Removes the subscription for `topic`, live and replay record alike.
    pub fn unsubscribe(&self, topic: &str) {
        self.send(Request::Unsubscribe {
            topic: topic.to_string(),
            id: None,
        });
    }

    /// Like [`StompClient::unsubscribe`], but a no-op once `handle` has been
    /// replaced by a later `subscribe` to the same topic.
    pub fn unsubscribe_handle(&self, handle: &SubscriptionHandle) {
        self.send(Request::Unsubscribe {
            topic: handle.topic.clone(),
            id: Some(handle.id.clone()),
        });
    }

    /// Sends a message if connected; otherwise logs a warning and drops it.
    pub fn publish(&self, destination: &str, body: impl Into<Vec<u8>>, headers: Headers) {
        self.send(Request::Publish {
            destination: destination.to_string(),
            body: body.into(),
            headers,
        });
    }

    /// Serializes `payload` to JSON and publishes it with `content-type: application/json`.
    pub fn publish_json<T: Serialize>(
        &self,
        destination: &str,
        payload: &T,
        mut headers: Headers,
    ) -> Result<(), ClientError> {
        let body = serde_json::to_vec(payload)?;
        if !headers.iter().any(|(k, _)| k == "content-type") {
            headers.push(("content-type".to_string(), "application/json".to_string()));
        }
        self.publish(destination, body, headers);
        Ok(())
    }

    /// Shorthand for [`StompClient::publish`] without extra headers.
    pub fn send_message(&self, destination: &str, body: impl Into<Vec<u8>>) {
        self.publish(destination, body, Vec::new());
    }

    /// The latest published status.
    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    /// A receiver notified on every status change.
    pub fn state_changes(&self) -> watch::Receiver<ClientStatus> {
        self.status.clone()
    }

    /// Resolves once the status satisfies `predicate` (immediately if it already does).
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<ClientStatus, ClientError>
    where
        F: FnMut(&ClientStatus) -> bool,
    {
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(|status| predicate(status))
            .await
            .map_err(|_| ClientError::Stopped)?;
        Ok(status.clone())
    }

    fn send(&self, request: Request) {
        if self.requests.send(request).is_err() {
            log::warn!("STOMP client task has stopped; request dropped");
        }
    }
}

struct Registration {
    id: String,
    handler: MessageHandler,
    // A SUBSCRIBE for this registration went out on the current transport.
    live: bool,
}

struct Session {
    transport: Box<dyn Transport>,
    heartbeat: Option<Interval>,
    watchdog: Option<Interval>,
    inbound_deadline: Option<Duration>,
    last_inbound: Instant,
}

enum Wake {
    Request(Option<Request>),
    Inbound(Option<Result<Packet, TransportError>>),
    SendHeartbeat,
    CheckInbound,
    ReconnectDue,
}

enum HandshakeError {
    // Worth retrying.
    Transport(TransportError),
    // Broker refused us or spoke gibberish.
    Rejected(String),
}

impl From<TransportError> for HandshakeError {
    fn from(e: TransportError) -> Self {
        if e.is_protocol() {
            HandshakeError::Rejected(e.to_string())
        } else {
            HandshakeError::Transport(e)
        }
    }
}

struct Engine {
    options: ClientOptions,
    connector: Arc<dyn Connector>,
    tokens: Option<Arc<dyn TokenProvider>>,
    requests: mpsc::UnboundedReceiver<Request>,
    status: watch::Sender<ClientStatus>,
    registry: HashMap<String, Registration>,
    session: Option<Session>,
    reconnect_at: Option<Instant>,
    reconnect_attempts: u32,
    last_error: Option<String>,
}

impl Engine {
    async fn run(mut self) {
        log::debug!("STOMP client task started for {}", self.connector.describe());

        loop {
            let wake = match self.session.as_mut() {
                Some(session) => tokio::select! {
                    request = self.requests.recv() => Wake::Request(request),
                    inbound = session.transport.recv() => Wake::Inbound(inbound),
                    _ = tick(&mut session.heartbeat) => Wake::SendHeartbeat,
                    _ = tick(&mut session.watchdog) => Wake::CheckInbound,
                },
                None => tokio::select! {
                    request = self.requests.recv() => Wake::Request(request),
                    _ = wait_until(self.reconnect_at) => Wake::ReconnectDue,
                },
            };

            match wake {
                Wake::Request(Some(request)) => self.handle_request(request).await,
                Wake::Request(None) => {
                    log::debug!("All STOMP client handles dropped; shutting down");
                    self.disconnect().await;
                    return;
                }
                Wake::Inbound(Some(Ok(packet))) => self.handle_packet(packet).await,
                Wake::Inbound(Some(Err(e))) => self.handle_transport_error(e).await,
                Wake::Inbound(None) => self.handle_drop("connection closed by peer").await,
                Wake::SendHeartbeat => {
                    self.send_packet(Packet::Heartbeat).await;
                }
                Wake::CheckInbound => self.check_inbound().await,
                Wake::ReconnectDue => {
                    self.reconnect_at = None;
                    self.reconnect_attempts += 1;
                    log::info!(
                        "Reconnect attempt {}/{} to {}",
                        self.reconnect_attempts,
                        self.options.max_reconnect_attempts,
                        self.connector.describe()
                    );
                    self.open_session().await;
                }
            }
        }
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect => self.connect().await,
            Request::Disconnect => self.disconnect().await,
            Request::Subscribe { topic, id, handler } => self.subscribe(topic, id, handler).await,
            Request::Unsubscribe { topic, id } => self.unsubscribe(topic, id).await,
            Request::Publish {
                destination,
                body,
                headers,
            } => self.publish(destination, body, headers).await,
        }
    }

    async fn connect(&mut self) {
        if self.session.is_some() {
            log::debug!("connect() ignored: already connected");
            return;
        }
        self.reconnect_at = None;
        self.reconnect_attempts = 0;
        self.last_error = None;
        self.open_session().await;
    }

    async fn disconnect(&mut self) {
        self.reconnect_at = None;
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session
                .transport
                .send(Packet::Frame(Frame::new(Command::Disconnect)))
                .await
            {
                log::debug!("Failed to send DISCONNECT: {}", e);
            }
            session.transport.close().await;
            log::info!("STOMP client disconnected from {}", self.connector.describe());
        }
        self.registry.clear();
        self.last_error = None;
        self.set_state(ConnectionState::Disconnected);
    }

    async fn subscribe(&mut self, topic: String, id: String, handler: MessageHandler) {
        let previous = self.registry.insert(
            topic.clone(),
            Registration {
                id: id.clone(),
                handler,
                live: false,
            },
        );

        if self.session.is_none() {
            log::debug!("Registered {} for replay on next connect", topic);
            return;
        }

        if let Some(previous) = previous.filter(|p| p.live) {
            let frame = Frame::new(Command::Unsubscribe).header("id", previous.id);
            if !self.send_packet(frame.into()).await {
                return;
            }
        }
        self.send_subscribe(&topic, &id).await;
    }

    async fn unsubscribe(&mut self, topic: String, id: Option<String>) {
        let Some(registration) = self.take_registration(&topic, id.as_deref()) else {
            log::debug!("unsubscribe({}) ignored: no matching subscription", topic);
            return;
        };

        if registration.live && self.session.is_some() {
            let frame = Frame::new(Command::Unsubscribe).header("id", registration.id);
            self.send_packet(frame.into()).await;
        }
        log::info!("Unsubscribed from {}", topic);
    }

    fn take_registration(&mut self, topic: &str, id: Option<&str>) -> Option<Registration> {
        let matches = match (self.registry.get(topic), id) {
            (Some(current), Some(id)) => current.id == id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if matches {
            self.registry.remove(topic)
        } else {
            None
        }
    }

    async fn publish(&mut self, destination: String, body: Vec<u8>, headers: Headers) {
        if self.session.is_none() {
            log::warn!(
                "Cannot publish message to {} - STOMP client not connected",
                destination
            );
            return;
        }

        let frame = Frame::new(Command::Send)
            .header("destination", destination)
            .headers(headers)
            .with_body(body);
        self.send_packet(frame.into()).await;
    }

    /// CONNECTING phase. Requests keep being served while the handshake runs so
    /// a `disconnect()` can abort it.
    async fn open_session(&mut self) {
        self.set_state(ConnectionState::Connecting);

        let mut connect_frame = self.connect_frame();
        if let Some(tokens) = self.tokens.clone() {
            if let Some(token) = tokens.bearer_token().await {
                connect_frame = connect_frame.header("Authorization", format!("Bearer {}", token));
            }
        }
        let handshake = handshake(
            Arc::clone(&self.connector),
            connect_frame,
            self.options.connect_timeout(),
            self.options.debug,
        );
        tokio::pin!(handshake);

        let outcome = loop {
            let request = tokio::select! {
                outcome = &mut handshake => break outcome,
                request = self.requests.recv() => request,
            };

            match request {
                // Leave it to the main loop to notice the closed channel.
                None => return,
                Some(Request::Disconnect) => {
                    log::info!("Connection attempt aborted by disconnect()");
                    self.disconnect().await;
                    return;
                }
                Some(Request::Connect) => log::debug!("connect() ignored: already connecting"),
                Some(Request::Subscribe { topic, id, handler }) => {
                    self.registry.insert(
                        topic,
                        Registration {
                            id,
                            handler,
                            live: false,
                        },
                    );
                }
                Some(Request::Unsubscribe { topic, id }) => {
                    self.take_registration(&topic, id.as_deref());
                }
                Some(Request::Publish { destination, .. }) => log::warn!(
                    "Cannot publish message to {} - STOMP client not connected",
                    destination
                ),
            }
        };

        match outcome {
            Ok((transport, connected)) => self.establish(transport, connected).await,
            Err(HandshakeError::Rejected(message)) => {
                log::error!("STOMP error: {}", message);
                self.last_error = Some(message.clone());
                self.set_state(ConnectionState::Error(message));
            }
            Err(HandshakeError::Transport(e)) => {
                log::warn!("WebSocket connection failed: {}", e);
                self.last_error = Some(e.to_string());
                self.set_state(ConnectionState::Disconnected);
                self.schedule_reconnect();
            }
        }
    }

    fn connect_frame(&self) -> Frame {
        let mut frame = Frame::new(Command::Connect)
            .header("accept-version", "1.2,1.1,1.0")
            .header("heart-beat", self.options.heart_beat().header_value());

        if let Some(host) = &self.options.host {
            frame = frame.header("host", host.as_str());
        }
        frame.headers(self.options.connect_headers.clone())
    }

    async fn establish(&mut self, transport: Box<dyn Transport>, connected: Frame) {
        let server_beat = connected
            .get_header("heart-beat")
            .map(HeartBeat::parse)
            .unwrap_or_default();
        let negotiated = negotiate(self.options.heart_beat(), server_beat);

        log::info!(
            "WebSocket connected successfully to {} (STOMP {}, server {})",
            self.connector.describe(),
            connected.get_header("version").unwrap_or("1.0"),
            connected.get_header("server").unwrap_or("unknown")
        );

        self.session = Some(Session {
            transport,
            heartbeat: negotiated.send_every.map(repeating),
            watchdog: negotiated.expect_every.map(repeating),
            inbound_deadline: negotiated.inbound_deadline(),
            last_inbound: Instant::now(),
        });
        self.reconnect_attempts = 0;
        self.last_error = None;

        let topics: Vec<(String, String)> = self
            .registry
            .iter()
            .map(|(topic, registration)| (topic.clone(), registration.id.clone()))
            .collect();
        for (topic, id) in topics {
            if !self.send_subscribe(&topic, &id).await {
                return;
            }
        }

        self.set_state(ConnectionState::Connected);
    }

    async fn send_subscribe(&mut self, topic: &str, id: &str) -> bool {
        let frame = Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", topic)
            .header("ack", "auto");

        if !self.send_packet(frame.into()).await {
            return false;
        }
        if let Some(registration) = self.registry.get_mut(topic) {
            registration.live = true;
        }
        log::debug!("Subscribed to {} as {}", topic, id);
        true
    }

    /// Returns `false` when the write failed; the failure has been handled.
    async fn send_packet(&mut self, packet: Packet) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        if self.options.debug {
            match &packet {
                Packet::Frame(frame) => log::debug!("STOMP >>> {}", frame.command),
                Packet::Heartbeat => log::trace!("STOMP >>> heart-beat"),
            }
        }

        match session.transport.send(packet).await {
            Ok(()) => true,
            Err(e) => {
                self.handle_transport_error(e).await;
                false
            }
        }
    }

    async fn handle_packet(&mut self, packet: Packet) {
        if let Some(session) = self.session.as_mut() {
            session.last_inbound = Instant::now();
        }

        let frame = match packet {
            Packet::Heartbeat => {
                if self.options.debug {
                    log::trace!("STOMP <<< heart-beat");
                }
                return;
            }
            Packet::Frame(frame) => frame,
        };

        if self.options.debug {
            log::debug!("STOMP <<< {} {:?}", frame.command, frame.headers);
        }

        match frame.command {
            Command::Message => self.dispatch(StompMessage::from_frame(frame)),
            Command::Receipt => log::debug!(
                "Receipt {}",
                frame.get_header("receipt-id").unwrap_or("?")
            ),
            Command::Error => {
                let message = error_message(&frame);
                log::error!("STOMP error: {}", message);
                self.fail(message).await;
            }
            other => log::debug!("Ignoring unexpected {} frame", other),
        }
    }

    fn dispatch(&self, message: StompMessage) {
        let by_id = message
            .subscription
            .as_deref()
            .and_then(|id| self.registry.values().find(|r| r.id == id));
        let registration = by_id.or_else(|| self.registry.get(&message.destination));

        let Some(registration) = registration else {
            log::debug!("No handler for message on {}", message.destination);
            return;
        };

        let handler = Arc::clone(&registration.handler);
        if catch_unwind(AssertUnwindSafe(|| handler(&message))).is_err() {
            log::error!("Message handler for {} panicked", message.destination);
        }
    }

    async fn handle_transport_error(&mut self, e: TransportError) {
        if e.is_protocol() {
            log::error!("STOMP protocol error: {}", e);
            self.fail(e.to_string()).await;
        } else {
            self.handle_drop(&e.to_string()).await;
        }
    }

    /// Protocol-level failure: tear down, surface the error, do not retry.
    async fn fail(&mut self, message: String) {
        self.teardown().await;
        self.last_error = Some(message.clone());
        self.set_state(ConnectionState::Error(message));
    }

    /// Transport-level failure: tear down and schedule a reconnect.
    async fn handle_drop(&mut self, reason: &str) {
        self.teardown().await;
        log::warn!("WebSocket disconnected: {}", reason);
        self.last_error = Some(reason.to_string());
        self.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    async fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.transport.close().await;
        }
        for registration in self.registry.values_mut() {
            registration.live = false;
        }
    }

    async fn check_inbound(&mut self) {
        let silent_for = match self.session.as_ref() {
            Some(session) => match session.inbound_deadline {
                Some(deadline) if session.last_inbound.elapsed() > deadline => {
                    session.last_inbound.elapsed()
                }
                _ => return,
            },
            None => return,
        };

        let reason = format!("no heart-beat from server for {}ms", silent_for.as_millis());
        self.handle_drop(&reason).await;
    }

    fn schedule_reconnect(&mut self) {
        let max = self.options.max_reconnect_attempts;
        if self.reconnect_attempts < max {
            let delay = self.options.reconnect_delay();
            log::info!(
                "Reconnecting in {}ms (attempt {}/{})",
                delay.as_millis(),
                self.reconnect_attempts + 1,
                max
            );
            self.reconnect_at = Some(Instant::now() + delay);
        } else {
            log::warn!(
                "Giving up after {} reconnect attempts; call connect() to try again",
                self.reconnect_attempts
            );
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let next = ClientStatus {
            state,
            reconnect_attempts: self.reconnect_attempts,
            last_error: self.last_error.clone(),
        };
        let previous = self.status.send_replace(next.clone());
        if previous.state != next.state {
            log::debug!("STOMP state {} -> {}", previous.state, next.state);
        }
    }
}

/// Opens a transport and runs the CONNECT / CONNECTED exchange.
async fn handshake(
    connector: Arc<dyn Connector>,
    connect: Frame,
    timeout: Duration,
    debug: bool,
) -> Result<(Box<dyn Transport>, Frame), HandshakeError> {
    let mut transport = connector.open().await?;

    if debug {
        log::debug!("STOMP >>> {} {:?}", connect.command, connect.headers);
    }
    transport.send(Packet::Frame(connect)).await?;

    let reply = tokio::time::timeout(timeout, async {
        loop {
            match transport.recv().await {
                Some(Ok(Packet::Heartbeat)) => continue,
                Some(Ok(Packet::Frame(frame))) => return Ok(frame),
                Some(Err(e)) => return Err(e),
                None => return Err(TransportError::Closed),
            }
        }
    })
    .await;

    let frame = match reply {
        Ok(Ok(frame)) => frame,
        Ok(Err(e)) => {
            transport.close().await;
            return Err(e.into());
        }
        Err(_) => {
            transport.close().await;
            return Err(HandshakeError::Transport(TransportError::ConnectFailed(
                format!("no CONNECTED frame within {}ms", timeout.as_millis()),
            )));
        }
    };

    match frame.command {
        Command::Connected => Ok((transport, frame)),
        Command::Error => {
            transport.close().await;
            Err(HandshakeError::Rejected(error_message(&frame)))
        }
        other => {
            transport.close().await;
            Err(HandshakeError::Rejected(format!(
                "unexpected {} frame during handshake",
                other
            )))
        }
    }
}

fn error_message(frame: &Frame) -> String {
    if let Some(message) = frame.get_header("message") {
        return message.to_string();
    }
    let body = frame.body_text();
    let body = body.trim();
    if body.is_empty() {
        FALLBACK_ERROR.to_string()
    } else {
        body.to_string()
    }
}

fn repeating(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_header_then_body() {
        let with_header = Frame::new(Command::Error)
            .header("message", "Access denied")
            .with_body("details");
        assert_eq!(error_message(&with_header), "Access denied");

        let with_body = Frame::new(Command::Error).with_body("  broker exploded \n");
        assert_eq!(error_message(&with_body), "broker exploded");

        assert_eq!(error_message(&Frame::new(Command::Error)), FALLBACK_ERROR);
    }

    #[test]
    fn status_flags_follow_state() {
        let mut status = ClientStatus::default();
        assert!(!status.is_connected());
        assert_eq!(status.state.label(), "DISCONNECTED");

        status.state = ConnectionState::Error("boom".to_string());
        assert!(status.has_error());
        assert_eq!(status.error(), Some("boom"));
        assert_eq!(status.state.to_string(), "ERROR (boom)");

        status.state = ConnectionState::Connecting;
        assert!(status.is_connecting());
        assert_eq!(status.error(), None);
    }
}
