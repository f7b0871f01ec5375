//! # Transport Seam
//!
//! The reconnecting client never touches sockets directly. It asks a
//! [`Connector`] for a fresh [`Transport`] on every (re)connect attempt and then
//! only exchanges [`Packet`]s with it. This keeps the connection state machine
//! testable against an in-memory transport, while [`WsConnector`] provides the
//! real WebSocket implementation on top of `tokio-tungstenite`.
//!
//! ## SockJS endpoints
//! Brokers such as Spring's message broker usually expose a SockJS endpoint like
//! `http://host:8080/ws`. SockJS servers also accept a plain WebSocket at
//! `<endpoint>/websocket`, which is what [`resolve_endpoint`] maps to when
//! SockJS mode is on.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use url::Url;

use crate::stomp::frame::{decode_packets, FrameError, Packet};

/// Errors produced by a transport or while opening one.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid endpoint URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Connection closed")]
    Closed,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] FrameError),
}

impl TransportError {
    /// Protocol errors mean the peer is speaking something we cannot decode,
    /// retrying the same endpoint will not help.
    pub fn is_protocol(&self) -> bool {
        matches!(self, TransportError::Protocol(_))
    }
}

/// A bidirectional packet pipe to a broker.
#[async_trait]
pub trait Transport: Send {
    /// Writes one packet.
    async fn send(&mut self, packet: Packet) -> Result<(), TransportError>;

    /// Reads the next packet. `None` means the peer closed the connection.
    ///
    /// Must be cancel-safe: the client polls it inside `tokio::select!`.
    async fn recv(&mut self) -> Option<Result<Packet, TransportError>>;

    /// Closes the connection. Errors are swallowed, the transport is being
    /// discarded anyway.
    async fn close(&mut self);
}

/// Transport factory called once per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// Human readable target, used in log lines.
    fn describe(&self) -> String {
        "transport".to_string()
    }
}

/// Maps a user supplied broker URL to the WebSocket URL actually dialed.
///
/// `http`/`https` become `ws`/`wss`. With `sockjs` set, an `http(s)` endpoint is
/// also suffixed with `/websocket` (the SockJS raw WebSocket path).
pub fn resolve_endpoint(raw: &str, sockjs: bool) -> Result<String, TransportError> {
    let invalid = |reason: String| TransportError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    let mut url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    let (scheme, from_http) = match url.scheme() {
        "http" => ("ws", true),
        "https" => ("wss", true),
        "ws" => ("ws", false),
        "wss" => ("wss", false),
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    };

    url.set_scheme(scheme)
        .map_err(|_| invalid(format!("cannot switch scheme to '{}'", scheme)))?;

    if sockjs && from_http {
        let path = url.path().trim_end_matches('/').to_string();
        if !path.ends_with("/websocket") {
            url.set_path(&format!("{}/websocket", path));
        }
    }

    Ok(url.to_string())
}

/// Opens WebSocket connections to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: String,
}

impl WsConnector {
    pub fn new(url: &str, sockjs: bool) -> Result<Self, TransportError> {
        Ok(Self {
            endpoint: resolve_endpoint(url, sockjs)?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        let (ws_stream, _) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let (sink, stream) = ws_stream.split();

        Ok(Box::new(WsTransport {
            sink,
            stream,
            pending: VecDeque::new(),
        }))
    }

    fn describe(&self) -> String {
        self.endpoint.clone()
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// STOMP packets carried over a WebSocket, one or more per message.
pub struct WsTransport {
    sink: SplitSink<WsStream, WsMessage>,
    stream: SplitStream<WsStream>,
    // Packets decoded from a message that carried more than one.
    pending: VecDeque<Packet>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, packet: Packet) -> Result<(), TransportError> {
        let message = match String::from_utf8(packet.encode()) {
            Ok(text) => WsMessage::Text(text.into()),
            Err(raw) => WsMessage::Binary(raw.into_bytes().into()),
        };
        self.sink.send(message).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Packet, TransportError>> {
        loop {
            if let Some(packet) = self.pending.pop_front() {
                return Some(Ok(packet));
            }

            let bytes = match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => text.as_str().as_bytes().to_vec(),
                Ok(WsMessage::Binary(data)) => data.to_vec(),
                Ok(WsMessage::Close(_)) => return None,
                // Pings are answered by tungstenite itself.
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            };

            match decode_packets(&bytes) {
                Ok(packets) => self.pending.extend(packets),
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            log::debug!("WebSocket close failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sockjs_http_endpoint_maps_to_raw_websocket() {
        assert_eq!(
            resolve_endpoint("http://localhost:8080/ws", true).unwrap(),
            "ws://localhost:8080/ws/websocket"
        );
        assert_eq!(
            resolve_endpoint("https://risk.example.com/ws/", true).unwrap(),
            "wss://risk.example.com/ws/websocket"
        );
    }

    #[test]
    fn plain_websocket_urls_are_left_alone() {
        assert_eq!(
            resolve_endpoint("ws://localhost:8080/ws", true).unwrap(),
            "ws://localhost:8080/ws"
        );
        assert_eq!(
            resolve_endpoint("http://localhost:8080/ws", false).unwrap(),
            "ws://localhost:8080/ws"
        );
    }

    #[test]
    fn rejects_unsupported_urls() {
        assert!(matches!(
            resolve_endpoint("ftp://localhost/ws", false),
            Err(TransportError::InvalidUrl { .. })
        ));
        assert!(matches!(
            resolve_endpoint("not a url", false),
            Err(TransportError::InvalidUrl { .. })
        ));
    }
}
