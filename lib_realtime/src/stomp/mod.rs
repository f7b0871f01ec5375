//! # STOMP Module
//!
//! Everything needed to hold a resilient STOMP session against a message broker
//! reachable over WebSocket (or a SockJS endpoint).
//!
//! ## Contained Modules:
//! - **`frame`**: STOMP 1.2 frame and heart-beat codec.
//! - **`heartbeat`**: `heart-beat` header parsing and interval negotiation.
//! - **`transport`**: the `Transport`/`Connector` seam and the WebSocket implementation.
//! - **`client`**: the reconnecting client with subscription replay.
//! - **`message`**, **`options`**, **`auth`**: the types the client is driven with.

/// STOMP 1.2 frame encoding and decoding.
pub mod frame;
/// Heart-beat negotiation.
pub mod heartbeat;
/// Transport abstraction and the tokio-tungstenite WebSocket transport.
pub mod transport;
/// The reconnecting publish/subscribe client.
pub mod client;
/// Messages delivered to subscribers.
pub mod message;
/// Runtime options of the client.
pub mod options;
/// Bearer token source for CONNECT.
pub mod auth;

// --- Public API Re-exports ---
pub use auth::{StaticToken, TokenProvider};
pub use client::{
    ClientError, ClientStatus, ConnectionState, Headers, StompClient, SubscriptionHandle,
};
pub use frame::{Command, Frame, FrameError, Packet};
pub use message::{MessageHandler, StompMessage};
pub use options::ClientOptions;
pub use transport::{Connector, Transport, TransportError, WsConnector};
