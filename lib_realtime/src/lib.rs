//! # lib_realtime
//!
//! Real-time plumbing for the riskstream tools: a STOMP-over-WebSocket client
//! that keeps an "always connected" publish/subscribe channel alive, replaying
//! topic subscriptions after every reconnect, plus the analytics feed built on
//! top of it and the config/logging layers the binaries share.
//!
//! Modules are gated by cargo features, see `Cargo.toml`.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// STOMP codec, transports and the reconnecting client.
#[cfg(feature = "stomp")]
pub mod stomp;

/// Real-time analytics feed over the dashboard topics.
#[cfg(feature = "analytics")]
pub mod analytics;

/// Layered client configuration.
#[cfg(feature = "configs")]
pub mod configs;

/// fern based console and file logging.
#[cfg(feature = "loggers")]
pub mod loggers;

#[cfg(feature = "stomp")]
pub use stomp::{ClientOptions, ClientStatus, ConnectionState, StompClient, StompMessage};
