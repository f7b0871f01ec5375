use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stomp::heartbeat::HeartBeat;

/// Default fixed delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;
/// Default cap on automatic reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Default heart-beat offer, both directions.
pub const DEFAULT_HEARTBEAT_MS: u64 = 4000;
/// Default time allowed between opening the socket and receiving CONNECTED.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10000;

/// # Client Options
///
/// Runtime knobs of the reconnecting client. Transport concerns (URL, SockJS)
/// live with the [`Connector`](crate::stomp::transport::Connector) instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientOptions {
    /// Log every inbound and outbound frame at debug level.
    pub debug: bool,
    /// Issue `connect()` as soon as the client is created.
    pub auto_connect: bool,
    /// Fixed delay before each automatic reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Automatic reconnect attempts allowed after a drop. `0` disables them.
    pub max_reconnect_attempts: u32,
    pub heartbeat_outgoing_ms: u64,
    pub heartbeat_incoming_ms: u64,
    pub connect_timeout_ms: u64,
    /// Value of the `host` header sent with CONNECT.
    pub host: Option<String>,
    /// Extra CONNECT headers (`login`, `passcode`, ...).
    pub connect_headers: BTreeMap<String, String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            debug: false,
            auto_connect: true,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_outgoing_ms: DEFAULT_HEARTBEAT_MS,
            heartbeat_incoming_ms: DEFAULT_HEARTBEAT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            host: None,
            connect_headers: BTreeMap::new(),
        }
    }
}

impl ClientOptions {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// The heart-beat offer sent with CONNECT.
    pub fn heart_beat(&self) -> HeartBeat {
        HeartBeat::new(self.heartbeat_outgoing_ms, self.heartbeat_incoming_ms)
    }
}
