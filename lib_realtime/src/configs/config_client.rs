//! # Client Configuration
//!
//! Layered configuration for the STOMP client binaries:
//!
//! 1. built-in defaults ([`ClientConfig::defaults`]),
//! 2. an optional JSON5 file (`--config-path`, `./stomp_client.conf` or
//!    `<config dir>/riskstream/stomp_client.conf`),
//! 3. environment variables and command line arguments (clap handles both).
//!
//! Every field is an `Option` so layers can be merged: a `Some` in a later layer
//! overrides the earlier value.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::stomp::options::{
    ClientOptions, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HEARTBEAT_MS,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY_MS,
};
use crate::stomp::transport::{TransportError, WsConnector};
use crate::stomp::{StaticToken, StompClient};

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "stomp_client.conf";
/// The broker endpoint used by the dashboard backend in development.
pub const DEFAULT_URL: &str = "http://localhost:8080/ws";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid connect header '{0}', expected name:value")]
    InvalidHeader(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Args, Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    #[arg(long, env = "STOMP_URL", help = "Broker endpoint: ws://, wss:// or a SockJS http(s):// endpoint.")]
    pub url: Option<String>,

    #[arg(long, env = "STOMP_SOCKJS", help = "Treat http(s) URLs as SockJS endpoints (true/false).")]
    pub sockjs: Option<bool>,

    #[arg(long, env = "STOMP_DEBUG", help = "Log every STOMP frame at debug level (true/false).")]
    pub debug: Option<bool>,

    #[arg(long, env = "STOMP_AUTO_CONNECT", help = "Connect as soon as the client is created (true/false).")]
    pub auto_connect: Option<bool>,

    #[arg(long, env = "STOMP_RECONNECT_DELAY_MS", help = "Fixed delay in milliseconds before each reconnect attempt.")]
    pub reconnect_delay_ms: Option<u64>,

    #[arg(long, env = "STOMP_MAX_RECONNECT_ATTEMPTS", help = "Automatic reconnect attempts before giving up.")]
    pub max_reconnect_attempts: Option<u32>,

    #[arg(long, env = "STOMP_HEARTBEAT_OUTGOING_MS", help = "Heart-beat interval offered for outgoing traffic (0 = none).")]
    pub heartbeat_outgoing_ms: Option<u64>,

    #[arg(long, env = "STOMP_HEARTBEAT_INCOMING_MS", help = "Heart-beat interval requested from the broker (0 = none).")]
    pub heartbeat_incoming_ms: Option<u64>,

    #[arg(long, env = "STOMP_CONNECT_TIMEOUT_MS", help = "Milliseconds to wait for the CONNECTED frame.")]
    pub connect_timeout_ms: Option<u64>,

    #[arg(long, env = "STOMP_HOST", help = "Virtual host sent in the CONNECT frame. Defaults to the URL host.")]
    pub host: Option<String>,

    #[arg(long, env = "STOMP_LOGIN", help = "STOMP login header.")]
    pub login: Option<String>,

    #[arg(long, env = "STOMP_PASSCODE", help = "STOMP passcode header.")]
    pub passcode: Option<String>,

    #[arg(long, env = "STOMP_TOKEN", help = "Bearer token sent as the Authorization header on CONNECT.")]
    pub token: Option<String>,

    #[arg(long = "header", value_name = "NAME:VALUE", help = "Extra CONNECT header, repeatable.")]
    pub connect_headers: Option<Vec<String>>,

    #[arg(long, env = "STOMP_CONFIG_PATH", help = "Path to the JSON5 configuration file.")]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "STOMP_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "STOMP_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,
}

impl ClientConfig {
    /// Built-in defaults, matching what the dashboard client used.
    pub fn defaults() -> Self {
        Self {
            url: Some(DEFAULT_URL.to_string()),
            sockjs: Some(true),
            debug: Some(false),
            auto_connect: Some(true),
            reconnect_delay_ms: Some(DEFAULT_RECONNECT_DELAY_MS),
            max_reconnect_attempts: Some(DEFAULT_MAX_RECONNECT_ATTEMPTS),
            heartbeat_outgoing_ms: Some(DEFAULT_HEARTBEAT_MS),
            heartbeat_incoming_ms: Some(DEFAULT_HEARTBEAT_MS),
            connect_timeout_ms: Some(DEFAULT_CONNECT_TIMEOUT_MS),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            ..Default::default()
        }
    }

    /// Merges two configs; `Some` values in `other` win.
    pub fn merge(self, other: ClientConfig) -> ClientConfig {
        ClientConfig {
            url: other.url.or(self.url),
            sockjs: other.sockjs.or(self.sockjs),
            debug: other.debug.or(self.debug),
            auto_connect: other.auto_connect.or(self.auto_connect),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            heartbeat_outgoing_ms: other.heartbeat_outgoing_ms.or(self.heartbeat_outgoing_ms),
            heartbeat_incoming_ms: other.heartbeat_incoming_ms.or(self.heartbeat_incoming_ms),
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
            host: other.host.or(self.host),
            login: other.login.or(self.login),
            passcode: other.passcode.or(self.passcode),
            token: other.token.or(self.token),
            connect_headers: other.connect_headers.or(self.connect_headers),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
        }
    }

    /// Reads a JSON5 config file (comments and trailing commas allowed).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        json5::from_str::<ClientConfig>(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_deref().unwrap_or(DEFAULT_URL)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Runtime options for [`StompClient`].
    pub fn to_options(&self) -> Result<ClientOptions, ConfigError> {
        let defaults = ClientOptions::default();

        let mut connect_headers = BTreeMap::new();
        if let Some(login) = &self.login {
            connect_headers.insert("login".to_string(), login.clone());
        }
        if let Some(passcode) = &self.passcode {
            connect_headers.insert("passcode".to_string(), passcode.clone());
        }
        for raw in self.connect_headers.iter().flatten() {
            let (name, value) = raw
                .split_once(':')
                .filter(|(name, _)| !name.trim().is_empty())
                .ok_or_else(|| ConfigError::InvalidHeader(raw.clone()))?;
            connect_headers.insert(name.trim().to_string(), value.trim().to_string());
        }

        let host = match &self.host {
            Some(host) => Some(host.clone()),
            None => Url::parse(self.url())
                .ok()
                .and_then(|url| url.host_str().map(str::to_string)),
        };

        Ok(ClientOptions {
            debug: self.debug.unwrap_or(defaults.debug),
            auto_connect: self.auto_connect.unwrap_or(defaults.auto_connect),
            reconnect_delay_ms: self.reconnect_delay_ms.unwrap_or(defaults.reconnect_delay_ms),
            max_reconnect_attempts: self
                .max_reconnect_attempts
                .unwrap_or(defaults.max_reconnect_attempts),
            heartbeat_outgoing_ms: self
                .heartbeat_outgoing_ms
                .unwrap_or(defaults.heartbeat_outgoing_ms),
            heartbeat_incoming_ms: self
                .heartbeat_incoming_ms
                .unwrap_or(defaults.heartbeat_incoming_ms),
            connect_timeout_ms: self.connect_timeout_ms.unwrap_or(defaults.connect_timeout_ms),
            host,
            connect_headers,
        })
    }

    pub fn connector(&self) -> Result<WsConnector, ConfigError> {
        Ok(WsConnector::new(self.url(), self.sockjs.unwrap_or(true))?)
    }

    /// Builds a client over WebSocket. Must be called inside a tokio runtime.
    pub fn build_client(&self) -> Result<StompClient, ConfigError> {
        let options = self.to_options()?;
        let connector = Arc::new(self.connector()?);

        let client = match self.token.clone() {
            Some(token) => StompClient::with_token_provider(
                options,
                connector,
                Arc::new(StaticToken::new(Some(token))),
            ),
            None => StompClient::new(options, connector),
        };
        Ok(client)
    }
}

/// `./stomp_client.conf` when present, otherwise the per-user config directory.
fn default_config_path() -> PathBuf {
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    dirs::config_dir()
        .map(|dir| dir.join("riskstream").join(DEFAULT_CONFIG_FILE))
        .unwrap_or(local)
}

/// Resolves the final configuration from the command line layer `cli`.
///
/// `cli` is what clap produced (it already includes environment variables).
pub fn load_config(cli: ClientConfig) -> Result<ClientConfig, ConfigError> {
    let config_file_path = cli.config_path.clone().unwrap_or_else(default_config_path);

    let mut current = ClientConfig::defaults();

    if config_file_path.exists() {
        current = current.merge(ClientConfig::from_file(&config_file_path)?);
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    Ok(current.merge(cli))
}
