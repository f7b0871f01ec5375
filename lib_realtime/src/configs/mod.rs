//! # Configuration Modules
//!
//! Layered configuration of the STOMP client binaries.

/// Defaults, JSON5 file, environment and command line, merged in that order.
pub mod config_client;

pub use config_client::{load_config, ClientConfig, ConfigError};
