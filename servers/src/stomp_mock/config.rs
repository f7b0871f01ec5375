use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "In-memory STOMP 1.2 broker over WebSocket, for local development", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "STOMP_MOCK_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "STOMP_MOCK_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "STOMP_MOCK_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "STOMP_MOCK_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "STOMP_MOCK_DEMO", help = "Publish sample analytics traffic (true/false).")]
    pub demo: Option<bool>,

    #[clap(long, env = "STOMP_MOCK_DEMO_INTERVAL_MS", help = "Milliseconds between demo messages.")]
    pub demo_interval_ms: Option<u64>,

    #[clap(long, env = "STOMP_MOCK_HEARTBEAT_MS", help = "Heart-beat the broker offers in CONNECTED (0 = none).")]
    pub heartbeat_ms: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            demo: other.demo.or(self.demo),
            demo_interval_ms: other.demo_interval_ms.or(self.demo_interval_ms),
            heartbeat_ms: other.heartbeat_ms.or(self.heartbeat_ms),
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(9003)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn demo(&self) -> bool {
        self.demo.unwrap_or(false)
    }

    pub fn demo_interval_ms(&self) -> u64 {
        self.demo_interval_ms.unwrap_or(2000).max(10)
    }

    pub fn heartbeat_ms(&self) -> u64 {
        self.heartbeat_ms.unwrap_or(0)
    }
}

pub fn load_config() -> Config {
    // 1. Load defaults
    let default_config = Config {
        port: Some(9003),
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        demo: Some(false),
        demo_interval_ms: Some(2000),
        heartbeat_ms: Some(0),
        ..Default::default()
    };

    // 2. CLI args (which include env vars), parsed once and merged last.
    let cli_args = Config::parse();

    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_stomp_mock.conf"));

    let mut current_config = default_config;

    // 3. Config file (server_stomp_mock.conf) if present.
    if config_file_path.exists() {
        if let Ok(config_str) = fs::read_to_string(&config_file_path) {
            if let Ok(file_config) = serde_json::from_str::<Config>(&config_str) {
                current_config = current_config.merge(file_config);
            } else {
                log::warn!("Failed to parse config file: {}. Falling back to other sources.", config_file_path.display());
            }
        } else {
            log::warn!("Failed to read config file: {}. Falling back to other sources.", config_file_path.display());
        }
    } else {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", config_file_path.display());
    }

    current_config.merge(cli_args)
}
