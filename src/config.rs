// src/config.rs
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use std::{env, fs, io};

use serde::Deserialize;

pub const CONFIG_PATH_VAR: &str = "SWAHILICARD_NFC_CONFIG";
pub const LISTEN_ADDR_VAR: &str = "SWAHILICARD_NFC_ADDR";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid listen address {0:?}")]
    Address(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// WebSocket server address.
    pub listen_addr: SocketAddr,
    /// How long one PC/SC status wait blocks before looping.
    pub poll_interval_ms: u64,
    /// Messages buffered per WebSocket subscriber.
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 3500)),
            poll_interval_ms: 500,
            event_capacity: 100,
        }
    }
}

impl Config {
    /// Defaults, then the file named by `SWAHILICARD_NFC_CONFIG`, then
    /// `SWAHILICARD_NFC_ADDR`.
    pub fn load() -> Result<Config, ConfigError> {
        let mut config = match env::var(CONFIG_PATH_VAR) {
            Ok(path) => Config::from_file(&path)?,
            Err(_) => Config::default(),
        };

        if let Ok(addr) = env::var(LISTEN_ADDR_VAR) {
            config.listen_addr = parse_addr(&addr)?;
        }

        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Config::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Config, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse_addr(addr: &str) -> Result<SocketAddr, ConfigError> {
    addr.parse()
        .map_err(|_| ConfigError::Address(addr.to_string()))
}
