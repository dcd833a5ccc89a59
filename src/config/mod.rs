//! Configuration loading for the server binary.
//!
//! Sources, in priority order:
//! 1. Hardcoded defaults
//! 2. Optional TOML file (`config/hubdb.toml`, or an explicit path)
//! 3. Environment variables (highest priority, prefix `HUBDB`, separator
//!    `__`, e.g. `HUBDB__SERVER__LISTEN_ADDR`)

#[cfg(test)]
mod config_test;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;

use crate::Result;

const DEFAULT_CONFIG_PATH: &str = "config/hubdb";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Listener addresses and log location
    #[serde(default)]
    pub server: ServerConfig,
    /// Snapshot persistence
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    /// RPC forwarding behavior
    #[serde(default)]
    pub rpc: RpcConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// TCP listener address (newline-framed JSON)
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// WebSocket listener address
    #[serde(default = "default_ws_listen_addr")]
    pub ws_listen_addr: String,
    /// Directory for the rolling log file
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotConfig {
    /// Snapshot file location
    #[serde(default = "default_snapshot_path")]
    pub path: PathBuf,
    /// Seconds between periodic saves
    #[serde(default = "default_snapshot_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RpcConfig {
    /// Lifetime of a forwarded call awaiting its response, in milliseconds
    #[serde(default = "default_pending_call_timeout_ms")]
    pub pending_call_timeout_ms: u64,
}

fn default_listen_addr() -> String {
    "127.0.0.1:6320".to_string()
}

fn default_ws_listen_addr() -> String {
    "127.0.0.1:6321".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data/db.json")
}

fn default_snapshot_interval_secs() -> u64 {
    60
}

fn default_pending_call_timeout_ms() -> u64 {
    30_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            ws_listen_addr: default_ws_listen_addr(),
            log_dir: default_log_dir(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: default_snapshot_path(),
            interval_secs: default_snapshot_interval_secs(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            pending_call_timeout_ms: default_pending_call_timeout_ms(),
        }
    }
}

impl Settings {
    /// Loads configuration. With `path`, the file is required; without it,
    /// the default location is used when present.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        builder = match path {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_PATH).required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix("HUBDB")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        self.server
            .ws_listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Message(format!("invalid ws_listen_addr: {e}")))?;
        if self.snapshot.interval_secs == 0 {
            return Err(ConfigError::Message(
                "snapshot.interval_secs must be at least 1".to_string(),
            )
            .into());
        }
        if self.rpc.pending_call_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "rpc.pending_call_timeout_ms must be at least 1".to_string(),
            )
            .into());
        }
        Ok(())
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot.interval_secs)
    }

    pub fn pending_call_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.pending_call_timeout_ms)
    }

    pub fn ws_socket_addr(&self) -> SocketAddr {
        self.server
            .ws_listen_addr
            .parse()
            .expect("ws_listen_addr validated at load time")
    }
}
