//! Server configuration.
//!
//! Loaded in three layers: stock defaults, then an optional TOML file, then
//! command-line overrides (`--host`, `--port`). The client side has no file;
//! its options are all flags (see [`crate::pipeline`]).
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [server]
//! host = "127.0.0.1"        # Address to listen on (IP or hostname)
//! port = 50051              # 0 picks an ephemeral port
//! shutdown_grace_secs = 5   # How long in-flight calls may run after shutdown starts
//!
//! [workers]
//! max_workers = 10          # Calls processed concurrently; the rest queue
//!
//! [limits]
//! max_frame_bytes = 67108864  # Largest request frame accepted (64 MiB)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::protocol::{DEFAULT_MAX_FRAME_BYTES, HEADER_LEN};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 50051;
pub const DEFAULT_MAX_WORKERS: usize = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration loaded from a TOML file.
///
/// All fields have defaults; a file only needs the values it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Listening address and shutdown behaviour.
    pub server: ListenConfig,
    /// Size of the worker pool.
    pub workers: WorkersConfig,
    /// Protocol limits.
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_grace_secs: u64,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            shutdown_grace_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkersConfig {
    /// Maximum calls in flight at once. Further calls wait for a free slot.
    pub max_workers: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Largest frame payload the server reads, in bytes.
    pub max_frame_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ServerConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "server.host must not be empty".into(),
            ));
        }
        if self.workers.max_workers == 0 {
            return Err(ConfigError::Validation(
                "workers.max_workers must be at least 1".into(),
            ));
        }
        if self.workers.max_workers > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Validation(format!(
                "workers.max_workers must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.limits.max_frame_bytes <= HEADER_LEN {
            return Err(ConfigError::Validation(format!(
                "limits.max_frame_bytes must be larger than {HEADER_LEN}"
            )));
        }
        Ok(())
    }

    /// `host:port` as given, for binding and logging.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_grace_secs)
    }

    /// Apply command-line overrides on top of the loaded values.
    pub fn with_overrides(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.server.host = host;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
        self
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(ServerConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto the stock defaults, deserialize, validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<ServerConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ServerConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the server config.
///
/// With no path the stock defaults are used. A path that doesn't exist is an
/// error: it was asked for explicitly.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let overlay = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            Some(toml::from_str::<toml::Value>(&content)?)
        }
        None => None,
    };
    resolve_config(overlay)
}

/// Returns a fully-commented stock config file.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# pixel-relay server configuration
# ================================
#
# All options are optional. Values shown are the defaults.
# Pass the file with `pixel-relay serve --config <path>`.
# `--host` and `--port` on the command line override this file.

[server]
# Address to listen on. An IP address or a resolvable hostname.
host = "127.0.0.1"
# TCP port. 0 asks the OS for an ephemeral port.
port = 50051
# After a shutdown signal, calls already running get this many seconds to
# finish before they are aborted. No partial results are ever sent.
shutdown_grace_secs = 5

[workers]
# How many calls are transformed at once. Calls beyond this wait in line
# until a worker frees up.
max_workers = 10

[limits]
# Largest request frame the server will read, in bytes (64 MiB).
max_frame_bytes = 67108864
"##
}
