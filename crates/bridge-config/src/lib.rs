//! Layered configuration loading for the bridge server, and DSN parsing for
//! the bridge client.
//!
//! This crate provides configuration loading with minimal dependencies,
//! designed to be imported by both the server and client crates without
//! causing circular dependency issues.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/bridge/config.toml` (system)
//! 2. `~/.config/bridge/config.toml` (user)
//! 3. `./bridge.toml` (local override)
//! 4. Environment variables (`BRIDGE_*`)
//!
//! # Example Config
//!
//! ```toml
//! [connection]
//! deviceID = "device-001"
//! amqpURL = "amqp://127.0.0.1:5672/%2f"
//! mysqlDSN = "user:pass@tcp(127.0.0.1:3306)/app"
//! mode = "open"
//!
//! [pool]
//! maxOpen = 10
//!
//! [workers]
//! workerCount = 8
//!
//! [validator]
//! allowDDL = false
//! ```

pub mod dsn;
pub mod infra;
pub mod loader;

pub use dsn::{ClientDsn, ReconnectConfig};
pub use infra::{
    CacheConfig, ConnectionConfig, HeartbeatConfig, PoolConfig, RateLimitConfig, ValidatorConfig,
    WorkersConfig,
};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(rename = "connection", default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(rename = "rateLimit", default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

impl ServerConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/bridge/config.toml`
    /// 3. `~/.config/bridge/config.toml`
    /// 4. `./bridge.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./bridge.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return information about sources.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = ServerConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_spec_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.pool.max_open, 10);
        assert_eq!(config.workers.worker_count, 8);
        assert!(config.validator.allow_dml);
        assert!(!config.validator.allow_ddl);
        assert_eq!(config.heartbeat.max_missed, 3);
    }

    #[test]
    fn load_works_with_no_config_files_present() {
        let config = ServerConfig::load().unwrap();
        assert_eq!(config.connection.mode, "open");
    }
}
