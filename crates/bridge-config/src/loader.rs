//! Config file discovery, loading, and environment variable overlay.

use crate::infra::{
    CacheConfig, ConnectionConfig, HeartbeatConfig, PoolConfig, RateLimitConfig, ValidatorConfig,
    WorkersConfig,
};
use crate::{ConfigError, ServerConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/bridge/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("bridge/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("bridge.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<ServerConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

fn string_array(table: &toml::Table, key: &str) -> Option<Vec<String>> {
    table
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
}

/// Parse config from TOML string.
fn parse_toml(contents: &str, path: &Path) -> Result<ServerConfig, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let connection = if let Some(t) = table.get("connection").and_then(|v| v.as_table()) {
        let mut c = ConnectionConfig::default();
        if let Some(v) = t.get("deviceID").and_then(|v| v.as_str()) {
            c.device_id = v.to_string();
        }
        if let Some(v) = t.get("amqpURL").and_then(|v| v.as_str()) {
            c.amqp_url = v.to_string();
        }
        if let Some(v) = t.get("mysqlDSN").and_then(|v| v.as_str()) {
            c.mysql_dsn = v.to_string();
        }
        if let Some(v) = t.get("mode").and_then(|v| v.as_str()) {
            c.mode = v.to_string();
        }
        c
    } else {
        ConnectionConfig::default()
    };

    let pool = if let Some(t) = table.get("pool").and_then(|v| v.as_table()) {
        let mut c = PoolConfig::default();
        if let Some(v) = t.get("maxIdle").and_then(|v| v.as_integer()) {
            c.max_idle = v as u32;
        }
        if let Some(v) = t.get("maxOpen").and_then(|v| v.as_integer()) {
            c.max_open = v as u32;
        }
        if let Some(v) = t.get("maxLifetime").and_then(|v| v.as_integer()) {
            c.max_lifetime = v as u64;
        }
        c
    } else {
        PoolConfig::default()
    };

    let workers = if let Some(t) = table.get("workers").and_then(|v| v.as_table()) {
        let mut c = WorkersConfig::default();
        if let Some(v) = t.get("workerCount").and_then(|v| v.as_integer()) {
            c.worker_count = v as usize;
        }
        if let Some(v) = t.get("queueSize").and_then(|v| v.as_integer()) {
            c.queue_size = v as usize;
        }
        if let Some(v) = t.get("taskTimeout").and_then(|v| v.as_integer()) {
            c.task_timeout = v as u64;
        }
        c
    } else {
        WorkersConfig::default()
    };

    let rate_limit = if let Some(t) = table.get("rateLimit").and_then(|v| v.as_table()) {
        let mut c = RateLimitConfig::default();
        if let Some(v) = t.get("requestsPerSecond").and_then(|v| v.as_float()) {
            c.requests_per_second = v;
        }
        if let Some(v) = t.get("burstSize").and_then(|v| v.as_integer()) {
            c.burst_size = v as u32;
        }
        if let Some(v) = t.get("cleanupInterval").and_then(|v| v.as_integer()) {
            c.cleanup_interval = v as u64;
        }
        c
    } else {
        RateLimitConfig::default()
    };

    let cache = if let Some(t) = table.get("cache").and_then(|v| v.as_table()) {
        let mut c = CacheConfig::default();
        if let Some(v) = t.get("enabled").and_then(|v| v.as_bool()) {
            c.enabled = v;
        }
        if let Some(v) = t.get("maxSize").and_then(|v| v.as_integer()) {
            c.max_size = v as usize;
        }
        if let Some(v) = t.get("ttl").and_then(|v| v.as_integer()) {
            c.ttl = v as u64;
        }
        if let Some(v) = t.get("cleanupInterval").and_then(|v| v.as_integer()) {
            c.cleanup_interval = v as u64;
        }
        c
    } else {
        CacheConfig::default()
    };

    let validator = if let Some(t) = table.get("validator").and_then(|v| v.as_table()) {
        let mut c = ValidatorConfig::default();
        if let Some(v) = t.get("enabled").and_then(|v| v.as_bool()) {
            c.enabled = v;
        }
        if let Some(v) = t.get("strictMode").and_then(|v| v.as_bool()) {
            c.strict_mode = v;
        }
        if let Some(v) = t.get("allowDDL").and_then(|v| v.as_bool()) {
            c.allow_ddl = v;
        }
        if let Some(v) = t.get("allowDML").and_then(|v| v.as_bool()) {
            c.allow_dml = v;
        }
        if let Some(v) = t.get("allowStoredProcs").and_then(|v| v.as_bool()) {
            c.allow_stored_procs = v;
        }
        if let Some(v) = string_array(t, "allowedCommands") {
            c.allowed_commands = v;
        }
        if let Some(v) = string_array(t, "blockedCommands") {
            c.blocked_commands = v;
        }
        if let Some(v) = t.get("maxQueryLength").and_then(|v| v.as_integer()) {
            c.max_query_length = v as usize;
        }
        if let Some(v) = t.get("logViolations").and_then(|v| v.as_bool()) {
            c.log_violations = v;
        }
        c
    } else {
        ValidatorConfig::default()
    };

    let heartbeat = if let Some(t) = table.get("heartbeat").and_then(|v| v.as_table()) {
        let mut c = HeartbeatConfig::default();
        if let Some(v) = t.get("enabled").and_then(|v| v.as_bool()) {
            c.enabled = v;
        }
        if let Some(v) = t.get("interval").and_then(|v| v.as_integer()) {
            c.interval = v as u64;
        }
        if let Some(v) = t.get("timeout").and_then(|v| v.as_integer()) {
            c.timeout = v as u64;
        }
        if let Some(v) = t.get("maxMissed").and_then(|v| v.as_integer()) {
            c.max_missed = v as u32;
        }
        if let Some(v) = t.get("cleanupInterval").and_then(|v| v.as_integer()) {
            c.cleanup_interval = v as u64;
        }
        if let Some(v) = t.get("maxClientAge").and_then(|v| v.as_integer()) {
            c.max_client_age = v as u64;
        }
        c
    } else {
        HeartbeatConfig::default()
    };

    Ok(ServerConfig {
        connection,
        pool,
        workers,
        rate_limit,
        cache,
        validator,
        heartbeat,
    })
}

/// Merge two configs, with `overlay` taking precedence section-by-section.
/// A section is replaced wholesale if it differs from compiled defaults;
/// this keeps the merge simple while still letting later files override
/// only the sections they mention.
pub fn merge_configs(base: ServerConfig, overlay: ServerConfig) -> ServerConfig {
    fn pick<T: PartialEq + Default + Clone>(base: T, overlay: T) -> T {
        if overlay != T::default() {
            overlay
        } else {
            base
        }
    }

    ServerConfig {
        connection: if overlay.connection.device_id != ConnectionConfig::default().device_id
            || overlay.connection.mysql_dsn != ConnectionConfig::default().mysql_dsn
            || overlay.connection.amqp_url != ConnectionConfig::default().amqp_url
            || overlay.connection.mode != ConnectionConfig::default().mode
        {
            overlay.connection
        } else {
            base.connection
        },
        pool: pick(base.pool, overlay.pool),
        workers: pick(base.workers, overlay.workers),
        rate_limit: pick(base.rate_limit, overlay.rate_limit),
        cache: pick(base.cache, overlay.cache),
        validator: if overlay.validator.allowed_commands.is_empty()
            && overlay.validator.blocked_commands.is_empty()
            && overlay.validator == ValidatorConfig::default()
        {
            base.validator
        } else {
            overlay.validator
        },
        heartbeat: pick(base.heartbeat, overlay.heartbeat),
    }
}

/// Apply environment variable overrides to config. All prefixed `BRIDGE_`.
pub fn apply_env_overrides(config: &mut ServerConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("BRIDGE_DEVICE_ID") {
        config.connection.device_id = v;
        sources.env_overrides.push("BRIDGE_DEVICE_ID".to_string());
    }
    if let Ok(v) = env::var("BRIDGE_AMQP_URL") {
        config.connection.amqp_url = v;
        sources.env_overrides.push("BRIDGE_AMQP_URL".to_string());
    }
    if let Ok(v) = env::var("BRIDGE_MYSQL_DSN") {
        config.connection.mysql_dsn = v;
        sources.env_overrides.push("BRIDGE_MYSQL_DSN".to_string());
    }
    if let Ok(v) = env::var("BRIDGE_MODE") {
        config.connection.mode = v;
        sources.env_overrides.push("BRIDGE_MODE".to_string());
    }

    if let Ok(v) = env::var("BRIDGE_MAX_OPEN") {
        if let Ok(n) = v.parse() {
            config.pool.max_open = n;
            sources.env_overrides.push("BRIDGE_MAX_OPEN".to_string());
        }
    }
    if let Ok(v) = env::var("BRIDGE_WORKER_COUNT") {
        if let Ok(n) = v.parse() {
            config.workers.worker_count = n;
            sources.env_overrides.push("BRIDGE_WORKER_COUNT".to_string());
        }
    }
    if let Ok(v) = env::var("BRIDGE_REQUESTS_PER_SECOND") {
        if let Ok(n) = v.parse() {
            config.rate_limit.requests_per_second = n;
            sources
                .env_overrides
                .push("BRIDGE_REQUESTS_PER_SECOND".to_string());
        }
    }
    if let Ok(v) = env::var("BRIDGE_CACHE_ENABLED") {
        if let Ok(n) = v.parse() {
            config.cache.enabled = n;
            sources.env_overrides.push("BRIDGE_CACHE_ENABLED".to_string());
        }
    }
    if let Ok(v) = env::var("BRIDGE_VALIDATOR_STRICT_MODE") {
        if let Ok(n) = v.parse() {
            config.validator.strict_mode = n;
            sources
                .env_overrides
                .push("BRIDGE_VALIDATOR_STRICT_MODE".to_string());
        }
    }
    if let Ok(v) = env::var("RUST_LOG") {
        sources.env_overrides.push("RUST_LOG".to_string());
        let _ = v; // consumed by tracing_subscriber's EnvFilter directly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_toml() {
        let toml = r#"
[connection]
deviceID = "device-1"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.connection.device_id, "device-1");
        assert_eq!(config.pool.max_open, 10);
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[connection]
deviceID = "device-1"
amqpURL = "amqp://broker:5672/%2f"
mysqlDSN = "user:pass@tcp(127.0.0.1:3306)/app"
mode = "close"

[pool]
maxOpen = 25
maxIdle = 5

[workers]
workerCount = 16
queueSize = 512

[rateLimit]
requestsPerSecond = 50.0
burstSize = 100

[cache]
enabled = false
maxSize = 500

[validator]
allowDDL = true
blockedCommands = ["DROP", "TRUNCATE"]

[heartbeat]
maxMissed = 5
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.connection.device_id, "device-1");
        assert_eq!(config.connection.mode, "close");
        assert_eq!(config.pool.max_open, 25);
        assert_eq!(config.workers.worker_count, 16);
        assert_eq!(config.rate_limit.burst_size, 100);
        assert!(!config.cache.enabled);
        assert!(config.validator.allow_ddl);
        assert_eq!(config.validator.blocked_commands, vec!["DROP", "TRUNCATE"]);
        assert_eq!(config.heartbeat.max_missed, 5);
    }

    #[test]
    fn discover_config_files_does_not_panic() {
        let _files = discover_config_files();
    }
}
