//! Server configuration sections - things that do not change at runtime
//! once the process has started serving requests.

use serde::{Deserialize, Serialize};

/// Device identity and the two external connections the server owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Default: empty (must be set; the request/heartbeat queue names are
    /// derived from it).
    #[serde(rename = "deviceID", default)]
    pub device_id: String,

    /// Default: amqp://127.0.0.1:5672/%2f
    #[serde(rename = "amqpURL", default = "ConnectionConfig::default_amqp_url")]
    pub amqp_url: String,

    /// Default: empty (must be set).
    #[serde(rename = "mysqlDSN", default)]
    pub mysql_dsn: String,

    /// `open` keeps the pool warm across requests; `close` opens and closes
    /// a connection per SQL request. Default: open.
    #[serde(default = "ConnectionConfig::default_mode")]
    pub mode: String,
}

impl ConnectionConfig {
    fn default_amqp_url() -> String {
        "amqp://127.0.0.1:5672/%2f".to_string()
    }

    fn default_mode() -> String {
        "open".to_string()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            amqp_url: Self::default_amqp_url(),
            mysql_dsn: String::new(),
            mode: Self::default_mode(),
        }
    }
}

/// SQL connection pool tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(rename = "maxIdle", default = "PoolConfig::default_max_idle")]
    pub max_idle: u32,
    #[serde(rename = "maxOpen", default = "PoolConfig::default_max_open")]
    pub max_open: u32,
    /// Seconds. Default: 3600 (1h).
    #[serde(rename = "maxLifetime", default = "PoolConfig::default_max_lifetime")]
    pub max_lifetime: u64,
}

impl PoolConfig {
    fn default_max_idle() -> u32 {
        2
    }

    fn default_max_open() -> u32 {
        10
    }

    fn default_max_lifetime() -> u64 {
        3600
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: Self::default_max_idle(),
            max_open: Self::default_max_open(),
            max_lifetime: Self::default_max_lifetime(),
        }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(rename = "workerCount", default = "WorkersConfig::default_worker_count")]
    pub worker_count: usize,
    #[serde(rename = "queueSize", default = "WorkersConfig::default_queue_size")]
    pub queue_size: usize,
    /// Seconds. Default: 30.
    #[serde(rename = "taskTimeout", default = "WorkersConfig::default_task_timeout")]
    pub task_timeout: u64,
}

impl WorkersConfig {
    fn default_worker_count() -> usize {
        8
    }

    fn default_queue_size() -> usize {
        256
    }

    fn default_task_timeout() -> u64 {
        30
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            worker_count: Self::default_worker_count(),
            queue_size: Self::default_queue_size(),
            task_timeout: Self::default_task_timeout(),
        }
    }
}

/// Token-bucket rate limiter, per request origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(rename = "requestsPerSecond", default = "RateLimitConfig::default_rps")]
    pub requests_per_second: f64,
    #[serde(rename = "burstSize", default = "RateLimitConfig::default_burst")]
    pub burst_size: u32,
    /// Seconds. Default: 60.
    #[serde(rename = "cleanupInterval", default = "RateLimitConfig::default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl RateLimitConfig {
    fn default_rps() -> f64 {
        10.0
    }

    fn default_burst() -> u32 {
        20
    }

    fn default_cleanup_interval() -> u64 {
        60
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: Self::default_rps(),
            burst_size: Self::default_burst(),
            cleanup_interval: Self::default_cleanup_interval(),
        }
    }
}

/// Query result cache.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "CacheConfig::default_enabled")]
    pub enabled: bool,
    #[serde(rename = "maxSize", default = "CacheConfig::default_max_size")]
    pub max_size: usize,
    /// Seconds. Default: 30.
    #[serde(default = "CacheConfig::default_ttl")]
    pub ttl: u64,
    /// Seconds. Default: 60.
    #[serde(rename = "cleanupInterval", default = "CacheConfig::default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl CacheConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_max_size() -> usize {
        1000
    }

    fn default_ttl() -> u64 {
        30
    }

    fn default_cleanup_interval() -> u64 {
        60
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            max_size: Self::default_max_size(),
            ttl: Self::default_ttl(),
            cleanup_interval: Self::default_cleanup_interval(),
        }
    }
}

/// SQL validator policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    #[serde(default = "ValidatorConfig::default_enabled")]
    pub enabled: bool,
    #[serde(rename = "strictMode", default)]
    pub strict_mode: bool,
    #[serde(rename = "allowDDL", default)]
    pub allow_ddl: bool,
    #[serde(rename = "allowDML", default = "ValidatorConfig::default_allow_dml")]
    pub allow_dml: bool,
    #[serde(rename = "allowStoredProcs", default)]
    pub allow_stored_procs: bool,
    #[serde(rename = "allowedCommands", default)]
    pub allowed_commands: Vec<String>,
    #[serde(rename = "blockedCommands", default)]
    pub blocked_commands: Vec<String>,
    #[serde(rename = "maxQueryLength", default = "ValidatorConfig::default_max_query_length")]
    pub max_query_length: usize,
    #[serde(rename = "logViolations", default = "ValidatorConfig::default_log_violations")]
    pub log_violations: bool,
}

impl ValidatorConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_allow_dml() -> bool {
        true
    }

    fn default_max_query_length() -> usize {
        8192
    }

    fn default_log_violations() -> bool {
        true
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            strict_mode: false,
            allow_ddl: false,
            allow_dml: Self::default_allow_dml(),
            allow_stored_procs: false,
            allowed_commands: Vec::new(),
            blocked_commands: Vec::new(),
            max_query_length: Self::default_max_query_length(),
            log_violations: Self::default_log_violations(),
        }
    }
}

/// Server-side heartbeat liveness tracking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "HeartbeatConfig::default_enabled")]
    pub enabled: bool,
    /// Seconds. Default: 15.
    #[serde(default = "HeartbeatConfig::default_interval")]
    pub interval: u64,
    /// Seconds. Default: 5.
    #[serde(default = "HeartbeatConfig::default_timeout")]
    pub timeout: u64,
    #[serde(rename = "maxMissed", default = "HeartbeatConfig::default_max_missed")]
    pub max_missed: u32,
    /// Seconds. Default: 60.
    #[serde(rename = "cleanupInterval", default = "HeartbeatConfig::default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Seconds. Default: 300.
    #[serde(rename = "maxClientAge", default = "HeartbeatConfig::default_max_client_age")]
    pub max_client_age: u64,
}

impl HeartbeatConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_interval() -> u64 {
        15
    }

    fn default_timeout() -> u64 {
        5
    }

    fn default_max_missed() -> u32 {
        3
    }

    fn default_cleanup_interval() -> u64 {
        60
    }

    fn default_max_client_age() -> u64 {
        300
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            interval: Self::default_interval(),
            timeout: Self::default_timeout(),
            max_missed: Self::default_max_missed(),
            cleanup_interval: Self::default_cleanup_interval(),
            max_client_age: Self::default_max_client_age(),
        }
    }
}
