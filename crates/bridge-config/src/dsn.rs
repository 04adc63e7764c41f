//! Client-side DSN parsing.
//!
//! The DSN is a query-string (a leading `?` is tolerated and stripped):
//! `deviceID=dev-1&amqp_uri=amqp://broker:5672/%2f&timeout=5s&debug=false`.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DsnError {
    #[error("malformed DSN: {0}")]
    Malformed(String),
}

/// Exponential backoff schedule for the client's reconnection loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// 0 means unbounded.
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub backoff_multiplier: f64,
    /// After this much time connected, the attempt counter resets.
    pub reset_interval: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 0,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            reset_interval: Duration::from_secs(60),
        }
    }
}

/// Parsed client DSN.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientDsn {
    pub device_id: String,
    pub amqp_uri: String,
    pub timeout: Duration,
    pub debug: bool,
    pub reconnect: ReconnectConfig,
}

impl ClientDsn {
    pub fn parse(raw: &str) -> Result<Self, DsnError> {
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        if raw.trim().is_empty() {
            return Err(DsnError::Malformed("empty DSN".to_string()));
        }

        let mut device_id = None;
        let mut amqp_uri = None;
        let mut timeout = Duration::from_secs(5);
        let mut debug = false;
        let mut reconnect = ReconnectConfig::default();

        for pair in raw.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                DsnError::Malformed(format!("expected key=value, got {pair:?}"))
            })?;
            let value = percent_decode(value);

            match key {
                "deviceID" => device_id = Some(value),
                "amqp_uri" => amqp_uri = Some(value),
                "timeout" => {
                    timeout = parse_duration(&value)
                        .ok_or_else(|| DsnError::Malformed(format!("bad timeout {value:?}")))?
                }
                "debug" => {
                    debug = value
                        .parse()
                        .map_err(|_| DsnError::Malformed(format!("bad debug {value:?}")))?
                }
                "reconnect_enabled" => {
                    reconnect.enabled = value
                        .parse()
                        .map_err(|_| DsnError::Malformed(format!("bad reconnect_enabled {value:?}")))?
                }
                "reconnect_max_attempts" => {
                    reconnect.max_attempts = value.parse().map_err(|_| {
                        DsnError::Malformed(format!("bad reconnect_max_attempts {value:?}"))
                    })?
                }
                "reconnect_initial_interval" => {
                    reconnect.initial_interval = parse_duration(&value).ok_or_else(|| {
                        DsnError::Malformed(format!("bad reconnect_initial_interval {value:?}"))
                    })?
                }
                "reconnect_max_interval" => {
                    reconnect.max_interval = parse_duration(&value).ok_or_else(|| {
                        DsnError::Malformed(format!("bad reconnect_max_interval {value:?}"))
                    })?
                }
                "reconnect_backoff_multiplier" => {
                    reconnect.backoff_multiplier = value.parse().map_err(|_| {
                        DsnError::Malformed(format!("bad reconnect_backoff_multiplier {value:?}"))
                    })?
                }
                "reconnect_reset_interval" => {
                    reconnect.reset_interval = parse_duration(&value).ok_or_else(|| {
                        DsnError::Malformed(format!("bad reconnect_reset_interval {value:?}"))
                    })?
                }
                _ => {} // forward-compatible: ignore unknown keys
            }
        }

        let device_id = device_id.ok_or_else(|| DsnError::Malformed("missing deviceID".to_string()))?;
        let amqp_uri = amqp_uri.ok_or_else(|| DsnError::Malformed("missing amqp_uri".to_string()))?;
        if !amqp_uri.starts_with("amqp://") {
            return Err(DsnError::Malformed(format!("amqp_uri must start with amqp://, got {amqp_uri:?}")));
        }

        Ok(Self {
            device_id,
            amqp_uri,
            timeout,
            debug,
            reconnect,
        })
    }

    /// Request queue name for this device.
    pub fn request_queue(&self) -> String {
        self.device_id.clone()
    }

    /// Heartbeat queue name for this device.
    pub fn heartbeat_queue(&self) -> String {
        format!("device_{}_heartbeat", self.device_id)
    }
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parses durations like `5s`, `500ms`, `2m`; a bare integer is seconds.
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(n) = s.strip_suffix("ms") {
        return n.parse().ok().map(Duration::from_millis);
    }
    if let Some(n) = s.strip_suffix('s') {
        return n.parse::<f64>().ok().map(Duration::from_secs_f64);
    }
    if let Some(n) = s.strip_suffix('m') {
        return n.parse::<f64>().ok().map(|m| Duration::from_secs_f64(m * 60.0));
    }
    s.parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_dsn() {
        let dsn = ClientDsn::parse("deviceID=dev-1&amqp_uri=amqp://127.0.0.1:5672/%2f").unwrap();
        assert_eq!(dsn.device_id, "dev-1");
        assert_eq!(dsn.amqp_uri, "amqp://127.0.0.1:5672/%2f");
        assert_eq!(dsn.timeout, Duration::from_secs(5));
        assert!(!dsn.debug);
    }

    #[test]
    fn tolerates_leading_question_mark() {
        let dsn = ClientDsn::parse("?deviceID=dev-1&amqp_uri=amqp://127.0.0.1").unwrap();
        assert_eq!(dsn.device_id, "dev-1");
    }

    #[test]
    fn parses_reconnect_block() {
        let dsn = ClientDsn::parse(
            "deviceID=dev-1&amqp_uri=amqp://127.0.0.1&reconnect_max_attempts=5&reconnect_initial_interval=200ms&reconnect_backoff_multiplier=1.5",
        )
        .unwrap();
        assert_eq!(dsn.reconnect.max_attempts, 5);
        assert_eq!(dsn.reconnect.initial_interval, Duration::from_millis(200));
        assert_eq!(dsn.reconnect.backoff_multiplier, 1.5);
    }

    #[test]
    fn non_amqp_uri_is_malformed() {
        let err = ClientDsn::parse("deviceID=dev-1&amqp_uri=http://127.0.0.1").unwrap_err();
        assert!(matches!(err, DsnError::Malformed(_)));
    }

    #[test]
    fn missing_device_id_is_malformed() {
        let err = ClientDsn::parse("amqp_uri=amqp://127.0.0.1").unwrap_err();
        assert!(matches!(err, DsnError::Malformed(_)));
    }

    #[test]
    fn missing_equals_is_malformed() {
        let err = ClientDsn::parse("deviceID=dev-1&garbage").unwrap_err();
        assert!(matches!(err, DsnError::Malformed(_)));
    }

    #[test]
    fn queue_names_derive_from_device_id() {
        let dsn = ClientDsn::parse("deviceID=dev-1&amqp_uri=amqp://x").unwrap();
        assert_eq!(dsn.request_queue(), "dev-1");
        assert_eq!(dsn.heartbeat_queue(), "device_dev-1_heartbeat");
    }
}
