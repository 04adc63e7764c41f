//! Server-side heartbeat responder: tracks per-device liveness and answers
//! `heartbeat_ping` requests with a pong that echoes the correlation id.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One device's liveness record. `origin_key` is the `clientIP` the last
/// ping carried, kept around for diagnostics.
pub struct ClientLivenessRecord {
    pub device_id: String,
    pub origin_key: String,
    pub last_ping_at: Instant,
    pub ping_count: u64,
    pub active: bool,
}

/// `deviceID -> ClientLivenessRecord`. A ping both creates and refreshes the
/// record; a sweeper retires records idle past `max_client_age`.
pub struct HeartbeatTracker {
    records: Arc<DashMap<String, ClientLivenessRecord>>,
    max_client_age: Duration,
    total_pings: AtomicU64,
}

impl HeartbeatTracker {
    pub fn new(max_client_age: Duration) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            max_client_age,
            total_pings: AtomicU64::new(0),
        }
    }

    /// Records a ping from `device_id`/`origin_key`, marking the device
    /// active and bumping its ping count.
    pub fn record_ping(&self, device_id: &str, origin_key: &str) {
        self.total_pings.fetch_add(1, Ordering::Relaxed);
        self.records
            .entry(device_id.to_string())
            .and_modify(|r| {
                r.last_ping_at = Instant::now();
                r.ping_count += 1;
                r.active = true;
                r.origin_key = origin_key.to_string();
            })
            .or_insert_with(|| ClientLivenessRecord {
                device_id: device_id.to_string(),
                origin_key: origin_key.to_string(),
                last_ping_at: Instant::now(),
                ping_count: 1,
                active: true,
            });
    }

    pub fn is_active(&self, device_id: &str) -> bool {
        self.records.get(device_id).map(|r| r.active).unwrap_or(false)
    }

    pub fn ping_count(&self, device_id: &str) -> u64 {
        self.records.get(device_id).map(|r| r.ping_count).unwrap_or(0)
    }

    pub fn total_pings(&self) -> u64 {
        self.total_pings.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Spawns a sweeper that marks devices idle past `max_client_age` as
    /// inactive and then drops their record entirely, ticking every
    /// `cleanup_interval`.
    pub fn spawn_sweeper(self: &Arc<Self>, cleanup_interval: Duration) -> tokio::task::JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                ticker.tick().await;
                tracker.sweep_stale();
            }
        })
    }

    fn sweep_stale(&self) {
        let now = Instant::now();
        self.records.retain(|_, r| {
            let idle = now.duration_since(r.last_ping_at);
            if idle > self.max_client_age {
                tracing::info!(device_id = %r.device_id, "retiring stale heartbeat record");
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_ping_creates_an_active_record() {
        let tracker = HeartbeatTracker::new(Duration::from_secs(300));
        tracker.record_ping("dev-1", "10.0.0.1");
        assert!(tracker.is_active("dev-1"));
        assert_eq!(tracker.ping_count("dev-1"), 1);
    }

    #[test]
    fn repeated_pings_accumulate_count() {
        let tracker = HeartbeatTracker::new(Duration::from_secs(300));
        tracker.record_ping("dev-1", "10.0.0.1");
        tracker.record_ping("dev-1", "10.0.0.1");
        tracker.record_ping("dev-1", "10.0.0.2");
        assert_eq!(tracker.ping_count("dev-1"), 3);
        assert_eq!(tracker.total_pings(), 3);
    }

    #[test]
    fn unknown_device_is_not_active() {
        let tracker = HeartbeatTracker::new(Duration::from_secs(300));
        assert!(!tracker.is_active("ghost"));
    }
}
