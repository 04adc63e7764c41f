//! Client-side heartbeat manager.
//!
//! Mirrors a health tracker's periodic ticker, but coupled to call activity
//! rather than running unconditionally: the first RPC call activates the
//! heartbeat, and it deactivates again after a quiescent window with no
//! activity, so an idle client doesn't keep pinging the broker forever.

use crate::rpc::RpcClient;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Tracks liveness of one device's connection via periodic pings, counting
/// consecutive misses the way a Lazy-Pirate-style heartbeat would.
pub struct HeartbeatManager {
    last_activity: Arc<RwLock<Option<Instant>>>,
    active: Arc<AtomicBool>,
    missed: Arc<AtomicU32>,
    total_pings: Arc<AtomicU32>,
}

impl HeartbeatManager {
    /// Spawns the background ping loop and returns immediately. The loop is
    /// a no-op (no pings sent) until `notify_activity` is called at least
    /// once.
    pub fn start(
        rpc: Arc<RpcClient>,
        interval: Duration,
        quiescent_window: Duration,
        max_missed: u32,
    ) -> Self {
        let last_activity = Arc::new(RwLock::new(None));
        let active = Arc::new(AtomicBool::new(false));
        let missed = Arc::new(AtomicU32::new(0));
        let total_pings = Arc::new(AtomicU32::new(0));

        let task_last_activity = last_activity.clone();
        let task_active = active.clone();
        let task_missed = missed.clone();
        let task_total = total_pings.clone();
        tokio::spawn(async move {
            ping_loop(
                rpc,
                task_last_activity,
                task_active,
                task_missed,
                task_total,
                interval,
                quiescent_window,
                max_missed,
            )
            .await;
        });

        Self { last_activity, active, missed, total_pings }
    }

    /// Records RPC activity, activating the heartbeat if it was idle.
    pub fn notify_activity(&self) {
        *self.last_activity.write().unwrap() = Some(Instant::now());
        self.active.store(true, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn missed_count(&self) -> u32 {
        self.missed.load(Ordering::Relaxed)
    }

    pub fn total_pings(&self) -> u32 {
        self.total_pings.load(Ordering::Relaxed)
    }
}

async fn ping_loop(
    rpc: Arc<RpcClient>,
    last_activity: Arc<RwLock<Option<Instant>>>,
    active: Arc<AtomicBool>,
    missed: Arc<AtomicU32>,
    total_pings: Arc<AtomicU32>,
    interval: Duration,
    quiescent_window: Duration,
    max_missed: u32,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;

        let last = *last_activity.read().unwrap();
        let Some(last) = last else { continue };

        if last.elapsed() > quiescent_window {
            active.store(false, Ordering::Relaxed);
            continue;
        }

        total_pings.fetch_add(1, Ordering::Relaxed);
        match rpc.ping().await {
            Ok(_) => {
                missed.store(0, Ordering::Relaxed);
                active.store(true, Ordering::Relaxed);
            }
            Err(e) => {
                let count = missed.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(error = %e, missed = count, "heartbeat ping failed");
                if count >= max_missed {
                    active.store(false, Ordering::Relaxed);
                    tracing::error!(
                        missed = count,
                        "max missed beats reached, forcing reconnect"
                    );
                    rpc.manager().force_disconnect().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionManager;
    use bridge_config::ClientDsn;

    fn rpc_without_broker() -> Arc<RpcClient> {
        let dsn = ClientDsn::parse(
            "deviceID=dev-1&amqp_uri=amqp://127.0.0.1:59999/%2f&reconnect_enabled=false&timeout=50ms",
        )
        .unwrap();
        Arc::new(RpcClient::new(Arc::new(ConnectionManager::start(dsn))))
    }

    #[tokio::test]
    async fn inactive_before_first_activity() {
        let heartbeat = HeartbeatManager::start(rpc_without_broker(), Duration::from_millis(20), Duration::from_secs(60), 3);
        assert!(!heartbeat.is_active());
    }

    #[tokio::test]
    async fn notify_activity_activates_heartbeat() {
        let heartbeat = HeartbeatManager::start(rpc_without_broker(), Duration::from_millis(20), Duration::from_secs(60), 3);
        heartbeat.notify_activity();
        assert!(heartbeat.is_active());
    }

    #[tokio::test]
    async fn failed_pings_deactivate_after_max_missed() {
        let heartbeat = HeartbeatManager::start(rpc_without_broker(), Duration::from_millis(10), Duration::from_secs(60), 2);
        heartbeat.notify_activity();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!heartbeat.is_active());
        assert!(heartbeat.missed_count() >= 2);
    }
}
