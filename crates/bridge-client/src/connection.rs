//! DSN-driven connection manager with exponential-backoff reconnection.
//!
//! State machine: `Disconnected -> Dial -> Connected -> (broker closes) ->
//! Disconnected -> backoff wait -> Dial -> ...`. Grounded on the reactor
//! task and `HealthTracker` of a ZMQ DEALER client that owns its socket in a
//! dedicated background task and exposes connection health as an atomic
//! state, adapted here for AMQP (where, unlike ZMQ, losing the broker
//! connection really does mean no transport until we redial) and for the
//! backoff schedule of a Lazy Pirate config.

use bridge_config::{ClientDsn, ReconnectConfig};
use lapin::{Channel, Connection};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};

/// Connection state as observed by callers; not the raw AMQP wire state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connected = 1,
    /// `reconnect.maxAttempts` was exhausted; the manager has given up.
    Dead = 2,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connected,
            2 => ConnectionState::Dead,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Exponential backoff, capped, matching a Lazy-Pirate-style schedule:
/// attempt 1 = `initial_interval`, attempt n = `initial_interval *
/// multiplier^(n-1)`, capped at `max_interval`.
fn backoff_for_attempt(cfg: &ReconnectConfig, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let scale = cfg.backoff_multiplier.powi((attempt - 1) as i32);
    let millis = cfg.initial_interval.as_secs_f64() * scale * 1000.0;
    let capped = millis.min(cfg.max_interval.as_secs_f64() * 1000.0);
    Duration::from_millis(capped.max(0.0) as u64)
}

struct Shared {
    state: AtomicU8,
    slot: Mutex<Option<(Connection, Channel)>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Relaxed);
        let _ = self.state_tx.send(state);
    }

    fn get_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
    }
}

/// Owns the broker connection exclusively and redials on loss, per
/// `reconnect` settings in the DSN.
pub struct ConnectionManager {
    dsn: ClientDsn,
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Spawns the background reconnection loop and returns immediately; the
    /// first dial happens asynchronously, same as a DEALER socket connecting
    /// non-blockingly in the background.
    pub fn start(dsn: ClientDsn) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            slot: Mutex::new(None),
            state_tx,
        });

        let task_shared = shared.clone();
        let task_dsn = dsn.clone();
        tokio::spawn(async move {
            reconnect_loop(task_dsn, task_shared).await;
        });

        Self { dsn, shared }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.get_state()
    }

    /// Subscribes to connection state transitions. Each transition reaches
    /// subscribers exactly once, since the manager only calls `set_state`
    /// at the actual transition points.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn device_id(&self) -> &str {
        &self.dsn.device_id
    }

    pub fn dsn(&self) -> &ClientDsn {
        &self.dsn
    }

    /// Returns the current channel, or `ConnectionLost` while disconnected.
    pub async fn channel(&self) -> Result<Channel, bridge_proto::BridgeError> {
        let slot = self.shared.slot.lock().await;
        match slot.as_ref() {
            Some((_, channel)) => Ok(channel.clone()),
            None => Err(bridge_proto::BridgeError::ConnectionLost),
        }
    }

    /// Forces the current connection closed and drops to `Disconnected`,
    /// letting `reconnect_loop` redial on its normal backoff schedule.
    /// Used by the heartbeat manager when too many consecutive pings are
    /// missed: a dead connection the broker hasn't noticed yet still needs
    /// to be torn down client-side.
    pub async fn force_disconnect(&self) {
        let mut slot = self.shared.slot.lock().await;
        if let Some((conn, _channel)) = slot.take() {
            let _ = conn.close(200, "heartbeat: max missed beats exceeded").await;
        }
        drop(slot);
        self.shared.set_state(ConnectionState::Disconnected);
    }
}

async fn reconnect_loop(dsn: ClientDsn, shared: Arc<Shared>) {
    let mut attempt: u32 = 0;

    loop {
        match dial(&dsn).await {
            Ok((conn, channel)) => {
                *shared.slot.lock().await = Some((conn.clone(), channel));
                shared.set_state(ConnectionState::Connected);
                tracing::info!(device_id = %dsn.device_id, "broker connection established");

                let connected_at = Instant::now();
                wait_for_close(&conn).await;
                let connected_duration = connected_at.elapsed();

                *shared.slot.lock().await = None;
                shared.set_state(ConnectionState::Disconnected);
                tracing::warn!(device_id = %dsn.device_id, "broker connection lost");

                // Only treat this as a fresh start if the connection held
                // long enough to count as recovered; a connection that
                // drops before `reset_interval` elapses continues the
                // backoff sequence instead of restarting at the initial
                // interval.
                if connected_duration >= dsn.reconnect.reset_interval {
                    attempt = 0;
                }
            }
            Err(e) => {
                tracing::warn!(device_id = %dsn.device_id, error = %e, "failed to dial broker");
            }
        }

        if !dsn.reconnect.enabled {
            break;
        }

        attempt += 1;
        if dsn.reconnect.max_attempts != 0 && attempt > dsn.reconnect.max_attempts {
            shared.set_state(ConnectionState::Dead);
            tracing::error!(device_id = %dsn.device_id, "reconnect attempts exhausted, giving up");
            break;
        }

        tokio::time::sleep(backoff_for_attempt(&dsn.reconnect, attempt)).await;
    }
}

async fn dial(dsn: &ClientDsn) -> Result<(Connection, Channel), bridge_transport::TransportError> {
    let conn = bridge_transport::connect(&dsn.amqp_uri).await?;
    let channel = bridge_transport::open_channel(&conn).await?;
    Ok((conn, channel))
}

/// Polls connection status until the broker closes it. `lapin` surfaces
/// connection loss through `ConnectionStatus`, not a future we can await
/// directly, so this is a coarse poll rather than an event callback.
async fn wait_for_close(conn: &Connection) {
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        ticker.tick().await;
        if !conn.status().connected() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn reconnect_cfg(initial_ms: u64, max_ms: u64, multiplier: f64) -> ReconnectConfig {
        ReconnectConfig {
            enabled: true,
            max_attempts: 0,
            initial_interval: Duration::from_millis(initial_ms),
            max_interval: Duration::from_millis(max_ms),
            backoff_multiplier: multiplier,
            reset_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn backoff_grows_exponentially_then_caps() {
        let cfg = reconnect_cfg(100, 2000, 2.0);
        assert_eq!(backoff_for_attempt(&cfg, 0), Duration::ZERO);
        assert_eq!(backoff_for_attempt(&cfg, 1), Duration::from_millis(100));
        assert_eq!(backoff_for_attempt(&cfg, 2), Duration::from_millis(200));
        assert_eq!(backoff_for_attempt(&cfg, 3), Duration::from_millis(400));
        assert_eq!(backoff_for_attempt(&cfg, 10), Duration::from_millis(2000));
    }

    #[test]
    fn connection_state_round_trips_through_u8() {
        assert_eq!(ConnectionState::from_u8(0), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::from_u8(1), ConnectionState::Connected);
        assert_eq!(ConnectionState::from_u8(2), ConnectionState::Dead);
    }

    #[tokio::test]
    async fn manager_starts_disconnected_before_first_dial_completes() {
        let dsn = ClientDsn::parse("deviceID=dev-1&amqp_uri=amqp://127.0.0.1:59999/%2f&reconnect_enabled=false").unwrap();
        let manager = ConnectionManager::start(dsn);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.channel().await.is_err());
    }
}
