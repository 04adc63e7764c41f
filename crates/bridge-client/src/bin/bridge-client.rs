//! bridge-client - example/demo entrypoint for the RPC bridge client.
//!
//! The connection DSN is read from `BRIDGE_CLIENT_DSN`
//! (`deviceID=...&amqp_uri=...&timeout=5s&...`); this binary is a thin demo
//! of the library, not a general-purpose CLI tool.

use anyhow::{Context, Result};
use bridge_client::{ConnectionManager, ConnectionState, HeartbeatManager, ResultCursor, RpcClient};
use bridge_config::ClientDsn;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let raw_dsn = std::env::var("BRIDGE_CLIENT_DSN").context("BRIDGE_CLIENT_DSN must be set")?;
    let dsn = ClientDsn::parse(&raw_dsn).context("failed to parse BRIDGE_CLIENT_DSN")?;

    let manager = Arc::new(ConnectionManager::start(dsn));
    wait_until_connected(&manager).await;

    let rpc = Arc::new(RpcClient::new(manager));
    let heartbeat = HeartbeatManager::start(rpc.clone(), Duration::from_secs(10), Duration::from_secs(120), 3);

    let response = rpc.sql("SELECT 1", vec![]).await.context("sql call failed")?;
    heartbeat.notify_activity();

    let cursor = ResultCursor::new(&response).context("server returned an error response")?;
    tracing::info!(columns = ?cursor.columns(), rows = cursor.row_count(), "query complete");

    Ok(())
}

async fn wait_until_connected(manager: &Arc<ConnectionManager>) {
    let mut states = manager.subscribe();
    if manager.state() == ConnectionState::Connected {
        return;
    }
    while *states.borrow() != ConnectionState::Connected {
        if states.changed().await.is_err() {
            return;
        }
    }
}
