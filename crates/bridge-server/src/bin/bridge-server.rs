//! bridge-server - broker-mediated RPC bridge server.
//!
//! Configuration is loaded from (in order, later wins):
//! 1. Compiled defaults
//! 2. /etc/bridge/config.toml
//! 3. ~/.config/bridge/config.toml
//! 4. ./bridge.toml
//! 5. Environment variables (BRIDGE_*)

use anyhow::{Context, Result};
use bridge_config::ServerConfig;
use bridge_server::function::FunctionRegistry;
use bridge_server::sql_executor::{PoolMode, SqlExecutor};
use bridge_server::{cache::QueryCache, dispatcher::Dispatcher, heartbeat::HeartbeatTracker, rate_limiter::RateLimiter, transaction::TransactionRegistry, validator::SqlValidator, worker_pool::WorkerPool};
use bridge_transport::RequestDelivery;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let (config, sources) = ServerConfig::load_with_sources().context("failed to load configuration")?;
    tracing::info!(files = ?sources.files, "configuration loaded");

    if config.connection.device_id.is_empty() {
        anyhow::bail!("connection.deviceID must be set");
    }

    let conn = bridge_transport::connect(&config.connection.amqp_url)
        .await
        .context("failed to connect to broker")?;
    let channel = bridge_transport::open_channel(&conn).await?;

    let request_queue = config.connection.device_id.clone();
    let heartbeat_queue = format!("device_{}_heartbeat", config.connection.device_id);
    bridge_transport::declare_durable_queue(&channel, &request_queue).await?;
    bridge_transport::declare_durable_queue(&channel, &heartbeat_queue).await?;

    let mode = PoolMode::parse(&config.connection.mode);
    let sql_executor = SqlExecutor::connect(
        &config.connection.mysql_dsn,
        mode,
        config.pool.max_idle,
        config.pool.max_open,
        Duration::from_secs(config.pool.max_lifetime),
    )
    .await
    .context("failed to connect to MySQL")?;

    let lazy_pool = sqlx::mysql::MySqlPoolOptions::new()
        .max_connections(config.pool.max_open)
        .connect_lazy(&config.connection.mysql_dsn)
        .context("failed to construct transaction pool")?;
    let transactions = Arc::new(TransactionRegistry::new(lazy_pool, Duration::from_secs(60)));
    transactions.spawn_sweeper(Duration::from_secs(60));

    let rate_limiter = RateLimiter::new(config.rate_limit.requests_per_second, config.rate_limit.burst_size);
    let cache = QueryCache::new(config.cache.max_size, Duration::from_secs(config.cache.ttl));
    let validator = SqlValidator::new(config.validator.clone());
    let heartbeat = Arc::new(HeartbeatTracker::new(Duration::from_secs(config.heartbeat.max_client_age)));
    heartbeat.spawn_sweeper(Duration::from_secs(config.heartbeat.cleanup_interval));
    let worker_pool = WorkerPool::spawn(
        config.workers.worker_count,
        config.workers.queue_size,
        Duration::from_secs(config.workers.task_timeout),
    );
    // No server-side functions ship by default; operators extend this
    // registry by depending on this crate as a library instead of running
    // the binary directly.
    let registry = FunctionRegistry::builder().build();

    let dispatcher = Arc::new(Dispatcher {
        rate_limiter,
        validator,
        cache,
        cache_enabled: config.cache.enabled,
        registry,
        sql_executor,
        transactions,
        heartbeat,
        worker_pool,
    });

    let mut request_consumer = bridge_transport::consume(&channel, &request_queue, "bridge-server-requests").await?;
    let mut heartbeat_consumer = bridge_transport::consume(&channel, &heartbeat_queue, "bridge-server-heartbeat").await?;
    let reply_channel = bridge_transport::open_channel(&conn).await?;

    tracing::info!(request_queue, heartbeat_queue, "bridge-server ready");

    loop {
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }

            delivery = bridge_transport::next_request(&mut request_consumer) => {
                match delivery {
                    Some(Ok(req)) => spawn_handler(dispatcher.clone(), reply_channel.clone(), req),
                    Some(Err(e)) => tracing::warn!(error = %e, "malformed request delivery"),
                    None => { tracing::warn!("request consumer cancelled"); break; }
                }
            }

            delivery = bridge_transport::next_request(&mut heartbeat_consumer) => {
                match delivery {
                    Some(Ok(req)) => spawn_handler(dispatcher.clone(), reply_channel.clone(), req),
                    Some(Err(e)) => tracing::warn!(error = %e, "malformed heartbeat delivery"),
                    None => { tracing::warn!("heartbeat consumer cancelled"); break; }
                }
            }
        }
    }

    Ok(())
}

fn spawn_handler(dispatcher: Arc<Dispatcher>, reply_channel: lapin::Channel, req: RequestDelivery) {
    tokio::spawn(async move {
        let correlation_id = req.correlation_id.clone();
        let reply_to = req.reply_to.clone();
        let envelope = req.envelope.clone();

        if let Err(e) = req.ack().await {
            tracing::warn!(error = %e, "failed to ack request delivery");
        }

        let response = dispatcher.dispatch(envelope).await;

        if let Err(e) = bridge_transport::publish_response(&reply_channel, &reply_to, &correlation_id, &response).await {
            tracing::error!(error = %e, correlation_id, "failed to publish response");
        }
    });
}
