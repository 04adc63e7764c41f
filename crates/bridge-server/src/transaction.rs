//! Transaction registry: best-effort shape for BEGIN/COMMIT/ROLLBACK per
//! spec.md §5 and §9 ("source is partial... implementer should make it
//! explicit"). DESIGN.md records the Open Question resolution: a
//! transaction id maps to one pinned pool connection for its lifetime.

use bridge_proto::BridgeError;
use dashmap::DashMap;
use sqlx::pool::PoolConnection;
use sqlx::{MySql, MySqlPool};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Default idle bound before the sweeper rolls back and reclaims an
/// abandoned transaction (Open Question resolution, see DESIGN.md).
pub const DEFAULT_IDLE_BOUND: Duration = Duration::from_secs(60);

struct PinnedTransaction {
    conn: Mutex<PoolConnection<MySql>>,
    last_used: Mutex<Instant>,
}

/// Keyed by `transactionID`; holds the pinned pool connection a BEGIN
/// acquired until COMMIT/ROLLBACK releases it or the sweeper reclaims it.
pub struct TransactionRegistry {
    pool: MySqlPool,
    idle_bound: Duration,
    transactions: Arc<DashMap<String, PinnedTransaction>>,
}

impl TransactionRegistry {
    pub fn new(pool: MySqlPool, idle_bound: Duration) -> Self {
        Self {
            pool,
            idle_bound,
            transactions: Arc::new(DashMap::new()),
        }
    }

    /// Acquires a dedicated connection from the pool, issues `BEGIN`, and
    /// stores it keyed by `transaction_id`.
    pub async fn begin(&self, transaction_id: &str) -> Result<(), BridgeError> {
        if self.transactions.contains_key(transaction_id) {
            return Err(BridgeError::DbError(format!(
                "transaction {transaction_id} already active"
            )));
        }
        let mut conn = self.pool.acquire().await.map_err(|e| BridgeError::DbError(e.to_string()))?;
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| BridgeError::DbError(e.to_string()))?;
        self.transactions.insert(
            transaction_id.to_string(),
            PinnedTransaction {
                conn: Mutex::new(conn),
                last_used: Mutex::new(Instant::now()),
            },
        );
        Ok(())
    }

    /// True if `transaction_id` has a pinned connection; SQL requests
    /// bearing this id should route to it rather than the shared pool.
    pub fn is_active(&self, transaction_id: &str) -> bool {
        self.transactions.contains_key(transaction_id)
    }

    /// Runs `query` against the pinned connection for `transaction_id`.
    pub async fn execute_on(
        &self,
        transaction_id: &str,
        query: &str,
    ) -> Result<sqlx::mysql::MySqlQueryResult, BridgeError> {
        let entry = self
            .transactions
            .get(transaction_id)
            .ok_or_else(|| BridgeError::DbError(format!("no active transaction {transaction_id}")))?;
        *entry.last_used.lock().await = Instant::now();
        let mut conn = entry.conn.lock().await;
        sqlx::query(query)
            .execute(&mut *conn)
            .await
            .map_err(|e| BridgeError::DbError(e.to_string()))
    }

    /// Issues `COMMIT` or `ROLLBACK` on the pinned connection and releases
    /// it back to the pool.
    pub async fn finish(&self, transaction_id: &str, commit: bool) -> Result<(), BridgeError> {
        let (_, entry) = self
            .transactions
            .remove(transaction_id)
            .ok_or_else(|| BridgeError::DbError(format!("no active transaction {transaction_id}")))?;
        let mut conn = entry.conn.into_inner();
        let statement = if commit { "COMMIT" } else { "ROLLBACK" };
        sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| BridgeError::DbError(e.to_string()))?;
        Ok(())
    }

    /// Spawns a sweeper that rolls back and reclaims transactions idle
    /// beyond `idle_bound`, ticking every `cleanup_interval`.
    pub fn spawn_sweeper(self: &Arc<Self>, cleanup_interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                ticker.tick().await;
                registry.sweep_idle().await;
            }
        })
    }

    async fn sweep_idle(&self) {
        let mut stale = Vec::new();
        for entry in self.transactions.iter() {
            let last_used = *entry.value().last_used.lock().await;
            if last_used.elapsed() > self.idle_bound {
                stale.push(entry.key().clone());
            }
        }
        for id in stale {
            if self.finish(&id, false).await.is_err() {
                tracing::warn!(transaction_id = %id, "failed to roll back idle transaction during sweep");
            } else {
                tracing::info!(transaction_id = %id, "rolled back idle transaction");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_idle_bound_matches_spec_resolution() {
        assert_eq!(DEFAULT_IDLE_BOUND, Duration::from_secs(60));
    }
}
