//! SQL executor: runs a validated query against the MySQL pool (or, in
//! `close` mode, a fresh per-request connection) and normalizes the result
//! set into a `ResponseEnvelope`.

use bridge_proto::{BridgeError, CellValue, ResponseEnvelope};
use sqlx::mysql::{MySqlColumn, MySqlConnection, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Connection, MySql, MySqlPool, Row, TypeInfo};
use std::time::Duration;

const DEFAULT_QUERY_DEADLINE: Duration = Duration::from_secs(10);

/// How the executor acquires a connection per spec.md §4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    /// Long-lived pool shared across requests.
    Open,
    /// Fresh connection per request, released on completion.
    Close,
}

impl PoolMode {
    pub fn parse(mode: &str) -> Self {
        if mode.eq_ignore_ascii_case("close") {
            PoolMode::Close
        } else {
            PoolMode::Open
        }
    }
}

/// Owns the MySQL pool (or the DSN to dial fresh connections from) and the
/// mode that decides which.
pub struct SqlExecutor {
    mode: PoolMode,
    dsn: String,
    pool: Option<MySqlPool>,
}

impl SqlExecutor {
    /// Builds the executor. In `open` mode, creates the long-lived pool
    /// sized by `max_idle`/`max_open`/`max_lifetime` immediately.
    pub async fn connect(
        dsn: &str,
        mode: PoolMode,
        max_idle: u32,
        max_open: u32,
        max_lifetime: Duration,
    ) -> Result<Self, BridgeError> {
        let pool = match mode {
            PoolMode::Open => Some(
                MySqlPoolOptions::new()
                    .max_connections(max_open)
                    .min_connections(max_idle)
                    .max_lifetime(max_lifetime)
                    .connect(dsn)
                    .await
                    .map_err(|e| BridgeError::DbError(e.to_string()))?,
            ),
            PoolMode::Close => None,
        };
        Ok(Self {
            mode,
            dsn: dsn.to_string(),
            pool,
        })
    }

    /// Runs `query` with positional `params` under a 10s default deadline,
    /// and normalizes the result into a response envelope. Errors surface
    /// as `{error: msg}` rather than propagating.
    pub async fn execute(&self, query: &str, params: &[CellValue]) -> ResponseEnvelope {
        match tokio::time::timeout(DEFAULT_QUERY_DEADLINE, self.execute_inner(query, params)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => ResponseEnvelope::err(e.to_string()),
            Err(_) => ResponseEnvelope::err(BridgeError::DbError("query deadline exceeded".to_string()).to_string()),
        }
    }

    async fn execute_inner(&self, query: &str, params: &[CellValue]) -> Result<ResponseEnvelope, BridgeError> {
        let bind = |mut q: sqlx::query::Query<'_, MySql, sqlx::mysql::MySqlArguments>| {
            for param in params {
                q = bind_param(q, param);
            }
            q
        };

        let rows = match self.mode {
            PoolMode::Open => {
                let pool = self.pool.as_ref().expect("open mode always has a pool");
                bind(sqlx::query(query))
                    .fetch_all(pool)
                    .await
                    .map_err(|e| BridgeError::DbError(e.to_string()))?
            }
            PoolMode::Close => {
                let mut conn = MySqlConnection::connect(&self.dsn)
                    .await
                    .map_err(|e| BridgeError::DbError(e.to_string()))?;
                let rows = bind(sqlx::query(query))
                    .fetch_all(&mut conn)
                    .await
                    .map_err(|e| BridgeError::DbError(e.to_string()))?;
                let _ = conn.close().await;
                rows
            }
        };

        Ok(rows_to_envelope(&rows))
    }
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments>,
    value: &'q CellValue,
) -> sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments> {
    match value {
        CellValue::Integer(i) => query.bind(i),
        CellValue::Float(f) => query.bind(f),
        CellValue::Bool(b) => query.bind(b),
        CellValue::String(s) => query.bind(s),
        CellValue::Null => query.bind(Option::<i64>::None),
    }
}

fn rows_to_envelope(rows: &[MySqlRow]) -> ResponseEnvelope {
    let columns: Vec<String> = rows
        .first()
        .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let out_rows = rows
        .iter()
        .map(|row| {
            row.columns()
                .iter()
                .enumerate()
                .map(|(i, col)| cell_from_row(row, i, col))
                .collect()
        })
        .collect();

    ResponseEnvelope::ok(columns, out_rows)
}

/// Normalizes one cell. Integer/textual/temporal column kinds return their
/// textual form to preserve precision across the wire (spec.md §9 "Number
/// precision"); booleans and native floating-point types pass through;
/// everything else is textually stringified.
fn cell_from_row(row: &MySqlRow, index: usize, column: &MySqlColumn) -> CellValue {
    match column.type_info().name() {
        "TINYINT(1)" | "BOOLEAN" | "BOOL" => match row.try_get::<Option<bool>, _>(index) {
            Ok(Some(v)) => CellValue::Bool(v),
            Ok(None) => CellValue::Null,
            Err(_) => fallback_text(row, index),
        },
        "FLOAT" | "DOUBLE" => match row.try_get::<Option<f64>, _>(index) {
            Ok(Some(v)) => CellValue::Float(v),
            Ok(None) => CellValue::Null,
            Err(_) => fallback_text(row, index),
        },
        _ => fallback_text(row, index),
    }
}

/// Textual fallback for integer/string/temporal/decimal columns: sqlx's
/// `String` decode target works for all of these MySQL wire kinds and
/// keeps the invariant that precision never gets lost converting through
/// an intermediate numeric type.
fn fallback_text(row: &MySqlRow, index: usize) -> CellValue {
    match row.try_get::<Option<String>, _>(index) {
        Ok(Some(s)) => CellValue::String(s),
        Ok(None) => CellValue::Null,
        Err(_) => CellValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_mode_parses_close_case_insensitively() {
        assert_eq!(PoolMode::parse("close"), PoolMode::Close);
        assert_eq!(PoolMode::parse("CLOSE"), PoolMode::Close);
        assert_eq!(PoolMode::parse("open"), PoolMode::Open);
        assert_eq!(PoolMode::parse("anything-else"), PoolMode::Open);
    }

    #[test]
    fn empty_result_set_has_no_columns() {
        let resp = rows_to_envelope(&[]);
        assert!(resp.columns.is_empty());
        assert!(resp.rows.is_empty());
    }
}
