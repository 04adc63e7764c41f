//! Request/response envelopes exchanged between bridge client and server.
//!
//! Envelopes are JSON-encoded records carried as the AMQP message body.
//! `RequestEnvelope` is published by the client to the device's request
//! queue (or its heartbeat queue); `ResponseEnvelope` is published back to
//! the client's `replyTo` queue with the same `correlationId`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::function::FunctionCall;

/// The kind of work a `RequestEnvelope` asks the server to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Sql,
    Function,
    Command,
    Transaction,
    HeartbeatPing,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestType::Sql => "sql",
            RequestType::Function => "function",
            RequestType::Command => "command",
            RequestType::Transaction => "transaction",
            RequestType::HeartbeatPing => "heartbeat_ping",
        };
        f.write_str(s)
    }
}

/// Transaction sub-command carried by `transaction`-type requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionCommand {
    Begin,
    Commit,
    Rollback,
}

/// Request envelope published by the client, addressed to `deviceID`'s
/// request queue (or heartbeat queue, for `heartbeat_ping`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "type")]
    pub request_type: RequestType,
    #[serde(rename = "deviceID")]
    pub device_id: String,
    /// SQL text, JSON-encoded `FunctionCall`, or the command line.
    #[serde(default)]
    pub query: String,
    /// Positional parameters, used only for `sql` requests.
    #[serde(default)]
    pub params: Vec<CellValue>,
    #[serde(rename = "clientIP", default)]
    pub client_ip: String,
    #[serde(rename = "transactionID", default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<TransactionCommand>,
    #[serde(rename = "corrID", default, skip_serializing_if = "Option::is_none")]
    pub corr_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl RequestEnvelope {
    pub fn sql(device_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            request_type: RequestType::Sql,
            device_id: device_id.into(),
            query: query.into(),
            params: Vec::new(),
            client_ip: String::new(),
            transaction_id: None,
            command: None,
            corr_id: None,
            timestamp: None,
        }
    }

    pub fn function(device_id: impl Into<String>, call: &FunctionCall) -> Result<Self, serde_json::Error> {
        Ok(Self {
            request_type: RequestType::Function,
            device_id: device_id.into(),
            query: serde_json::to_string(call)?,
            params: Vec::new(),
            client_ip: String::new(),
            transaction_id: None,
            command: None,
            corr_id: None,
            timestamp: None,
        })
    }

    pub fn command(device_id: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            request_type: RequestType::Command,
            device_id: device_id.into(),
            query: line.into(),
            params: Vec::new(),
            client_ip: String::new(),
            transaction_id: None,
            command: None,
            corr_id: None,
            timestamp: None,
        }
    }

    pub fn heartbeat_ping(device_id: impl Into<String>) -> Self {
        Self {
            request_type: RequestType::HeartbeatPing,
            device_id: device_id.into(),
            query: String::new(),
            params: Vec::new(),
            client_ip: String::new(),
            transaction_id: None,
            command: None,
            corr_id: None,
            timestamp: Some(chrono::Utc::now()),
        }
    }

    pub fn with_params(mut self, params: Vec<CellValue>) -> Self {
        self.params = params;
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = ip.into();
        self
    }

    pub fn with_transaction_id(mut self, id: impl Into<String>) -> Self {
        self.transaction_id = Some(id.into());
        self
    }
}

/// A single cell of a result row, or a bound SQL parameter. Primitive,
/// wire-stable (numbers do not distinguish integer/floating once
/// serialized, per spec.md §9 "Number precision across the wire").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CellValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Null,
}

impl CellValue {
    /// Best-effort textual rendering, used for parameter scanning and for
    /// rendering complex function-result kinds onto the wire.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Integer(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::String(s) => s.clone(),
            CellValue::Null => "null".to_string(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::String(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::String(s)
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Integer(v)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

/// Uniform tabular response, regardless of request kind.
///
/// Invariant: every row's length equals `columns.len()`. Invariant:
/// `error` non-empty XOR (`columns`/`rows` describe a valid table).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<CellValue>>,
    #[serde(default)]
    pub error: String,
}

impl ResponseEnvelope {
    pub fn ok(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            columns,
            rows,
            error: String::new(),
        }
    }

    pub fn single_column(name: &str, values: Vec<CellValue>) -> Self {
        let rows = values.into_iter().map(|v| vec![v]).collect();
        Self::ok(vec![name.to_string()], rows)
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// Checks the row-arity invariant; used by tests and by the validator
    /// of last resort before publishing a response.
    pub fn is_well_formed(&self) -> bool {
        if self.is_error() {
            return true;
        }
        self.rows.iter().all(|row| row.len() == self.columns.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_envelope_roundtrip() {
        let req = RequestEnvelope::sql("dev-1", "SELECT 1").with_client_ip("10.0.0.1");
        let json = serde_json::to_string(&req).unwrap();
        let parsed: RequestEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(req.device_id, parsed.device_id);
        assert_eq!(req.query, parsed.query);
        assert_eq!(parsed.request_type, RequestType::Sql);
    }

    #[test]
    fn response_envelope_row_shape() {
        let resp = ResponseEnvelope::ok(
            vec!["id".into(), "name".into()],
            vec![vec![CellValue::Integer(1), CellValue::String("Alice".into())]],
        );
        assert!(resp.is_well_formed());
        assert!(!resp.is_error());
    }

    #[test]
    fn error_response_has_no_columns_to_validate() {
        let resp = ResponseEnvelope::err("boom");
        assert!(resp.is_error());
        assert!(resp.is_well_formed());
    }

    #[test]
    fn malformed_row_arity_detected() {
        let resp = ResponseEnvelope {
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec![CellValue::Integer(1)]],
            error: String::new(),
        };
        assert!(!resp.is_well_formed());
    }

    #[test]
    fn cell_value_untagged_json_shape() {
        let v = CellValue::Integer(15);
        assert_eq!(serde_json::to_string(&v).unwrap(), "15");
        let v = CellValue::String("Alice".into());
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"Alice\"");
        let v = CellValue::Null;
        assert_eq!(serde_json::to_string(&v).unwrap(), "null");
    }

    #[test]
    fn heartbeat_ping_has_no_query() {
        let req = RequestEnvelope::heartbeat_ping("dev-1");
        assert_eq!(req.request_type, RequestType::HeartbeatPing);
        assert!(req.query.is_empty());
    }
}
