//! Wire shape of a registered-function invocation (the payload carried in
//! `RequestEnvelope::query` when `request_type == Function`).

use serde::{Deserialize, Serialize};

/// One positional argument to a function call: a tagged kind plus its
/// JSON-encoded value. `kind` is one of the recognized parameter kinds
/// (`string`, `int`, `int64`, `float64`, `bool`, `[]int`, `[]string`,
/// `json`, or a registered struct name).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParamValue {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: serde_json::Value,
}

impl ParamValue {
    pub fn new(kind: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            value,
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new("string", serde_json::Value::String(value.into()))
    }

    pub fn int(value: i64) -> Self {
        Self::new("int", serde_json::json!(value))
    }

    pub fn int64(value: i64) -> Self {
        Self::new("int64", serde_json::json!(value))
    }

    pub fn float64(value: f64) -> Self {
        Self::new("float64", serde_json::json!(value))
    }

    pub fn bool(value: bool) -> Self {
        Self::new("bool", serde_json::Value::Bool(value))
    }

    pub fn int_slice(values: impl IntoIterator<Item = i64>) -> Self {
        Self::new("[]int", serde_json::json!(values.into_iter().collect::<Vec<_>>()))
    }

    pub fn string_slice(values: impl IntoIterator<Item = String>) -> Self {
        Self::new(
            "[]string",
            serde_json::json!(values.into_iter().collect::<Vec<_>>()),
        )
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::new("json", value)
    }
}

/// Payload carried by a `function` request: `{"name": ..., "params": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamValue>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, params: Vec<ParamValue>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_call_roundtrip() {
        let call = FunctionCall::new(
            "sumArray",
            vec![ParamValue::int_slice(vec![1, 2, 3, 4, 5])],
        );
        let json = serde_json::to_string(&call).unwrap();
        assert!(json.contains("\"type\":\"[]int\""));
        let parsed: FunctionCall = serde_json::from_str(&json).unwrap();
        assert_eq!(call, parsed);
    }

    #[test]
    fn param_value_kinds() {
        assert_eq!(ParamValue::string("x").kind, "string");
        assert_eq!(ParamValue::bool(true).kind, "bool");
        assert_eq!(ParamValue::json(serde_json::json!({"a":1})).kind, "json");
    }
}
