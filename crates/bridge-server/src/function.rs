//! Function registry and invoker.
//!
//! The registry is a name→callable map built once at startup and never
//! mutated while serving. Callables are reflection-free: Go's `reflect`
//! based dispatch becomes a `(name, arity, paramKinds, handler)` tuple per
//! spec.md §9, where `handler` takes a homogeneous parameter vector (a
//! tagged sum of the recognized kinds) and returns a homogeneous result
//! vector.

use bridge_proto::{BridgeError, CellValue, FunctionCall, ResponseEnvelope};
use std::collections::HashMap;
use std::sync::Arc;

/// One argument after coercion into the kind a registered function expects.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    IntList(Vec<i64>),
    StringList(Vec<String>),
    Json(serde_json::Value),
    /// A user struct reconstituted field-wise from the supplied mapping;
    /// fields the target doesn't recognize are simply absent here, since
    /// `coerce` drops them rather than rejecting the call.
    Struct(serde_json::Map<String, serde_json::Value>),
}

impl ArgValue {
    fn kind_name(&self) -> &'static str {
        match self {
            ArgValue::String(_) => "string",
            ArgValue::Int(_) => "int",
            ArgValue::Float(_) => "float64",
            ArgValue::Bool(_) => "bool",
            ArgValue::IntList(_) => "[]int",
            ArgValue::StringList(_) => "[]string",
            ArgValue::Json(_) => "json",
            ArgValue::Struct(_) => "struct",
        }
    }
}

/// The textual representation a complex result renders as on the wire
/// (spec.md §4.7: "values of complex kinds are rendered as their
/// serialized textual form; nil → `"null"`").
impl std::fmt::Display for ArgValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgValue::String(s) => write!(f, "{s}"),
            ArgValue::Int(i) => write!(f, "{i}"),
            ArgValue::Float(v) => write!(f, "{v}"),
            ArgValue::Bool(b) => write!(f, "{b}"),
            ArgValue::IntList(v) => write!(f, "{v:?}"),
            ArgValue::StringList(v) => write!(f, "{v:?}"),
            ArgValue::Json(v) => write!(f, "{v}"),
            ArgValue::Struct(m) => write!(f, "{}", serde_json::Value::Object(m.clone())),
        }
    }
}

/// The expected kind of one positional parameter of a registered callable.
///
/// `Struct` carries the target's recognized field names (known at
/// registration time, same as any other registered-function metadata);
/// fields in the supplied mapping that aren't in this list are dropped
/// during coercion rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Int,
    Float,
    Bool,
    IntList,
    StringList,
    Json,
    Struct(&'static [&'static str]),
}

impl ParamKind {
    fn name(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Int => "int",
            ParamKind::Float => "float64",
            ParamKind::Bool => "bool",
            ParamKind::IntList => "[]int",
            ParamKind::StringList => "[]string",
            ParamKind::Json => "json",
            ParamKind::Struct(_) => "struct",
        }
    }
}

/// A single return value from a callable: either a produced value, or an
/// error (rendered as its message in that column per spec.md §4.7).
pub enum FunctionResult {
    Value(ArgValue),
    Error(String),
}

/// The boxed handler shape: takes the coerced argument vector, returns one
/// or more results (single-return and multi-return functions both fit this
/// signature with a one-element `Vec`).
pub type FunctionHandler = Arc<dyn Fn(&[ArgValue]) -> Vec<FunctionResult> + Send + Sync>;

/// A registered callable: its declared arity, the expected kind per
/// position, and the handler itself.
pub struct RegisteredFunction {
    pub param_kinds: Vec<ParamKind>,
    pub handler: FunctionHandler,
}

/// Name→callable map, built at startup, read-only while serving.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: Arc<HashMap<String, RegisteredFunction>>,
}

/// Accumulates `(name, paramKinds, handler)` registrations before the
/// registry is frozen; mirrors the builder shape of `hootenanny`'s
/// `tools_registry` construction.
#[derive(Default)]
pub struct FunctionRegistryBuilder {
    functions: HashMap<String, RegisteredFunction>,
}

impl FunctionRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        name: impl Into<String>,
        param_kinds: Vec<ParamKind>,
        handler: impl Fn(&[ArgValue]) -> Vec<FunctionResult> + Send + Sync + 'static,
    ) -> Self {
        self.functions.insert(
            name.into(),
            RegisteredFunction {
                param_kinds,
                handler: Arc::new(handler),
            },
        );
        self
    }

    pub fn build(self) -> FunctionRegistry {
        FunctionRegistry {
            functions: Arc::new(self.functions),
        }
    }
}

impl FunctionRegistry {
    pub fn builder() -> FunctionRegistryBuilder {
        FunctionRegistryBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredFunction> {
        self.functions.get(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Coerces one supplied `(type, value)` pair into the callable's expected
/// parameter kind, per spec.md §4.7's coercion rules.
fn coerce(position: usize, name: &str, value: &serde_json::Value, expected: ParamKind) -> Result<ArgValue, BridgeError> {
    let type_mismatch = |actual: &str| BridgeError::TypeMismatch {
        name: name.to_string(),
        position,
        expected: expected.name().to_string(),
        actual: actual.to_string(),
    };

    match expected {
        ParamKind::String => Ok(ArgValue::String(match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            other => other.to_string(),
        })),
        ParamKind::Int => {
            let n = value.as_f64().ok_or_else(|| type_mismatch("non-numeric"))?;
            if n.fract() != 0.0 {
                return Err(type_mismatch("non-whole float"));
            }
            Ok(ArgValue::Int(n as i64))
        }
        ParamKind::Float => {
            let n = value.as_f64().ok_or_else(|| type_mismatch("non-numeric"))?;
            Ok(ArgValue::Float(n))
        }
        ParamKind::Bool => match value {
            serde_json::Value::Bool(b) => Ok(ArgValue::Bool(*b)),
            serde_json::Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(ArgValue::Bool(true)),
            serde_json::Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(ArgValue::Bool(false)),
            _ => Err(type_mismatch("non-boolean")),
        },
        ParamKind::IntList => {
            let arr = value.as_array().ok_or_else(|| type_mismatch("non-array"))?;
            let mut out = Vec::with_capacity(arr.len());
            for el in arr {
                let n = el.as_f64().ok_or_else(|| type_mismatch("non-numeric element"))?;
                out.push(n as i64);
            }
            Ok(ArgValue::IntList(out))
        }
        ParamKind::StringList => {
            let arr = value.as_array().ok_or_else(|| type_mismatch("non-array"))?;
            let mut out = Vec::with_capacity(arr.len());
            for el in arr {
                out.push(match el {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            }
            Ok(ArgValue::StringList(out))
        }
        ParamKind::Json => Ok(ArgValue::Json(value.clone())),
        ParamKind::Struct(fields) => {
            let obj = value.as_object().ok_or_else(|| type_mismatch("non-object"))?;
            let mut out = serde_json::Map::with_capacity(fields.len());
            for field in fields {
                if let Some(v) = obj.get(*field) {
                    out.insert((*field).to_string(), v.clone());
                }
            }
            Ok(ArgValue::Struct(out))
        }
    }
}

/// Resolves, arity-checks, coerces, invokes, and shapes the result of a
/// `FunctionCall` into a `ResponseEnvelope`, per spec.md §4.7.
pub fn invoke(registry: &FunctionRegistry, call: &FunctionCall) -> Result<ResponseEnvelope, BridgeError> {
    let func = registry
        .get(&call.name)
        .ok_or_else(|| BridgeError::UnknownFunction(call.name.clone()))?;

    if func.param_kinds.len() != call.params.len() {
        return Err(BridgeError::ArityMismatch {
            name: call.name.clone(),
            expected: func.param_kinds.len(),
            actual: call.params.len(),
        });
    }

    let mut args = Vec::with_capacity(call.params.len());
    for (position, (param, expected)) in call.params.iter().zip(func.param_kinds.iter()).enumerate() {
        args.push(coerce(position, &call.name, &param.value, *expected)?);
    }

    let results = (func.handler)(&args);
    Ok(shape_results(results))
}

fn render(result: FunctionResult) -> CellValue {
    match result {
        FunctionResult::Value(ArgValue::String(s)) => CellValue::String(s),
        FunctionResult::Value(ArgValue::Int(i)) => CellValue::Integer(i),
        FunctionResult::Value(ArgValue::Float(f)) => CellValue::Float(f),
        FunctionResult::Value(ArgValue::Bool(b)) => CellValue::Bool(b),
        FunctionResult::Value(v @ ArgValue::IntList(_)) => CellValue::String(v.to_string()),
        FunctionResult::Value(v @ ArgValue::StringList(_)) => CellValue::String(v.to_string()),
        FunctionResult::Value(ArgValue::Json(v)) => {
            if v.is_null() {
                CellValue::Null
            } else {
                CellValue::String(v.to_string())
            }
        }
        FunctionResult::Value(v @ ArgValue::Struct(_)) => CellValue::String(v.to_string()),
        FunctionResult::Error(msg) => CellValue::String(msg),
    }
}

/// Shapes a callable's return values per spec.md §4.7: single non-error
/// return → `result`; single error → `error`; multiple returns →
/// `result_1..result_n` with errors rendered as their message.
fn shape_results(results: Vec<FunctionResult>) -> ResponseEnvelope {
    match results.len() {
        0 => ResponseEnvelope::ok(vec![], vec![vec![]]),
        1 => {
            let is_error = matches!(results[0], FunctionResult::Error(_));
            let column = if is_error { "error" } else { "result" };
            let cell = render(results.into_iter().next().unwrap());
            ResponseEnvelope::ok(vec![column.to_string()], vec![vec![cell]])
        }
        n => {
            let columns = (1..=n).map(|i| format!("result_{i}")).collect();
            let row = results.into_iter().map(render).collect();
            ResponseEnvelope::ok(columns, vec![row])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_proto::ParamValue;

    fn sum_registry() -> FunctionRegistry {
        FunctionRegistry::builder()
            .register("sumArray", vec![ParamKind::IntList], |args| {
                let ArgValue::IntList(values) = &args[0] else {
                    unreachable!()
                };
                vec![FunctionResult::Value(ArgValue::Int(values.iter().sum()))]
            })
            .register("divide", vec![ParamKind::Int, ParamKind::Int], |args| {
                let (ArgValue::Int(a), ArgValue::Int(b)) = (&args[0], &args[1]) else {
                    unreachable!()
                };
                if *b == 0 {
                    vec![FunctionResult::Error("division by zero".to_string())]
                } else {
                    vec![FunctionResult::Value(ArgValue::Int(a / b))]
                }
            })
            .register("minMax", vec![ParamKind::IntList], |args| {
                let ArgValue::IntList(values) = &args[0] else {
                    unreachable!()
                };
                vec![
                    FunctionResult::Value(ArgValue::Int(*values.iter().min().unwrap())),
                    FunctionResult::Value(ArgValue::Int(*values.iter().max().unwrap())),
                ]
            })
            .build()
    }

    #[test]
    fn sum_array_happy_path() {
        let registry = sum_registry();
        let call = FunctionCall::new("sumArray", vec![ParamValue::int_slice(vec![1, 2, 3, 4, 5])]);
        let resp = invoke(&registry, &call).unwrap();
        assert_eq!(resp.columns, vec!["result"]);
        assert_eq!(resp.rows, vec![vec![CellValue::Integer(15)]]);
    }

    #[test]
    fn unknown_function_errs() {
        let registry = sum_registry();
        let call = FunctionCall::new("missing", vec![]);
        assert!(matches!(invoke(&registry, &call), Err(BridgeError::UnknownFunction(_))));
    }

    #[test]
    fn arity_mismatch_errs() {
        let registry = sum_registry();
        let call = FunctionCall::new("divide", vec![ParamValue::int(1)]);
        assert!(matches!(invoke(&registry, &call), Err(BridgeError::ArityMismatch { .. })));
    }

    #[test]
    fn type_mismatch_errs() {
        let registry = sum_registry();
        let call = FunctionCall::new(
            "divide",
            vec![ParamValue::string("not-a-number"), ParamValue::int(2)],
        );
        assert!(matches!(invoke(&registry, &call), Err(BridgeError::TypeMismatch { .. })));
    }

    #[test]
    fn single_error_return_renders_error_column() {
        let registry = sum_registry();
        let call = FunctionCall::new("divide", vec![ParamValue::int(10), ParamValue::int(0)]);
        let resp = invoke(&registry, &call).unwrap();
        assert_eq!(resp.columns, vec!["error"]);
        assert_eq!(resp.rows[0][0], CellValue::String("division by zero".to_string()));
    }

    #[test]
    fn multiple_returns_get_numbered_columns() {
        let registry = sum_registry();
        let call = FunctionCall::new("minMax", vec![ParamValue::int_slice(vec![5, 1, 9, 3])]);
        let resp = invoke(&registry, &call).unwrap();
        assert_eq!(resp.columns, vec!["result_1", "result_2"]);
        assert_eq!(resp.rows, vec![vec![CellValue::Integer(1), CellValue::Integer(9)]]);
    }

    #[test]
    fn whole_number_float_widens_to_int() {
        let registry = sum_registry();
        let call = FunctionCall::new("divide", vec![ParamValue::float64(10.0), ParamValue::int(2)]);
        let resp = invoke(&registry, &call).unwrap();
        assert_eq!(resp.rows, vec![vec![CellValue::Integer(5)]]);
    }

    #[test]
    fn struct_param_reconstitutes_known_fields_and_drops_unknown_ones() {
        let registry = FunctionRegistry::builder()
            .register("greet", vec![ParamKind::Struct(&["name", "age"])], |args| {
                let ArgValue::Struct(fields) = &args[0] else { unreachable!() };
                let name = fields.get("name").and_then(|v| v.as_str()).unwrap_or("stranger");
                vec![FunctionResult::Value(ArgValue::String(format!("hello {name}")))]
            })
            .build();

        let call = FunctionCall::new(
            "greet",
            vec![ParamValue::json(serde_json::json!({
                "name": "Ada",
                "age": 36,
                "unexpectedField": "ignored"
            }))],
        );
        let resp = invoke(&registry, &call).unwrap();
        assert_eq!(resp.rows, vec![vec![CellValue::String("hello Ada".to_string())]]);
    }

    #[test]
    fn struct_param_rejects_non_object_value() {
        let registry = FunctionRegistry::builder()
            .register("greet", vec![ParamKind::Struct(&["name"])], |_args| {
                vec![FunctionResult::Value(ArgValue::Bool(true))]
            })
            .build();
        let call = FunctionCall::new("greet", vec![ParamValue::string("not-an-object")]);
        assert!(matches!(invoke(&registry, &call), Err(BridgeError::TypeMismatch { .. })));
    }
}
