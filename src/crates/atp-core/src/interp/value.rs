//! Sandbox values
//!
//! Values are `Send + Sync` (arrays and objects sit behind
//! `Arc<parking_lot::Mutex<..>>`) so a whole interpreter can be moved
//! onto a blocking task. Objects use a `BTreeMap`, which keeps key
//! iteration deterministic across replays.

use atp_script::ast::Function;
use atp_script::format_number;
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::env::EnvRef;

pub type ArrRef = Arc<Mutex<Vec<Value>>>;
pub type ObjRef = Arc<Mutex<BTreeMap<String, Value>>>;

/// A user function plus its captured environment.
pub struct Closure {
    pub func: Arc<Function>,
    pub env: EnvRef,
}

/// Host functions installed into the sandbox globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFn {
    // runtime APIs
    LlmComplete,
    ApprovalRequest,
    EmbeddingEmbed,
    ToolsInvoke,
    CacheGet,
    CacheSet,
    ProgressReport,
    // resumable primitives
    ResumableForOf,
    ResumableWhile,
    ResumableForLoop,
    ResumableMap,
    ResumableForEach,
    ResumableFilter,
    ResumableReduce,
    ResumableFind,
    ResumableSome,
    ResumableEvery,
    ResumableFlatMap,
    ResumablePromiseAll,
    ResumablePromiseAllSettled,
    // batch parallel primitives
    BatchMap,
    BatchFilter,
    BatchForEach,
    // language globals
    StringCast,
    NumberCast,
    BooleanCast,
    JsonStringify,
    JsonParse,
    MathFloor,
    MathCeil,
    MathRound,
    MathTrunc,
    MathAbs,
    MathMin,
    MathMax,
    MathPow,
    MathSqrt,
    ObjectKeys,
    ObjectValues,
    ObjectEntries,
    ArrayIsArray,
    ConsoleLog,
    ConsoleWarn,
    ConsoleError,
    ParseInt,
    ParseFloat,
    IsNaN,
    PromiseAll,
    PromiseAllSettled,
    ErrorCtor,
}

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(ArrRef),
    Object(ObjRef),
    Closure(Arc<Closure>),
    Native(NativeFn),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Array(_) => write!(f, "[array]"),
            Value::Object(_) => write!(f, "[object]"),
            Value::Closure(_) => write!(f, "[function]"),
            Value::Native(n) => write!(f, "[native {:?}]", n),
        }
    }
}

impl Value {
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Arc::new(Mutex::new(items)))
    }

    pub fn object(map: BTreeMap<String, Value>) -> Value {
        Value::Object(Arc::new(Mutex::new(map)))
    }

    pub fn str(text: impl Into<String>) -> Value {
        Value::Str(text.into())
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) | Value::Object(_) => "object",
            Value::Closure(_) | Value::Native(_) => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    /// String conversion, JavaScript style.
    pub fn js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.clone(),
            Value::Array(items) => {
                let items = items.lock().clone();
                items
                    .iter()
                    .map(|v| match v {
                        Value::Undefined | Value::Null => String::new(),
                        other => other.js_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(",")
            }
            Value::Object(_) => "[object Object]".to_string(),
            Value::Closure(_) | Value::Native(_) => "[function]".to_string(),
        }
    }

    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => a == b,
            _ => false,
        }
    }

    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Number(_), Value::Str(_)) => self.to_number() == other.to_number(),
            (Value::Str(_), Value::Number(_)) => self.to_number() == other.to_number(),
            (Value::Bool(_), _) => Value::Number(self.to_number()).loose_eq(other),
            (_, Value::Bool(_)) => self.loose_eq(&Value::Number(other.to_number())),
            _ => self.strict_eq(other),
        }
    }
}

/// Why a value could not be converted to JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonConvError {
    /// Functions have no JSON representation.
    Unserializable,
    /// Depth cap hit - almost always a cyclic structure.
    TooDeep,
}

const MAX_JSON_DEPTH: u32 = 64;

/// Convert a sandbox value to JSON. `undefined`, `NaN` and infinities
/// become `null`, matching `JSON.stringify`.
pub fn value_to_json(value: &Value) -> Result<Json, JsonConvError> {
    value_to_json_depth(value, MAX_JSON_DEPTH)
}

fn value_to_json_depth(value: &Value, depth: u32) -> Result<Json, JsonConvError> {
    if depth == 0 {
        return Err(JsonConvError::TooDeep);
    }
    Ok(match value {
        Value::Undefined | Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => number_to_json(*n),
        Value::Str(s) => Json::String(s.clone()),
        Value::Array(items) => {
            let items = items.lock().clone();
            let mut out = Vec::with_capacity(items.len());
            for item in &items {
                match value_to_json_depth(item, depth - 1) {
                    Ok(json) => out.push(json),
                    // functions in arrays serialize as null
                    Err(JsonConvError::Unserializable) => out.push(Json::Null),
                    Err(err) => return Err(err),
                }
            }
            Json::Array(out)
        }
        Value::Object(map) => {
            let map = map.lock().clone();
            let mut out = serde_json::Map::new();
            for (key, item) in &map {
                match value_to_json_depth(item, depth - 1) {
                    Ok(json) => {
                        out.insert(key.clone(), json);
                    }
                    // function-valued properties are dropped
                    Err(JsonConvError::Unserializable) => {}
                    Err(err) => return Err(err),
                }
            }
            Json::Object(out)
        }
        Value::Closure(_) | Value::Native(_) => return Err(JsonConvError::Unserializable),
    })
}

/// Integral values become JSON integers so `3` does not surface as
/// `3.0` on the wire; non-finite values become `null`.
fn number_to_json(n: f64) -> Json {
    if n == n.trunc() && n.abs() <= 9_007_199_254_740_992.0 {
        return Json::Number(serde_json::Number::from(n as i64));
    }
    serde_json::Number::from_f64(n)
        .map(Json::Number)
        .unwrap_or(Json::Null)
}

/// Convert JSON into a sandbox value.
pub fn value_from_json(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        Json::String(s) => Value::Str(s.clone()),
        Json::Array(items) => Value::array(items.iter().map(value_from_json).collect()),
        Json::Object(map) => Value::object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_from_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness() {
        assert!(!Value::Undefined.truthy());
        assert!(!Value::Null.truthy());
        assert!(!Value::Number(0.0).truthy());
        assert!(!Value::str("").truthy());
        assert!(Value::str("x").truthy());
        assert!(Value::Number(-1.0).truthy());
        assert!(Value::array(vec![]).truthy());
    }

    #[test]
    fn js_string_formatting() {
        assert_eq!(Value::Number(3.0).js_string(), "3");
        assert_eq!(Value::Number(2.5).js_string(), "2.5");
        assert_eq!(
            Value::array(vec![Value::Number(1.0), Value::Number(2.0)]).js_string(),
            "1,2"
        );
    }

    #[test]
    fn loose_equality_coerces() {
        assert!(Value::Number(1.0).loose_eq(&Value::str("1")));
        assert!(Value::Null.loose_eq(&Value::Undefined));
        assert!(!Value::Null.strict_eq(&Value::Undefined));
    }

    #[test]
    fn json_roundtrip() {
        let json = json!({"a": [1, "x", null], "b": true});
        let value = value_from_json(&json);
        assert_eq!(value_to_json(&value).unwrap(), json);
    }

    #[test]
    fn nan_serializes_to_null() {
        assert_eq!(value_to_json(&Value::Number(f64::NAN)).unwrap(), json!(null));
    }

    #[test]
    fn cyclic_structure_is_rejected() {
        let arr = Value::array(vec![]);
        if let Value::Array(inner) = &arr {
            inner.lock().push(arr.clone());
        }
        assert_eq!(value_to_json(&arr), Err(JsonConvError::TooDeep));
    }
}
