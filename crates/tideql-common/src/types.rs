use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Semantic type tag attached to a discovered column.
///
/// Remote sources describe their fields loosely; these tags are the common
/// denominator the engine and adapters agree on. Date-like fields stay
/// strings on the wire and are tagged, not parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DataType {
    #[default]
    String,
    Integer,
    Floating,
    Boolean,
    Date,
    DateTime,
    Reference,
    Binary,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Floating => "floating",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::DateTime => "datetime",
            DataType::Reference => "reference",
            DataType::Binary => "binary",
        }
    }

    /// Infers a tag from a JSON sample value. Nulls default to string.
    pub fn infer_json(value: &JsonValue) -> DataType {
        match value {
            JsonValue::Bool(_) => DataType::Boolean,
            JsonValue::Number(n) if n.is_i64() || n.is_u64() => DataType::Integer,
            JsonValue::Number(_) => DataType::Floating,
            _ => DataType::String,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar literal flowing between planner, engine and adapters.
///
/// `Placeholder` is the `?`-parameter sentinel; the engine substitutes it
/// positionally before any adapter sees the statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Placeholder,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Value::Placeholder)
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Bool(_) => Some(DataType::Boolean),
            Value::Int64(_) => Some(DataType::Integer),
            Value::Float64(_) => Some(DataType::Floating),
            Value::String(_) => Some(DataType::String),
            Value::Bytes(_) => Some(DataType::Binary),
            Value::Null | Value::Placeholder => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null | Value::Placeholder => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int64(i) => JsonValue::from(*i),
            Value::Float64(f) => {
                serde_json::Number::from_f64(*f).map(JsonValue::Number).unwrap_or(JsonValue::Null)
            }
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Bytes(b) => JsonValue::String(String::from_utf8_lossy(b).into_owned()),
        }
    }

    pub fn from_json(value: &JsonValue) -> Value {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int64(i)
                } else {
                    Value::Float64(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        }
    }
}

/// Bare textual rendering used when adapters interpolate values into their
/// native filter dialect; quoting is the dialect's responsibility.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int64(i) => write!(f, "{}", i),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(s) => f.write_str(s),
            Value::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Value::Placeholder => f.write_str("?"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// Ordered column-to-literal mapping used by INSERT and UPDATE.
pub type ValueMap = indexmap::IndexMap<String, Value>;
