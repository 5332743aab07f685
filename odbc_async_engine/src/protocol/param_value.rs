use crate::error::{OdbcError, Result};

/// A caller-supplied input parameter, before it is materialized into a
/// driver-owned [`Parameter`](super::Parameter) buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Integer(i64),
    Double(f64),
    /// Narrow (UTF-8) character data, bound as `SQL_C_CHAR`.
    Text(String),
    /// Wide character data, bound as `SQL_C_WCHAR` (UTF-16).
    WideText(String),
}

impl ParamValue {
    /// Maps a JSON value onto a parameter. Integral numbers that fit `i64`
    /// stay integers; every other number is bound as a double.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Null => Ok(ParamValue::Null),
            serde_json::Value::Bool(b) => Ok(ParamValue::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(ParamValue::Integer(i)),
                None => n.as_f64().map(ParamValue::Double).ok_or_else(|| {
                    OdbcError::ValidationError(format!("Unsupported numeric parameter: {}", n))
                }),
            },
            serde_json::Value::String(s) => Ok(ParamValue::Text(s.clone())),
            other => Err(OdbcError::ValidationError(format!(
                "Unsupported parameter type: {}",
                json_kind(other)
            ))),
        }
    }

    pub fn from_json_array(values: &[serde_json::Value]) -> Result<Vec<Self>> {
        values.iter().map(Self::from_json).collect()
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        ParamValue::Integer(n)
    }
}

impl From<i32> for ParamValue {
    fn from(n: i32) -> Self {
        ParamValue::Integer(i64::from(n))
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        ParamValue::Double(f)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Text(s)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ParamValue::Null)
    }
}
