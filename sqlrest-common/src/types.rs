//! Common types for sqlrest
//!
//! `Value` mirrors the storage classes of the underlying store and is the
//! only thing that ever travels to the store as a bound argument.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ============================================================================
// Bound Values
// ============================================================================

/// A value bound to a positional placeholder or read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Convert a JSON request value into a bound value.
    ///
    /// Booleans become `0`/`1`, arrays and objects are stored as their JSON
    /// text so the store's JSON functions can still read them.
    #[must_use]
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Integer(i64::from(*b)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Real(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => Value::Text(s.clone()),
            JsonValue::Array(_) | JsonValue::Object(_) => Value::Text(value.to_string()),
        }
    }

    /// Convert into a JSON value for responses. Blobs are base64 encoded.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Integer(i) => JsonValue::from(*i),
            Value::Real(f) => serde_json::Number::from_f64(*f)
                .map_or(JsonValue::Null, JsonValue::Number),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Blob(b) => {
                JsonValue::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
        }
    }

    /// Check if the value is null
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get as integer
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get as text
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Storage class name for error messages
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Real(f)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

// ============================================================================
// Rows
// ============================================================================

/// A single row returned by the store, with named columns in result order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Row {
    pub columns: Vec<Column>,
}

/// A named column with a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub value: Value,
}

impl Row {
    /// Create an empty row
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column to the row
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.columns.push(Column {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Get a column value by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.value)
    }

    /// Convert the row to a JSON object
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.columns
                .iter()
                .map(|c| (c.name.clone(), c.value.to_json()))
                .collect(),
        )
    }
}

impl<N: Into<String>, V: Into<Value>> FromIterator<(N, V)> for Row {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        Self {
            columns: iter
                .into_iter()
                .map(|(name, value)| Column {
                    name: name.into(),
                    value: value.into(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_storage_classes() {
        assert_eq!(Value::from_json(&json!(null)), Value::Null);
        assert_eq!(Value::from_json(&json!(true)), Value::Integer(1));
        assert_eq!(Value::from_json(&json!(42)), Value::Integer(42));
        assert_eq!(Value::from_json(&json!(1.5)), Value::Real(1.5));
        assert_eq!(Value::from_json(&json!("hi")), Value::Text("hi".into()));
        assert_eq!(
            Value::from_json(&json!({"a": 1})),
            Value::Text(r#"{"a":1}"#.into())
        );
    }

    #[test]
    fn test_blob_to_json_is_base64() {
        assert_eq!(Value::Blob(b"hello".to_vec()).to_json(), json!("aGVsbG8="));
    }

    #[test]
    fn test_value_serialization_is_tagged() {
        let encoded = serde_json::to_value(Value::Text("18".into())).unwrap();
        assert_eq!(encoded, json!({"type": "text", "value": "18"}));
        let null = serde_json::to_value(Value::Null).unwrap();
        assert_eq!(null, json!({"type": "null"}));
    }

    #[test]
    fn test_row_access() {
        let row: Row = vec![("id", Value::Integer(1)), ("name", Value::from("Ada"))]
            .into_iter()
            .collect();
        assert_eq!(row.get("id"), Some(&Value::Integer(1)));
        assert!(row.get("missing").is_none());
        assert_eq!(row.to_json(), json!({"id": 1, "name": "Ada"}));
    }
}
