use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A scalar cell value in a canonical row.
///
/// Missing data is always `Value::Null`. Numeric NaN never appears in a
/// canonical batch; transforms map sentinel and unparsable inputs to Null
/// before storage sees them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    /// Geometry in well-known-text form. The SRID lives in the schema,
    /// not in the value.
    Geometry(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Geometry(s) => Some(s),
            _ => None,
        }
    }

    /// Stable textual rendering used for duplicate-key comparison.
    pub fn key_repr(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) | Value::Geometry(s) => s.clone(),
            Value::Timestamp(ts) => ts.to_rfc3339(),
        }
    }
}

/// One canonical row after transform: column name to scalar value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub values: HashMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: impl Into<String>, value: Value) {
        self.values.insert(column.into(), value);
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }
}

/// One record as fetched from a source, before any transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub data: HashMap<String, serde_json::Value>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    pub fn from_object(obj: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            data: obj.into_iter().collect(),
        }
    }
}

impl Default for RawRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one paginated request: the records plus whether the
/// source may have more pages. Consumed immediately by the pager.
#[derive(Debug)]
pub struct FetchPage {
    pub records: Vec<RawRecord>,
    pub exhausted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_coercions() {
        assert_eq!(Value::Int(42).as_f64(), Some(42.0));
        assert_eq!(Value::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::Text("x".into()).as_f64(), None);
        assert!(Value::Null.is_null());
    }

    #[test]
    fn test_key_repr_distinguishes_values() {
        assert_ne!(Value::Int(1).key_repr(), Value::Int(2).key_repr());
        assert_eq!(Value::Text("10001".into()).key_repr(), "10001");
    }

    #[test]
    fn test_row_set_get() {
        let mut row = Row::new();
        row.set("zip_code", Value::Text("10001".into()));
        assert_eq!(row.get("zip_code"), Some(&Value::Text("10001".into())));
        assert!(!row.contains("year"));
    }
}
