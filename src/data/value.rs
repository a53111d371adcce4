use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single cell of a query result row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    UInt64(u64),
    Float64(f64),
    String(String),
    /// Unix epoch milliseconds
    Timestamp(i64),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int64(_) => "int64",
            Value::UInt64(_) => "uint64",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::Timestamp(_) => "timestamp",
        }
    }

    /// Numeric view of the cell. Strings, bools and timestamps are not numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            Value::Int64(v) => Some(*v as f64),
            Value::UInt64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ms) => DateTime::<Utc>::from_timestamp_millis(*ms),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Render the cell the way it appears when used as a label value.
    ///
    /// Floats keep six decimals, timestamps use `YYYY-MM-DD HH:MM:SS`.
    /// Nulls and bools produce no label.
    pub fn label_text(&self) -> Option<String> {
        match self {
            Value::Null | Value::Bool(_) => None,
            Value::Int64(i) => Some(i.to_string()),
            Value::UInt64(u) => Some(u.to_string()),
            Value::Float64(f) => Some(format!("{:.6}", f)),
            Value::String(s) => Some(s.clone()),
            Value::Timestamp(_) => self
                .as_timestamp()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::UInt64(a), Value::UInt64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int64(i) => write!(f, "{}", i),
            Value::UInt64(u) => write!(f, "{}", u),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::Timestamp(t) => write!(f, "{}", t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_view() {
        assert_eq!(Value::Int64(3).as_f64(), Some(3.0));
        assert_eq!(Value::UInt64(7).as_f64(), Some(7.0));
        assert_eq!(Value::Float64(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::String("1".into()).as_f64(), None);
        assert_eq!(Value::Timestamp(1000).as_f64(), None);
    }

    #[test]
    fn test_label_text() {
        assert_eq!(Value::Float64(2.5).label_text().as_deref(), Some("2.500000"));
        assert_eq!(Value::Int64(-4).label_text().as_deref(), Some("-4"));
        assert_eq!(
            Value::Timestamp(0).label_text().as_deref(),
            Some("1970-01-01 00:00:00")
        );
        assert_eq!(Value::Null.label_text(), None);
    }
}
