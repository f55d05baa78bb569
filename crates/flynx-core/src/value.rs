//! Values read from live data sources.

use serde::{Deserialize, Serialize};

/// A value fetched from a data source, scalar or array shaped.
///
/// Storage in the output file is always array shaped; [`Value::normalized`]
/// performs the scalar wrapping exactly once, at the write boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    TextArray(Vec<String>),
}

impl Value {
    /// Whether the value is array shaped.
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            Value::IntArray(_) | Value::FloatArray(_) | Value::TextArray(_)
        )
    }

    /// Number of stored elements (1 for scalars).
    pub fn len(&self) -> usize {
        match self {
            Value::Int(_) | Value::Float(_) | Value::Text(_) => 1,
            Value::IntArray(v) => v.len(),
            Value::FloatArray(v) => v.len(),
            Value::TextArray(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Array-shape the value: scalars become one-element arrays, arrays
    /// pass through unchanged.
    pub fn normalized(self) -> Value {
        match self {
            Value::Int(v) => Value::IntArray(vec![v]),
            Value::Float(v) => Value::FloatArray(vec![v]),
            Value::Text(v) => Value::TextArray(vec![v]),
            other => other,
        }
    }

    /// Keep only the first `limit` elements of an array-shaped value.
    /// Scalars are returned unchanged; truncation applies to genuine
    /// array reads only.
    pub fn truncated(self, limit: usize) -> Value {
        match self {
            Value::IntArray(mut v) => {
                v.truncate(limit);
                Value::IntArray(v)
            }
            Value::FloatArray(mut v) => {
                v.truncate(limit);
                Value::FloatArray(v)
            }
            Value::TextArray(mut v) => {
                v.truncate(limit);
                Value::TextArray(v)
            }
            scalar => scalar,
        }
    }

    /// Interpret a scalar as an array bound (for live length limits).
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Value::Int(v) if *v >= 0 => Some(*v as usize),
            Value::Float(v) if *v >= 0.0 => Some(*v as usize),
            _ => None,
        }
    }

    /// Scalar numeric view, if the value has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Coerce to the textual representation a string-typed read returns.
    pub fn to_text(&self) -> Value {
        match self {
            Value::Int(v) => Value::Text(v.to_string()),
            Value::Float(v) => Value::Text(v.to_string()),
            Value::Text(v) => Value::Text(v.clone()),
            Value::IntArray(v) => Value::TextArray(v.iter().map(i64::to_string).collect()),
            Value::FloatArray(v) => Value::TextArray(v.iter().map(f64::to_string).collect()),
            Value::TextArray(v) => Value::TextArray(v.clone()),
        }
    }
}
