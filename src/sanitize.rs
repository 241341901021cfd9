//! Best-effort sanitization of values headed for the cache, metrics records
//! and exports
//!
//! Values are visited recursively over a closed set of variants: scalars,
//! sequences, mappings (all as [`serde_json::Value`]) and dense `f32` blobs.
//! Truncation policy: any sequence or blob longer than [`MAX_SEQUENCE_LEN`] is
//! replaced by an [`ArraySummary`] (shape, dtype, min, max, mean). Nothing in
//! this module fails; a value that cannot be serialized becomes a structured
//! placeholder describing the error.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Longest sequence stored verbatim
pub const MAX_SEQUENCE_LEN: usize = 10_000;

/// Key marking a summarized sequence inside a JSON document
pub const SUMMARY_KEY: &str = "__array_summary__";

/// Key marking a value that could not be serialized
pub const PLACEHOLDER_KEY: &str = "__unserializable__";

/// Compact description of a large numeric sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArraySummary {
    pub shape: Vec<usize>,
    pub dtype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
}

impl ArraySummary {
    pub fn from_f32(values: &[f32]) -> Self {
        let stats = numeric_stats(values.iter().map(|v| *v as f64));
        Self {
            shape: vec![values.len()],
            dtype: "float32".to_string(),
            min: stats.map(|s| s.0),
            max: stats.map(|s| s.1),
            mean: stats.map(|s| s.2),
        }
    }

    fn from_json(items: &[Value]) -> Self {
        let numeric = items.iter().all(Value::is_number);
        let stats = if numeric {
            numeric_stats(items.iter().filter_map(Value::as_f64))
        } else {
            None
        };
        let mut shape = vec![items.len()];
        if let Some(Value::Array(first)) = items.first() {
            shape.extend(shape_of(first));
        }

        Self {
            shape,
            dtype: if numeric { "float64" } else { dtype_of(items) }.to_string(),
            min: stats.map(|s| s.0),
            max: stats.map(|s| s.1),
            mean: stats.map(|s| s.2),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            SUMMARY_KEY.to_string(),
            serde_json::to_value(self).unwrap_or(Value::Null),
        );
        Value::Object(map)
    }
}

/// Types whose contents are made cache/export safe before storage
pub trait Sanitize {
    fn sanitize(self) -> Self;
}

impl Sanitize for Value {
    fn sanitize(self) -> Self {
        sanitize_json(self)
    }
}

impl<T: Sanitize> Sanitize for Vec<T> {
    fn sanitize(self) -> Self {
        self.into_iter().map(Sanitize::sanitize).collect()
    }
}

/// Recursively replace oversized sequences with summaries
pub fn sanitize_json(value: Value) -> Value {
    match value {
        Value::Array(items) if items.len() > MAX_SEQUENCE_LEN => {
            ArraySummary::from_json(&items).to_value()
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_json).collect()),
        Value::Object(map) => {
            let sanitized: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, sanitize_json(v)))
                .collect();
            Value::Object(sanitized)
        }
        scalar => scalar,
    }
}

/// Serialize anything into a sanitized JSON value, never failing
pub fn to_safe_value<T: Serialize + ?Sized>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(v) => sanitize_json(v),
        Err(e) => placeholder(&e.to_string(), std::any::type_name::<T>(), None),
    }
}

/// Serialize a dense blob, summarizing it if it is too large
pub fn blob_to_value(values: &[f32]) -> Value {
    if values.len() > MAX_SEQUENCE_LEN {
        return ArraySummary::from_f32(values).to_value();
    }
    if values.iter().any(|v| !v.is_finite()) {
        return placeholder(
            "blob contains non-finite values",
            "float32",
            Some(vec![values.len()]),
        );
    }
    Value::Array(values.iter().map(|v| json!(v)).collect())
}

/// Structured stand-in for a value that could not be serialized
pub fn placeholder(error: &str, type_name: &str, shape: Option<Vec<usize>>) -> Value {
    let mut map = Map::new();
    map.insert(PLACEHOLDER_KEY.to_string(), Value::Bool(true));
    map.insert("error".to_string(), Value::String(error.to_string()));
    map.insert("type".to_string(), Value::String(type_name.to_string()));
    if let Some(shape) = shape {
        map.insert("shape".to_string(), json!(shape));
    }
    Value::Object(map)
}

pub fn is_placeholder(value: &Value) -> bool {
    value.get(PLACEHOLDER_KEY).and_then(Value::as_bool) == Some(true)
}

pub fn is_summary(value: &Value) -> bool {
    value.get(SUMMARY_KEY).is_some()
}

fn shape_of(value: &[Value]) -> Vec<usize> {
    let mut shape = vec![value.len()];
    if let Some(Value::Array(inner)) = value.first() {
        shape.extend(shape_of(inner));
    }
    shape
}

fn dtype_of(items: &[Value]) -> &'static str {
    let first = match items.first() {
        Some(v) => v,
        None => return "empty",
    };
    let kind = |v: &Value| std::mem::discriminant(v);
    if items.iter().any(|v| kind(v) != kind(first)) {
        return "mixed";
    }
    match first {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "float64",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// (min, max, mean) over finite values
fn numeric_stats(values: impl Iterator<Item = f64>) -> Option<(f64, f64, f64)> {
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values.filter(|v| v.is_finite()) {
        count += 1;
        sum += v;
        min = min.min(v);
        max = max.max(v);
    }
    (count > 0).then(|| (min, max, sum / count as f64))
}
