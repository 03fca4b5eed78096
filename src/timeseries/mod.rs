//! Time series value model and the result assembly pipeline.

pub mod build;
pub mod derived;
pub mod grid;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One result cell. `None` renders as the request's missing-text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    None,
    Double(f64),
    Int(i64),
    Text(String),
    Time(DateTime<Utc>),
}

impl Value {
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// JSON rendering with the missing-text substituted for `None`.
    #[must_use]
    pub fn render(&self, missingtext: &str) -> serde_json::Value {
        match self {
            Self::None => serde_json::Value::String(missingtext.to_string()),
            Self::Double(v) => serde_json::json!(v),
            Self::Int(v) => serde_json::json!(v),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Time(t) => serde_json::Value::String(t.to_rfc3339()),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::None, Into::into)
    }
}

/// A value stamped with its observation time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedValue {
    pub time: DateTime<Utc>,
    pub value: Value,
}

impl TimedValue {
    #[must_use]
    pub fn new(time: DateTime<Utc>, value: Value) -> Self {
        Self { time, value }
    }
}

/// One output column.
pub type TimeSeries = Vec<TimedValue>;

/// One column per requested parameter, all sharing the same timestamps
/// per station.
pub type TimeSeriesVector = Vec<TimeSeries>;

/// A result vector with one empty column per requested parameter.
#[must_use]
pub fn initialize_result_vector(parameter_count: usize) -> TimeSeriesVector {
    vec![Vec::new(); parameter_count]
}
