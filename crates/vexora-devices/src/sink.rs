//! Time-series sink interface and the in-process implementations.
//!
//! The dispatcher runs on the transport's delivery path, so sinks must return
//! quickly: implementations either do bounded in-memory work or queue the
//! point for a background writer.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

/// Typed field value of a point.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A single time-series record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    /// Unix milliseconds.
    pub timestamp_millis: i64,
}

impl Point {
    pub fn new(measurement: impl Into<String>, timestamp_millis: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp_millis,
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn field_value(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }
}

/// Error returned by a sink that refused or failed a write.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("write queue is full")]
    QueueFull,

    #[error("sink is closed")]
    Closed,

    #[error("write failed: {0}")]
    Write(String),
}

/// Destination for telemetry, state and event points.
pub trait TimeSeriesSink: Send + Sync {
    /// Hand a point to the sink. Must not block on I/O.
    fn write_point(&self, point: Point) -> Result<(), SinkError>;
}

/// Sink used when no time-series backend is configured: points are only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TimeSeriesSink for LogSink {
    fn write_point(&self, point: Point) -> Result<(), SinkError> {
        tracing::debug!(
            measurement = %point.measurement,
            tags = ?point.tags,
            fields = ?point.fields,
            ts = point.timestamp_millis,
            "time-series sink disabled, point not stored"
        );
        Ok(())
    }
}

/// Sink that keeps every point in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    points: Mutex<Vec<Point>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all points written so far.
    pub fn points(&self) -> Vec<Point> {
        self.points.lock().clone()
    }

    /// Points of one measurement.
    pub fn measurement(&self, measurement: &str) -> Vec<Point> {
        self.points
            .lock()
            .iter()
            .filter(|p| p.measurement == measurement)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.points.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TimeSeriesSink for MemorySink {
    fn write_point(&self, point: Point) -> Result<(), SinkError> {
        self.points.lock().push(point);
        Ok(())
    }
}
