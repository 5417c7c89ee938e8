//! Wire payloads exchanged with devices.
//!
//! Every inbound message shares the envelope header (`v`, `deviceId`, `ts`).
//! Kind-specific bodies are decoded only after the envelope passes validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Protocol version stamped on every outbound payload.
pub const PROTOCOL_VERSION: i64 = 1;

/// Ack code used for the synthetic acknowledgement produced on timeout.
pub const TIMEOUT_CODE: &str = "TIMEOUT";

/// Loosely typed parameter value carried by commands, acks and events.
///
/// Variant order matters for untagged decoding: integers are tried before
/// floats so that `5` stays an integer while `5.5` becomes a float.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<ParamValue>),
    Map(BTreeMap<String, ParamValue>),
}

/// Open mapping of named parameters.
pub type Params = BTreeMap<String, ParamValue>;

impl ParamValue {
    /// Coerce to an integer. Floats are truncated toward zero; non-finite
    /// floats and every other variant yield `None`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            _ => None,
        }
    }

    /// Coerce to a float, accepting integer representations.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ParamValue>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Common header present on every inbound message.
///
/// Missing fields decode to zero values so that an incomplete header is
/// reported as an invalid envelope rather than a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub v: i64,
    #[serde(rename = "deviceId", default)]
    pub device_id: String,
    #[serde(default)]
    pub ts: i64,
}

/// Command published on `v1/dev/{deviceId}/cmd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub v: i64,
    /// Correlation identifier echoed back by the device as the ack `id`.
    pub id: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    /// Creation time in unix milliseconds.
    pub ts: i64,
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub params: Params,
}

/// Acknowledgement published by a device on `v1/dev/{deviceId}/ack`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    #[serde(default)]
    pub v: i64,
    /// Correlation identifier of the command being acknowledged.
    #[serde(default)]
    pub id: String,
    #[serde(rename = "deviceId", default)]
    pub device_id: String,
    #[serde(default)]
    pub ts: i64,
    #[serde(default)]
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Params>,
}

impl Acknowledgement {
    /// Negative acknowledgement synthesized when no device answer arrives in time.
    pub fn timeout(correlation_id: impl Into<String>, device_id: impl Into<String>, ts: i64) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            id: correlation_id.into(),
            device_id: device_id.into(),
            ts,
            ok: false,
            code: Some(TIMEOUT_CODE.to_string()),
            msg: Some("ACK timeout".to_string()),
            data: None,
        }
    }

    /// An ack can only be matched when it names both the command and the device.
    pub fn is_identified(&self) -> bool {
        !self.id.is_empty() && !self.device_id.is_empty()
    }
}

/// One sample inside a telemetry message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
}

/// Body of `v1/dev/{deviceId}/telemetry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    #[serde(default)]
    pub seq: Option<i64>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Params>,
}

/// Network link reported in a state message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkState {
    /// `wifi` or `gsm`.
    #[serde(rename = "type", default)]
    pub link_type: String,
    #[serde(default)]
    pub rssi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// Configuration versions reported in a state message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CfgState {
    #[serde(rename = "activeVersion", default)]
    pub active_version: Option<i64>,
    #[serde(rename = "pendingVersion", default)]
    pub pending_version: Option<i64>,
}

/// Body of the retained `v1/dev/{deviceId}/state` topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatePayload {
    /// `online`, `offline`, `degraded` or `error`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub link: Option<LinkState>,
    #[serde(default)]
    pub fw: Option<String>,
    #[serde(rename = "uptimeSec", default)]
    pub uptime_sec: Option<i64>,
    #[serde(default)]
    pub cfg: Option<CfgState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Params>,
}

/// Body of `v1/dev/{deviceId}/event`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<Params>,
}
