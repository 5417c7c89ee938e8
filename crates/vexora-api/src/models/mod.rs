//! Request and response models for the web API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use vexora_devices::{Acknowledgement, ConnectionState, DeviceRecord, DispatchStats, Params};

pub mod error;

pub use error::{ApiResult, ErrorResponse};

/// Body of `POST /api/v1/dev/:device_id/cmd`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendCommandRequest {
    #[serde(rename = "type", default)]
    pub command_type: String,
    #[serde(default)]
    pub params: Params,
    /// Zero, negative or missing selects the default timeout.
    #[serde(default)]
    pub timeout_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendCommandResponse {
    pub ack: Acknowledgement,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub mqtt: ConnectionState,
    pub uptime_secs: u64,
    pub pending_commands: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchStats>,
}

/// Device summary as served by `GET /api/v1/devices`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponse {
    pub device_id: String,
    /// `offline` until the device reports a state.
    pub status: String,
    /// Unix seconds.
    pub last_seen: i64,
    pub fw_version: Option<String>,
}

impl From<&DeviceRecord> for DeviceResponse {
    fn from(record: &DeviceRecord) -> Self {
        Self {
            device_id: record.device_id.clone(),
            status: record
                .status
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "offline".to_string()),
            last_seen: record.last_seen_ts.div_euclid(1000),
            fw_version: record.fw.clone().filter(|fw| !fw.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStateResponse {
    /// Seconds since boot.
    pub uptime: i64,
    pub link: String,
    pub ip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastTelemetryResponse {
    pub ts: i64,
    pub metrics: BTreeMap<String, f64>,
}

/// Body of `GET /api/v1/devices/:device_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetailResponse {
    pub device: DeviceResponse,
    pub state: Option<DeviceStateResponse>,
    pub last_telemetry: Option<LastTelemetryResponse>,
}

impl From<&DeviceRecord> for DeviceDetailResponse {
    fn from(record: &DeviceRecord) -> Self {
        let state = record.last_state_ts.map(|_| DeviceStateResponse {
            uptime: record.uptime_sec.unwrap_or_default(),
            link: record.link.clone().unwrap_or_default(),
            ip: record.ip.clone().unwrap_or_default(),
        });
        let last_telemetry = record
            .last_telemetry
            .as_ref()
            .map(|t| LastTelemetryResponse {
                ts: t.ts,
                metrics: t.metrics.clone(),
            });

        Self {
            device: DeviceResponse::from(record),
            state,
            last_telemetry,
        }
    }
}
