//! Device registry collaborator.
//!
//! Tracks presence (first/last seen) and the last reported state of every
//! device the dispatcher hears from.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::Serialize;

/// Presence and state snapshot for one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: String,
    pub first_seen_ts: i64,
    pub last_seen_ts: i64,
    pub status: Option<String>,
    pub link: Option<String>,
    pub ip: Option<String>,
    pub fw: Option<String>,
    pub uptime_sec: Option<i64>,
    pub last_state_ts: Option<i64>,
    pub last_telemetry: Option<TelemetrySnapshot>,
    pub last_source: String,
}

/// Metric values of the most recently received telemetry message.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub ts: i64,
    pub metrics: BTreeMap<String, f64>,
}

/// One state report. `None` keeps the previously known value.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateReport<'a> {
    pub status: &'a str,
    pub link: Option<&'a str>,
    pub ip: Option<&'a str>,
    pub fw: Option<&'a str>,
    pub uptime_sec: Option<i64>,
}

impl<'a> StateReport<'a> {
    pub fn new(status: &'a str) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_link(mut self, link: &'a str) -> Self {
        self.link = Some(link);
        self
    }

    pub fn with_fw(mut self, fw: &'a str) -> Self {
        self.fw = Some(fw);
        self
    }
}

/// Registry interface consumed by the dispatcher.
///
/// Called on the delivery path; implementations must not block on I/O.
/// Non-positive timestamps are replaced by the current time.
pub trait DeviceRegistry: Send + Sync {
    /// Record that the device was seen, creating it when unknown.
    fn touch(&self, device_id: &str, ts_millis: i64, source: &str);

    /// Record a state report.
    fn update_state(&self, device_id: &str, report: StateReport<'_>, ts_millis: i64);

    /// Remember the metrics of the latest telemetry message and touch the device.
    fn record_telemetry(&self, device_id: &str, ts_millis: i64, metrics: &[(&str, f64)]);

    fn mark_offline(&self, device_id: &str, ts_millis: i64, reason: &str);

    fn get(&self, device_id: &str) -> Option<DeviceRecord>;

    /// All known devices ordered by id.
    fn list(&self) -> Vec<DeviceRecord>;
}

fn effective_ts(ts_millis: i64) -> i64 {
    if ts_millis > 0 {
        ts_millis
    } else {
        chrono::Utc::now().timestamp_millis()
    }
}

/// In-memory registry.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    devices: RwLock<HashMap<String, DeviceRecord>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert<F>(&self, device_id: &str, ts: i64, source: &str, update: F)
    where
        F: FnOnce(&mut DeviceRecord),
    {
        if device_id.is_empty() {
            return;
        }
        let mut devices = self.devices.write();
        let record = devices
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceRecord {
                device_id: device_id.to_string(),
                first_seen_ts: ts,
                last_seen_ts: ts,
                status: None,
                link: None,
                ip: None,
                fw: None,
                uptime_sec: None,
                last_state_ts: None,
                last_telemetry: None,
                last_source: source.to_string(),
            });
        record.last_seen_ts = record.last_seen_ts.max(ts);
        record.last_source = source.to_string();
        update(record);
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn touch(&self, device_id: &str, ts_millis: i64, source: &str) {
        self.upsert(device_id, effective_ts(ts_millis), source, |_| {});
    }

    fn update_state(&self, device_id: &str, report: StateReport<'_>, ts_millis: i64) {
        let ts = effective_ts(ts_millis);
        self.upsert(device_id, ts, "state", |record| {
            record.status = Some(report.status.to_string());
            if let Some(link) = report.link {
                record.link = Some(link.to_string());
            }
            if let Some(ip) = report.ip {
                record.ip = Some(ip.to_string());
            }
            if let Some(fw) = report.fw {
                record.fw = Some(fw.to_string());
            }
            if report.uptime_sec.is_some() {
                record.uptime_sec = report.uptime_sec;
            }
            record.last_state_ts = Some(ts);
        });
    }

    fn record_telemetry(&self, device_id: &str, ts_millis: i64, metrics: &[(&str, f64)]) {
        let ts = effective_ts(ts_millis);
        self.upsert(device_id, ts, "telemetry", |record| {
            if metrics.is_empty() {
                return;
            }
            record.last_telemetry = Some(TelemetrySnapshot {
                ts,
                metrics: metrics.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            });
        });
    }

    fn mark_offline(&self, device_id: &str, ts_millis: i64, reason: &str) {
        self.upsert(device_id, effective_ts(ts_millis), reason, |record| {
            record.status = Some("offline".to_string());
        });
    }

    fn get(&self, device_id: &str) -> Option<DeviceRecord> {
        self.devices.read().get(device_id).cloned()
    }

    fn list(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<_> = self.devices.read().values().cloned().collect();
        records.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        records
    }
}
