//! Inbound message dispatcher.
//!
//! Decodes and validates the envelope of every inbound message, routes it by
//! topic suffix and forwards the result to the sink, the registry or the
//! acknowledgement receiver. Invalid input is logged and dropped; nothing is
//! reported back to the transport. All work is bounded and in-memory.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::commands::AckReceiver;
use crate::connection::MessageHandler;
use crate::model::{Acknowledgement, Envelope, EventPayload, StatePayload, TelemetryPayload};
use crate::rate_limit::RateLimiter;
use crate::registry::{DeviceRegistry, StateReport};
use crate::sink::{Point, TimeSeriesSink};
use crate::topics::{device_id_from_topic, TopicKind};
use crate::validate::{validate_envelope, EnvelopeError};

pub const MEASUREMENT_TELEMETRY: &str = "telemetry";
pub const MEASUREMENT_STATE: &str = "state";
pub const MEASUREMENT_EVENT: &str = "event";

/// Field written when a state or event record carries no other field.
pub const SENTINEL_FIELD: &str = "seen";

const LOG_PAYLOAD_LIMIT: usize = 512;

/// Reasons an inbound message is dropped.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(#[from] EnvelopeError),
}

/// Counters since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    pub received: u64,
    pub rejected: u64,
    pub points_written: u64,
    pub points_suppressed: u64,
    pub sink_errors: u64,
    pub acks_forwarded: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    rejected: AtomicU64,
    points_written: AtomicU64,
    points_suppressed: AtomicU64,
    sink_errors: AtomicU64,
    acks_forwarded: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub struct Dispatcher {
    sink: Arc<dyn TimeSeriesSink>,
    registry: Arc<dyn DeviceRegistry>,
    acks: Arc<dyn AckReceiver>,
    limiter: RateLimiter,
    counters: Counters,
}

impl Dispatcher {
    pub fn new(
        sink: Arc<dyn TimeSeriesSink>,
        registry: Arc<dyn DeviceRegistry>,
        acks: Arc<dyn AckReceiver>,
        limiter: RateLimiter,
    ) -> Self {
        info!(
            min_write_ms = limiter.min_interval_ms(),
            "telemetry rate limit configured"
        );
        Self {
            sink,
            registry,
            acks,
            limiter,
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.counters;
        DispatchStats {
            received: c.received.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            points_written: c.points_written.load(Ordering::Relaxed),
            points_suppressed: c.points_suppressed.load(Ordering::Relaxed),
            sink_errors: c.sink_errors.load(Ordering::Relaxed),
            acks_forwarded: c.acks_forwarded.load(Ordering::Relaxed),
        }
    }

    /// Entry point for every inbound message.
    pub fn on_message(&self, topic: &str, payload: &[u8]) {
        bump(&self.counters.received);
        let kind = TopicKind::classify(topic);

        // Last-will payloads are plain text, not envelopes.
        if kind == TopicKind::LastWill {
            self.handle_last_will(topic, payload);
            return;
        }

        if let Err(e) = self.dispatch(topic, kind, payload) {
            bump(&self.counters.rejected);
            warn!(
                topic = %topic,
                error = %e,
                payload = %truncate(payload, LOG_PAYLOAD_LIMIT),
                "inbound message dropped"
            );
        }
    }

    fn dispatch(&self, topic: &str, kind: TopicKind, payload: &[u8]) -> Result<(), DispatchError> {
        let envelope: Envelope = serde_json::from_slice(payload)?;
        validate_envelope(&envelope)?;

        trace!(
            topic = %topic,
            device_id = %envelope.device_id,
            ts = envelope.ts,
            size = payload.len(),
            "inbound message"
        );

        match kind {
            TopicKind::Telemetry => {
                let telemetry: TelemetryPayload = serde_json::from_slice(payload)?;
                {
                    let latest: Vec<(&str, f64)> = telemetry
                        .metrics
                        .iter()
                        .map(|m| (m.key.trim(), m.value))
                        .filter(|(key, _)| !key.is_empty())
                        .collect();
                    self.registry
                        .record_telemetry(&envelope.device_id, envelope.ts, &latest);
                }
                self.handle_telemetry(topic, &envelope, telemetry);
            }
            TopicKind::State => {
                self.handle_state(&envelope, serde_json::from_slice(payload)?);
            }
            TopicKind::Event => {
                let event: EventPayload = serde_json::from_slice(payload)?;
                self.registry.touch(&envelope.device_id, envelope.ts, kind.as_str());
                self.handle_event(&envelope, event);
            }
            TopicKind::Ack => {
                let ack: Acknowledgement = serde_json::from_slice(payload)?;
                self.registry.touch(&envelope.device_id, envelope.ts, kind.as_str());
                debug!(
                    device_id = %envelope.device_id,
                    command_id = %ack.id,
                    ok = ack.ok,
                    "acknowledgement received"
                );
                bump(&self.counters.acks_forwarded);
                self.acks.on_acknowledge(ack);
            }
            TopicKind::ConfigStatus => {
                self.registry.touch(&envelope.device_id, envelope.ts, kind.as_str());
                info!(
                    device_id = %envelope.device_id,
                    ts = envelope.ts,
                    size = payload.len(),
                    "config status received"
                );
            }
            TopicKind::Other | TopicKind::LastWill => {
                debug!(
                    topic = %topic,
                    device_id = %envelope.device_id,
                    size = payload.len(),
                    "unhandled topic"
                );
            }
        }
        Ok(())
    }

    fn handle_telemetry(&self, topic: &str, envelope: &Envelope, telemetry: TelemetryPayload) {
        if telemetry.metrics.is_empty() {
            debug!(topic = %topic, device_id = %envelope.device_id, "telemetry without metrics");
            return;
        }

        let mut written = 0usize;
        for metric in &telemetry.metrics {
            let key = metric.key.trim();
            if key.is_empty() {
                continue;
            }
            if !self.limiter.allow(&envelope.device_id, key, envelope.ts) {
                bump(&self.counters.points_suppressed);
                continue;
            }

            let mut point = Point::new(MEASUREMENT_TELEMETRY, envelope.ts)
                .tag("deviceId", envelope.device_id.as_str())
                .tag("metric", key)
                .field("value", metric.value);
            if !metric.unit.is_empty() {
                point = point.tag("unit", metric.unit.as_str());
            }
            if self.write(point) {
                written += 1;
            }
        }

        debug!(
            topic = %topic,
            device_id = %envelope.device_id,
            metrics = telemetry.metrics.len(),
            written,
            "telemetry stored"
        );
    }

    fn handle_state(&self, envelope: &Envelope, state: StatePayload) {
        let link_type = state
            .link
            .as_ref()
            .map(|l| l.link_type.as_str())
            .filter(|t| !t.is_empty());
        let fw = state.fw.as_deref().filter(|f| !f.is_empty());
        let ip = state
            .link
            .as_ref()
            .and_then(|l| l.ip.as_deref())
            .filter(|ip| !ip.is_empty());

        debug!(
            device_id = %envelope.device_id,
            status = %state.status,
            ts = envelope.ts,
            "state received"
        );
        let report = StateReport {
            status: &state.status,
            link: link_type,
            ip,
            fw,
            uptime_sec: state.uptime_sec,
        };
        self.registry
            .update_state(&envelope.device_id, report, envelope.ts);

        let mut point =
            Point::new(MEASUREMENT_STATE, envelope.ts).tag("deviceId", envelope.device_id.as_str());
        if !state.status.is_empty() {
            point = point.tag("status", state.status.as_str());
        }
        if let Some(link_type) = link_type {
            point = point.tag("link", link_type);
        }

        if let Some(link) = &state.link {
            if let Some(rssi) = link.rssi {
                point = point.field("rssi", rssi);
            }
        }
        if let Some(ip) = ip {
            point = point.field("ip", ip);
        }
        if let Some(fw) = fw {
            point = point.field("fw", fw);
        }
        if let Some(uptime) = state.uptime_sec {
            point = point.field("uptimeSec", uptime);
        }
        if let Some(cfg) = &state.cfg {
            if let Some(active) = cfg.active_version {
                point = point.field("cfgActiveVersion", active);
            }
            if let Some(pending) = cfg.pending_version {
                point = point.field("cfgPendingVersion", pending);
            }
        }

        self.write(with_sentinel(point));
    }

    fn handle_event(&self, envelope: &Envelope, event: EventPayload) {
        debug!(
            device_id = %envelope.device_id,
            code = %event.code,
            ts = envelope.ts,
            "event received"
        );

        let mut point =
            Point::new(MEASUREMENT_EVENT, envelope.ts).tag("deviceId", envelope.device_id.as_str());
        if !event.code.is_empty() {
            point = point.tag("code", event.code.as_str());
        }
        if let Some(severity) = event.severity.as_deref().filter(|s| !s.is_empty()) {
            point = point.tag("severity", severity);
        }

        if let Some(msg) = event.msg.as_deref().filter(|m| !m.is_empty()) {
            point = point.field("msg", msg);
        }
        if let Some(data) = event.data.as_ref().filter(|d| !d.is_empty()) {
            match serde_json::to_string(data) {
                Ok(json) => point = point.field("data", json),
                Err(e) => debug!(error = %e, "event data not serializable"),
            }
        }

        self.write(with_sentinel(point));
    }

    fn handle_last_will(&self, topic: &str, payload: &[u8]) {
        let Some(device_id) = device_id_from_topic(topic) else {
            bump(&self.counters.rejected);
            debug!(topic = %topic, "last-will topic without device id");
            return;
        };

        let now = chrono::Utc::now().timestamp_millis();
        match String::from_utf8_lossy(payload).trim() {
            "offline" => {
                info!(device_id = %device_id, "device offline (last will)");
                self.registry.mark_offline(device_id, now, "lwt");
            }
            "online" => {
                debug!(device_id = %device_id, "device online (last will)");
                self.registry.touch(device_id, now, "lwt");
            }
            other => {
                bump(&self.counters.rejected);
                debug!(device_id = %device_id, payload = %other, "unknown last-will payload");
            }
        }
    }

    /// Returns whether the sink accepted the point.
    fn write(&self, point: Point) -> bool {
        let measurement = point.measurement.clone();
        match self.sink.write_point(point) {
            Ok(()) => {
                bump(&self.counters.points_written);
                true
            }
            Err(e) => {
                bump(&self.counters.sink_errors);
                warn!(measurement = %measurement, error = %e, "time-series write failed");
                false
            }
        }
    }
}

impl MessageHandler for Dispatcher {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        Dispatcher::on_message(self, topic, payload);
    }
}

fn with_sentinel(point: Point) -> Point {
    if point.fields.is_empty() {
        point.field(SENTINEL_FIELD, 1i64)
    } else {
        point
    }
}

fn truncate(payload: &[u8], limit: usize) -> String {
    if payload.len() <= limit {
        String::from_utf8_lossy(payload).into_owned()
    } else {
        format!("{}...(truncated)", String::from_utf8_lossy(&payload[..limit]))
    }
}
