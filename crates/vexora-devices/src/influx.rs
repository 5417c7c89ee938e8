//! InfluxDB v2 sink.
//!
//! Points are encoded as line protocol on the caller's thread and handed to a
//! background writer over a bounded queue; the writer batches whatever is
//! queued and posts it to `/api/v2/write` with millisecond precision.

use crate::sink::{FieldValue, Point};

/// Encode a point as one line of InfluxDB line protocol (ms precision).
///
/// Tags with empty values and non-finite float fields are skipped. Returns
/// `None` when no field survives, since such a line would be rejected.
pub fn to_line_protocol(point: &Point) -> Option<String> {
    let mut fields = Vec::with_capacity(point.fields.len());
    for (key, value) in &point.fields {
        let encoded = match value {
            FieldValue::Float(f) if f.is_finite() => format!("{f:?}"),
            FieldValue::Float(_) => continue,
            FieldValue::Int(i) => format!("{i}i"),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Str(s) => format!("\"{}\"", escape_field_string(s)),
        };
        fields.push(format!("{}={}", escape_key(key), encoded));
    }
    if fields.is_empty() {
        return None;
    }

    let mut line = escape_measurement(&point.measurement);
    for (key, value) in &point.tags {
        if value.is_empty() {
            continue;
        }
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(value));
    }
    line.push(' ');
    line.push_str(&fields.join(","));
    line.push(' ');
    line.push_str(&point.timestamp_millis.to_string());
    Some(line)
}

// Line protocol has no escape for line breaks outside string fields, so they
// become spaces to keep one point per line.
fn strip_line_breaks(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

fn escape_measurement(s: &str) -> String {
    strip_line_breaks(s)
        .replace(',', "\\,")
        .replace(' ', "\\ ")
}

fn escape_key(s: &str) -> String {
    strip_line_breaks(s)
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

fn escape_field_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\r', "\\r")
        .replace('\n', "\\n")
}

#[cfg(feature = "influx")]
pub use writer::InfluxSink;

#[cfg(feature = "influx")]
mod writer {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tracing::{debug, info, warn};

    use super::to_line_protocol;
    use crate::config::InfluxConfig;
    use crate::sink::{Point, SinkError, TimeSeriesSink};

    /// Sink writing to an InfluxDB v2 bucket.
    pub struct InfluxSink {
        tx: mpsc::Sender<String>,
    }

    impl InfluxSink {
        /// Start the background writer. Must be called inside a tokio runtime.
        pub fn spawn(config: &InfluxConfig) -> Result<Self, SinkError> {
            let token = config
                .token
                .clone()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| SinkError::Write("influx token is empty".to_string()))?;

            let client = reqwest::Client::builder()
                .timeout(Duration::from_millis(config.write_timeout_ms))
                .build()
                .map_err(|e| SinkError::Write(e.to_string()))?;

            let target = WriteTarget::new(config, token);
            let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));

            info!(
                url = %config.url,
                org = %config.org,
                bucket = %config.bucket,
                "influx sink enabled"
            );
            tokio::spawn(run_writer(client, target, rx, config.batch_size.max(1)));

            Ok(Self { tx })
        }
    }

    impl TimeSeriesSink for InfluxSink {
        fn write_point(&self, point: Point) -> Result<(), SinkError> {
            let line = to_line_protocol(&point)
                .ok_or_else(|| SinkError::Write("point has no fields".to_string()))?;
            self.tx.try_send(line).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SinkError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
            })
        }
    }

    /// Write endpoint and credentials for one bucket.
    pub(super) struct WriteTarget {
        url: String,
        org: String,
        bucket: String,
        token: String,
    }

    impl WriteTarget {
        pub(super) fn new(config: &InfluxConfig, token: String) -> Self {
            Self {
                url: format!("{}/api/v2/write", config.url.trim_end_matches('/')),
                org: config.org.clone(),
                bucket: config.bucket.clone(),
                token,
            }
        }

        pub(super) fn request(
            &self,
            client: &reqwest::Client,
            body: String,
        ) -> reqwest::RequestBuilder {
            client
                .post(&self.url)
                .query(&[
                    ("org", self.org.as_str()),
                    ("bucket", self.bucket.as_str()),
                    ("precision", "ms"),
                ])
                .header("Authorization", format!("Token {}", self.token))
                .header("Content-Type", "text/plain; charset=utf-8")
                .body(body)
        }
    }

    async fn run_writer(
        client: reqwest::Client,
        target: WriteTarget,
        mut rx: mpsc::Receiver<String>,
        batch_size: usize,
    ) {
        let mut batch = Vec::with_capacity(batch_size);

        while let Some(line) = rx.recv().await {
            batch.push(line);
            while batch.len() < batch_size {
                match rx.try_recv() {
                    Ok(line) => batch.push(line),
                    Err(_) => break,
                }
            }

            let body = batch.join("\n");
            let result = target.request(&client, body).send().await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!(points = batch.len(), "influx batch written");
                }
                Ok(resp) => {
                    warn!(points = batch.len(), status = %resp.status(), "influx write rejected");
                }
                Err(e) => {
                    warn!(points = batch.len(), error = %e, "influx write failed");
                }
            }
            batch.clear();
        }

        debug!("influx writer stopped");
    }
}
