//! Vexora device backend core.
//!
//! This crate connects the backend to the MQTT broker and implements the
//! device-facing message flow:
//!
//! - [`ConnectionManager`] owns the broker connection, reconnects with
//!   exponential backoff and re-subscribes after every reconnect.
//! - [`Dispatcher`] validates inbound messages, routes them by topic and writes
//!   telemetry, state and events to a [`TimeSeriesSink`] with per-metric rate
//!   limiting.
//! - [`CommandManager`] publishes commands and correlates device
//!   acknowledgements with the waiting callers.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use vexora_devices::{DeviceBackend, Params, VexoraConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = VexoraConfig::load(None)?;
//! let backend = DeviceBackend::from_config(&config)?;
//! backend.start().await?;
//!
//! let ack = backend
//!     .commands
//!     .send("dev-1", "ping", Params::new(), Duration::from_secs(2))
//!     .await?;
//! println!("ok={} code={:?}", ack.ok, ack.code);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod commands;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod influx;
pub mod model;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod rate_limit;
pub mod registry;
pub mod sink;
pub mod topics;
pub mod validate;

pub use backend::{time_series_sink, BackendError, DeviceBackend};
pub use commands::{AckReceiver, CommandError, CommandManager};
pub use config::{ConfigError, MqttConfig, VexoraConfig};
pub use connection::{
    Backoff, BackoffConfig, BrokerClient, BrokerLink, ConnectionManager, ConnectionOptions,
    ConnectionState, LinkEvent, MessageHandler, PublishError, Publisher, Qos, TransportError,
};
pub use dispatch::{DispatchError, DispatchStats, Dispatcher};
pub use model::{Acknowledgement, Command, Envelope, ParamValue, Params};
pub use rate_limit::RateLimiter;
pub use registry::{DeviceRecord, DeviceRegistry, MemoryRegistry, StateReport, TelemetrySnapshot};
pub use sink::{FieldValue, LogSink, MemorySink, Point, SinkError, TimeSeriesSink};
pub use validate::{validate_envelope, EnvelopeError};
