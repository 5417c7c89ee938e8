//! Wiring of the connection, dispatcher and command manager.

use std::sync::Arc;

use thiserror::Error;

use crate::commands::CommandManager;
use crate::config::{ConfigError, VexoraConfig};
use crate::connection::{ConnectionManager, TransportError};
use crate::dispatch::Dispatcher;
use crate::rate_limit::RateLimiter;
use crate::registry::MemoryRegistry;
use crate::sink::{LogSink, SinkError, TimeSeriesSink};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The running device backend.
#[derive(Clone)]
pub struct DeviceBackend {
    pub connection: Arc<ConnectionManager>,
    pub commands: Arc<CommandManager>,
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<MemoryRegistry>,
}

impl DeviceBackend {
    /// Wire the components around an existing connection manager.
    pub fn assemble(
        config: &VexoraConfig,
        connection: Arc<ConnectionManager>,
        sink: Arc<dyn TimeSeriesSink>,
    ) -> Self {
        let registry = Arc::new(MemoryRegistry::new());
        let commands = Arc::new(CommandManager::with_config(
            connection.clone(),
            &config.commands,
        ));
        let limiter = RateLimiter::new(config.telemetry.min_write_ms)
            .with_soft_capacity(config.telemetry.soft_capacity);
        let dispatcher = Arc::new(Dispatcher::new(
            sink,
            registry.clone(),
            commands.clone(),
            limiter,
        ));

        Self {
            connection,
            commands,
            dispatcher,
            registry,
        }
    }

    /// Build the backend from configuration using rumqttc and, when a token is
    /// configured, the Influx writer. Must be called inside a tokio runtime.
    #[cfg(feature = "mqtt")]
    pub fn from_config(config: &VexoraConfig) -> Result<Self, BackendError> {
        use crate::connection::ConnectionOptions;

        let options = ConnectionOptions::from_config(&config.reconnect, &config.commands);
        let connection = Arc::new(crate::mqtt::rumqtt_connection(&config.mqtt, options)?);
        let sink = time_series_sink(config)?;
        Ok(Self::assemble(config, connection, sink))
    }

    /// Make the initial connection attempt and start the connection task.
    pub async fn start(&self) -> Result<(), BackendError> {
        self.connection.connect(self.dispatcher.clone()).await?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.connection.shutdown().await;
    }
}

/// Influx sink when enabled, otherwise a logging sink.
pub fn time_series_sink(config: &VexoraConfig) -> Result<Arc<dyn TimeSeriesSink>, BackendError> {
    #[cfg(feature = "influx")]
    if config.influx.is_enabled() {
        let sink = crate::influx::InfluxSink::spawn(&config.influx)?;
        return Ok(Arc::new(sink));
    }

    tracing::warn!(
        url = %config.influx.url,
        "influx token not set, time-series points will only be logged"
    );
    Ok(Arc::new(LogSink))
}
