//! Connection & reconnection manager.
//!
//! A single task owns the broker link. It delivers inbound publishes to the
//! message handler, notices connection loss when the link reports an error and
//! reconnects with exponential backoff, re-subscribing to the fixed topic set
//! after every successful (re)connect. Connection state is written only by
//! [`ConnectionManager::connect`] before the task starts and by the task
//! afterwards; everyone else reads snapshots.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{CommandsConfig, ReconnectConfig};
use crate::topics::SUBSCRIPTIONS;

/// MQTT QoS level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Qos {
    AtMostOnce = 0,
    #[default]
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

/// Connection state, owned by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Errors reported by the broker transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("connection manager already started")]
    AlreadyStarted,
}

/// Errors returned to publishers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("not connected to broker")]
    NotConnected,

    #[error("publish failed: {0}")]
    Failed(String),
}

/// Outbound publish interface used by the command manager.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), PublishError>;
}

/// Receiver of inbound publishes. Called inline on the delivery task.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, topic: &str, payload: &[u8]);
}

/// Event produced by one poll of the broker link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The broker accepted the connection.
    ConnAck,
    Publish { topic: String, payload: Vec<u8> },
    Other,
}

/// Receiving half of the broker connection.
///
/// Polling after an error starts a fresh connection attempt.
#[async_trait]
pub trait BrokerLink: Send {
    async fn poll(&mut self) -> Result<LinkEvent, TransportError>;
}

/// Request half of the broker connection.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Queue a subscription without waiting for the transport.
    fn try_subscribe(&self, topic: &str, qos: Qos) -> Result<(), TransportError>;

    async fn publish(
        &self,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl From<&ReconnectConfig> for BackoffConfig {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_ms),
            max: Duration::from_millis(config.max_ms),
        }
    }
}

/// Doubling backoff capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    next: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            next: config.initial,
            config,
        }
    }

    /// Delay to wait after the current failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next.min(self.config.max);
        self.next = delay.saturating_mul(2).min(self.config.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.config.initial;
    }
}

/// Manager settings.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub backoff: BackoffConfig,
    pub subscriptions: Vec<String>,
    pub subscribe_qos: Qos,
    /// Upper bound for handing a publish to the transport.
    pub publish_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            subscriptions: SUBSCRIPTIONS.iter().map(|t| t.to_string()).collect(),
            subscribe_qos: Qos::AtLeastOnce,
            publish_timeout: Duration::from_secs(5),
        }
    }
}

impl ConnectionOptions {
    pub fn from_config(reconnect: &ReconnectConfig, commands: &CommandsConfig) -> Self {
        Self {
            backoff: BackoffConfig::from(reconnect),
            publish_timeout: Duration::from_millis(commands.publish_timeout_ms),
            ..Default::default()
        }
    }
}

/// Owns the single logical broker connection.
pub struct ConnectionManager {
    client: Arc<dyn BrokerClient>,
    link: Mutex<Option<Box<dyn BrokerLink>>>,
    options: ConnectionOptions,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        client: Arc<dyn BrokerClient>,
        link: Box<dyn BrokerLink>,
        options: ConnectionOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            client,
            link: Mutex::new(Some(link)),
            options,
            state_tx,
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Make one connection attempt.
    ///
    /// On success the topic set is subscribed and a background task takes
    /// over the link, delivering messages to `handler` and reconnecting after
    /// every loss. On failure the manager stays disconnected and `connect`
    /// may be called again.
    pub async fn connect(
        self: &Arc<Self>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), TransportError> {
        let mut link = self
            .link
            .lock()
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        self.set_state(ConnectionState::Connecting);
        if let Err(e) = attempt_connect(link.as_mut(), handler.as_ref()).await {
            self.set_state(ConnectionState::Disconnected);
            *self.link.lock() = Some(link);
            return Err(e);
        }

        self.set_state(ConnectionState::Connected);
        self.subscribe_all();
        info!("connected to broker");

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            manager.run(link, handler).await;
        });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Stop the background task and disconnect.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "disconnect failed");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn run(&self, mut link: Box<dyn BrokerLink>, handler: Arc<dyn MessageHandler>) {
        let mut backoff = Backoff::new(self.options.backoff);

        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                event = link.poll() => event,
            };

            match event {
                Ok(LinkEvent::Publish { topic, payload }) => handler.on_message(&topic, &payload),
                Ok(LinkEvent::ConnAck) => {
                    debug!("unexpected connack on established link, re-subscribing");
                    self.subscribe_all();
                }
                Ok(LinkEvent::Other) => {}
                Err(e) => {
                    warn!(error = %e, "broker connection lost");
                    if !self.reconnect(link.as_mut(), handler.as_ref(), &mut backoff).await {
                        break;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        debug!("connection task stopped");
    }

    /// Retry until connected. Returns false when shut down first.
    async fn reconnect(
        &self,
        link: &mut dyn BrokerLink,
        handler: &dyn MessageHandler,
        backoff: &mut Backoff,
    ) -> bool {
        self.set_state(ConnectionState::Reconnecting);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return false,
                result = attempt_connect(link, handler) => result,
            };

            match result {
                Ok(()) => {
                    backoff.reset();
                    self.set_state(ConnectionState::Connected);
                    self.subscribe_all();
                    info!(attempt, "reconnected to broker");
                    return true;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "reconnect attempt failed"
                    );
                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => return false,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn subscribe_all(&self) {
        for topic in &self.options.subscriptions {
            match self.client.try_subscribe(topic, self.options.subscribe_qos) {
                Ok(()) => debug!(topic = %topic, "subscribed"),
                Err(e) => error!(topic = %topic, error = %e, "subscribe failed"),
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "connection state changed");
        }
    }
}

/// Poll until the broker acknowledges the connection.
async fn attempt_connect(
    link: &mut dyn BrokerLink,
    handler: &dyn MessageHandler,
) -> Result<(), TransportError> {
    loop {
        match link.poll().await? {
            LinkEvent::ConnAck => return Ok(()),
            LinkEvent::Publish { topic, payload } => handler.on_message(&topic, &payload),
            LinkEvent::Other => {}
        }
    }
}

#[async_trait]
impl Publisher for ConnectionManager {
    async fn publish(
        &self,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }

        match tokio::time::timeout(
            self.options.publish_timeout,
            self.client.publish(topic, qos, retain, payload),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PublishError::Failed(e.to_string())),
            Err(_) => Err(PublishError::Failed(format!(
                "publish not accepted within {} ms",
                self.options.publish_timeout.as_millis()
            ))),
        }
    }
}
