//! Command/acknowledgement correlation.
//!
//! Every command gets a fresh correlation id and a single-slot rendezvous
//! registered in the pending map. The dispatcher hands acknowledgements to
//! [`CommandManager::on_acknowledge`], which forwards them to the matching
//! slot without ever blocking. The sender races the slot against its deadline
//! and an optional cancellation token. The pending entry is removed exactly
//! once on every exit path, including when the sending future is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CommandsConfig;
use crate::connection::{PublishError, Publisher, Qos};
use crate::model::{Acknowledgement, Command, Params, PROTOCOL_VERSION};
use crate::topics::command_topic;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors returned by [`CommandManager::send`].
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid command request: {0}")]
    InvalidRequest(String),

    #[error("not connected to broker")]
    NotConnected,

    #[error("failed to publish command: {0}")]
    PublishFailed(String),

    /// Carries the synthetic negative acknowledgement.
    #[error("command timed out after {} ms", .timeout.as_millis())]
    Timeout {
        ack: Box<Acknowledgement>,
        timeout: Duration,
    },

    #[error("invalid acknowledgement: missing id or deviceId")]
    InvalidAcknowledgement,

    #[error("command cancelled")]
    Cancelled,

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CommandError {
    /// Synthetic acknowledgement attached to a timeout.
    pub fn timeout_ack(&self) -> Option<&Acknowledgement> {
        match self {
            Self::Timeout { ack, .. } => Some(ack),
            _ => None,
        }
    }
}

impl From<PublishError> for CommandError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::NotConnected => Self::NotConnected,
            PublishError::Failed(msg) => Self::PublishFailed(msg),
        }
    }
}

/// Receiver of acknowledgements decoded by the dispatcher.
pub trait AckReceiver: Send + Sync {
    fn on_acknowledge(&self, ack: Acknowledgement);
}

type PendingMap = HashMap<String, mpsc::Sender<Acknowledgement>>;

/// Publishes commands and correlates acknowledgements with waiting senders.
pub struct CommandManager {
    publisher: Arc<dyn Publisher>,
    pending: Mutex<PendingMap>,
    default_timeout: Duration,
}

impl CommandManager {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            pending: Mutex::new(HashMap::new()),
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_config(publisher: Arc<dyn Publisher>, config: &CommandsConfig) -> Self {
        let default_timeout = match config.default_timeout_ms {
            0 => DEFAULT_COMMAND_TIMEOUT,
            ms => Duration::from_millis(ms),
        };
        Self {
            default_timeout,
            ..Self::new(publisher)
        }
    }

    /// Number of commands awaiting an acknowledgement.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.pending.lock().contains_key(correlation_id)
    }

    /// Send a command and wait for its acknowledgement.
    ///
    /// A zero `timeout` uses the configured default.
    pub async fn send(
        &self,
        device_id: &str,
        command_type: &str,
        params: Params,
        timeout: Duration,
    ) -> Result<Acknowledgement, CommandError> {
        self.send_with_cancel(device_id, command_type, params, timeout, None)
            .await
    }

    /// Like [`send`](Self::send), additionally returning
    /// [`CommandError::Cancelled`] as soon as `cancel` fires.
    pub async fn send_with_cancel(
        &self,
        device_id: &str,
        command_type: &str,
        params: Params,
        timeout: Duration,
        cancel: Option<CancellationToken>,
    ) -> Result<Acknowledgement, CommandError> {
        let device_id = device_id.trim();
        let command_type = command_type.trim();
        if device_id.is_empty() {
            return Err(CommandError::InvalidRequest("deviceId is required".into()));
        }
        if command_type.is_empty() {
            return Err(CommandError::InvalidRequest("type is required".into()));
        }
        let timeout = if timeout.is_zero() {
            self.default_timeout
        } else {
            timeout
        };

        let command = Command {
            v: PROTOCOL_VERSION,
            id: Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            ts: chrono::Utc::now().timestamp_millis(),
            command_type: command_type.to_string(),
            params,
        };
        let payload = serde_json::to_vec(&command)?;
        let correlation_id = command.id;

        let (tx, mut rx) = mpsc::channel(1);
        self.pending.lock().insert(correlation_id.clone(), tx);
        let _cleanup = scopeguard::guard(correlation_id.clone(), |id| {
            self.pending.lock().remove(&id);
        });

        let topic = command_topic(device_id);
        if let Err(e) = self
            .publisher
            .publish(&topic, Qos::AtLeastOnce, false, payload)
            .await
        {
            warn!(
                device_id = %device_id,
                command_id = %correlation_id,
                error = %e,
                "command publish failed"
            );
            return Err(e.into());
        }
        debug!(
            device_id = %device_id,
            command_id = %correlation_id,
            command_type = %command_type,
            timeout_ms = timeout.as_millis() as u64,
            "command published"
        );

        let cancel = cancel.unwrap_or_default();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(command_id = %correlation_id, "command cancelled");
                Err(CommandError::Cancelled)
            }
            received = rx.recv() => match received {
                Some(ack) if ack.is_identified() => {
                    info!(
                        device_id = %device_id,
                        command_id = %correlation_id,
                        ok = ack.ok,
                        code = ack.code.as_deref().unwrap_or(""),
                        "command acknowledged"
                    );
                    Ok(ack)
                }
                Some(_) => Err(CommandError::InvalidAcknowledgement),
                // The sender lives in the pending map until cleanup runs.
                None => Err(CommandError::Cancelled),
            },
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    device_id = %device_id,
                    command_id = %correlation_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "command timed out"
                );
                let ack = Acknowledgement::timeout(
                    &correlation_id,
                    device_id,
                    chrono::Utc::now().timestamp_millis(),
                );
                Err(CommandError::Timeout {
                    ack: Box::new(ack),
                    timeout,
                })
            }
        }
    }

    /// Hand an acknowledgement to its waiter. Unknown, late and duplicate
    /// acknowledgements are dropped.
    pub fn on_acknowledge(&self, ack: Acknowledgement) {
        if ack.id.is_empty() {
            debug!(device_id = %ack.device_id, "acknowledgement without id dropped");
            return;
        }

        let pending = self.pending.lock();
        let Some(slot) = pending.get(&ack.id) else {
            debug!(command_id = %ack.id, "no pending command for acknowledgement");
            return;
        };
        let command_id = ack.id.clone();
        if slot.try_send(ack).is_err() {
            debug!(command_id = %command_id, "duplicate acknowledgement dropped");
        }
    }
}

impl AckReceiver for CommandManager {
    fn on_acknowledge(&self, ack: Acknowledgement) {
        CommandManager::on_acknowledge(self, ack);
    }
}
