//! Shared server state.

use std::sync::Arc;

use vexora_devices::{
    CommandManager, ConnectionManager, ConnectionState, DeviceBackend, DeviceRegistry, Dispatcher,
};

/// Maximum accepted request body.
pub const MAX_REQUEST_BODY_SIZE: usize = 64 * 1024;

/// State handed to every handler.
#[derive(Clone)]
pub struct ServerState {
    pub commands: Arc<CommandManager>,
    pub registry: Arc<dyn DeviceRegistry>,
    pub connection: Option<Arc<ConnectionManager>>,
    pub dispatcher: Option<Arc<Dispatcher>>,
    /// Unix seconds.
    pub started_at: i64,
}

impl ServerState {
    pub fn new(commands: Arc<CommandManager>, registry: Arc<dyn DeviceRegistry>) -> Self {
        Self {
            commands,
            registry,
            connection: None,
            dispatcher: None,
            started_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn from_backend(backend: &DeviceBackend) -> Self {
        Self {
            connection: Some(backend.connection.clone()),
            dispatcher: Some(backend.dispatcher.clone()),
            ..Self::new(backend.commands.clone(), backend.registry.clone())
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map(|c| c.state())
            .unwrap_or(ConnectionState::Disconnected)
    }
}
