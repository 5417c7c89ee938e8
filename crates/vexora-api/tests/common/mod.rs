//! Common test utilities for API tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use vexora_api::ServerState;
use vexora_devices::{CommandManager, MemoryRegistry, PublishError, Publisher, Qos};

/// Publisher forwarding command payloads to the test.
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<serde_json::Value>,
    fail_with: Option<PublishError>,
}

#[async_trait]
impl Publisher for ChannelPublisher {
    async fn publish(
        &self,
        _topic: &str,
        _qos: Qos,
        _retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), PublishError> {
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        let _ = self.tx.send(serde_json::from_slice(&payload).unwrap());
        Ok(())
    }
}

pub struct TestServer {
    pub state: ServerState,
    pub registry: Arc<MemoryRegistry>,
    pub published: mpsc::UnboundedReceiver<serde_json::Value>,
}

/// Create a server state without a broker connection.
pub fn create_test_server_state(fail_with: Option<PublishError>) -> TestServer {
    let (tx, published) = mpsc::unbounded_channel();
    let publisher = Arc::new(ChannelPublisher { tx, fail_with });
    let commands = Arc::new(CommandManager::new(publisher));
    let registry = Arc::new(MemoryRegistry::new());

    TestServer {
        state: ServerState::new(commands, registry.clone()),
        registry,
        published,
    }
}
