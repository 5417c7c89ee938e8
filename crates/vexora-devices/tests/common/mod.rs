//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use vexora_devices::{
    AckReceiver, Acknowledgement, BrokerClient, BrokerLink, LinkEvent, MessageHandler,
    PublishError, Publisher, Qos, TransportError,
};

/// A publish seen by a fake.
#[derive(Debug, Clone)]
pub struct Published {
    pub topic: String,
    pub qos: Qos,
    pub retain: bool,
    pub payload: Vec<u8>,
}

impl Published {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap()
    }

    /// Correlation id of a published command.
    pub fn command_id(&self) -> String {
        self.json()["id"].as_str().unwrap().to_string()
    }
}

/// Publisher that reports every publish over a channel.
pub struct RecordingPublisher {
    tx: mpsc::UnboundedSender<Published>,
    fail_with: Option<PublishError>,
}

impl RecordingPublisher {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Published>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx, fail_with: None }), rx)
    }

    pub fn failing(err: PublishError) -> (Arc<Self>, mpsc::UnboundedReceiver<Published>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                fail_with: Some(err),
            }),
            rx,
        )
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), PublishError> {
        let _ = self.tx.send(Published {
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        });
        match &self.fail_with {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Ack receiver that stores what it gets.
#[derive(Default)]
pub struct RecordingAcks {
    pub acks: Mutex<Vec<Acknowledgement>>,
}

impl AckReceiver for RecordingAcks {
    fn on_acknowledge(&self, ack: Acknowledgement) {
        self.acks.lock().push(ack);
    }
}

/// Message handler that stores what it gets.
#[derive(Default)]
pub struct RecordingHandler {
    pub messages: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MessageHandler for RecordingHandler {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        self.messages.lock().push((topic.to_string(), payload.to_vec()));
    }
}

/// Broker link replaying a fixed script of poll results.
///
/// Once the script is exhausted it signals `exhausted` and stays pending.
pub struct ScriptedLink {
    script: VecDeque<Result<LinkEvent, TransportError>>,
    pub polls: Arc<Mutex<Vec<Instant>>>,
    pub exhausted: Arc<Notify>,
}

impl ScriptedLink {
    pub fn new(script: Vec<Result<LinkEvent, TransportError>>) -> Self {
        Self {
            script: script.into(),
            polls: Arc::new(Mutex::new(Vec::new())),
            exhausted: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl BrokerLink for ScriptedLink {
    async fn poll(&mut self) -> Result<LinkEvent, TransportError> {
        self.polls.lock().push(Instant::now());
        match self.script.pop_front() {
            Some(result) => result,
            None => {
                self.exhausted.notify_one();
                std::future::pending().await
            }
        }
    }
}

/// Broker client recording subscriptions and publishes.
#[derive(Default)]
pub struct FakeClient {
    pub subscriptions: Mutex<Vec<String>>,
    pub published: Mutex<Vec<Published>>,
    pub disconnects: Mutex<usize>,
    /// When set, publishes never complete.
    pub stall_publish: bool,
}

#[async_trait]
impl BrokerClient for FakeClient {
    fn try_subscribe(&self, topic: &str, _qos: Qos) -> Result<(), TransportError> {
        self.subscriptions.lock().push(topic.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        if self.stall_publish {
            std::future::pending::<()>().await;
        }
        self.published.lock().push(Published {
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        *self.disconnects.lock() += 1;
        Ok(())
    }
}

pub fn lost() -> Result<LinkEvent, TransportError> {
    Err(TransportError::Connection("connection reset".to_string()))
}

pub fn connack() -> Result<LinkEvent, TransportError> {
    Ok(LinkEvent::ConnAck)
}
