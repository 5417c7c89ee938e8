//! rumqttc binding for the connection manager.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet};

use crate::config::{ConfigError, MqttConfig};
use crate::connection::{
    BrokerClient, BrokerLink, ConnectionManager, ConnectionOptions, LinkEvent, Qos, TransportError,
};

/// Capacity of the client request queue shared with the event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 100;

const MAX_PACKET_SIZE: usize = 1024 * 1024;

impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl MqttConfig {
    pub fn to_mqtt_options(&self) -> Result<MqttOptions, ConfigError> {
        let (host, port) = self.broker_address()?;
        let mut options = MqttOptions::new(self.client_id.clone(), host, port);

        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(5)));
        options.set_clean_session(self.clean_session);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        Ok(options)
    }
}

/// Event loop half of a rumqttc connection.
pub struct RumqttLink {
    eventloop: EventLoop,
}

#[async_trait]
impl BrokerLink for RumqttLink {
    async fn poll(&mut self) -> Result<LinkEvent, TransportError> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    Ok(LinkEvent::ConnAck)
                } else {
                    Err(TransportError::Connection(format!(
                        "connection refused: {:?}",
                        ack.code
                    )))
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => Ok(LinkEvent::Publish {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }),
            Ok(_) => Ok(LinkEvent::Other),
            Err(e) => Err(TransportError::Connection(e.to_string())),
        }
    }
}

/// Request half of a rumqttc connection.
pub struct RumqttClient {
    client: AsyncClient,
}

#[async_trait]
impl BrokerClient for RumqttClient {
    fn try_subscribe(&self, topic: &str, qos: Qos) -> Result<(), TransportError> {
        self.client
            .try_subscribe(topic, qos.into())
            .map_err(|e| TransportError::Subscribe(e.to_string()))
    }

    async fn publish(
        &self,
        topic: &str,
        qos: Qos,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.client
            .publish(topic, qos.into(), retain, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }
}

/// Build a connection manager backed by rumqttc. Nothing is sent until
/// [`ConnectionManager::connect`] is called.
pub fn rumqtt_connection(
    config: &MqttConfig,
    options: ConnectionOptions,
) -> Result<ConnectionManager, ConfigError> {
    let mqtt_options = config.to_mqtt_options()?;
    let (client, eventloop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

    tracing::info!(
        broker = %config.broker_url,
        client_id = %config.client_id,
        username = config.masked_username().as_deref().unwrap_or("-"),
        "mqtt transport configured"
    );

    Ok(ConnectionManager::new(
        Arc::new(RumqttClient { client }),
        Box::new(RumqttLink { eventloop }),
        options,
    ))
}
