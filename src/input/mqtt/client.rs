//! MQTT client wrapper for the gateway's built-in broker.

use crate::config::MqttConfig;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Message received from, or to be published to, the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

impl MqttMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

pub struct MqttClient {
    client: AsyncClient,
    event_loop: EventLoop,
}

impl MqttClient {
    pub fn new(config: &MqttConfig) -> Self {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(Duration::from_secs(30));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(options, 100);

        Self { client, event_loop }
    }

    pub async fn subscribe(&self, topic: &str) -> Result<(), rumqttc::ClientError> {
        info!("[MQTT] Subscribing to {}", topic);
        self.client.subscribe(topic, QoS::AtMostOnce).await
    }

    /// Poll the event loop and forward every publish to `tx`.
    ///
    /// `connected` fires on the first broker acknowledgement. Connection
    /// errors are retried every 5 seconds; the loop ends when `tx` closes.
    pub async fn run(mut self, tx: mpsc::Sender<MqttMessage>, connected: Option<oneshot::Sender<()>>) {
        info!("[MQTT] Starting event loop");
        let mut connected = connected;

        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("[MQTT] Connected");
                    if let Some(signal) = connected.take() {
                        let _ = signal.send(());
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let payload = match String::from_utf8(publish.payload.to_vec()) {
                        Ok(s) => s,
                        Err(e) => {
                            warn!("[MQTT] Invalid UTF-8 payload on {}: {}", publish.topic, e);
                            continue;
                        }
                    };

                    debug!("[MQTT] {} {}", publish.topic, payload);

                    if tx.send(MqttMessage::new(publish.topic, payload)).await.is_err() {
                        error!("[MQTT] Message channel closed");
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("[MQTT] Connection error: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    /// A clone of the async client for publishing from other tasks.
    pub fn client(&self) -> AsyncClient {
        self.client.clone()
    }

    /// Publishing handle that outlives [`MqttClient::run`].
    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }
}

/// Sends commands to the gateway while the event loop runs elsewhere.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub async fn publish(&self, message: &MqttMessage) -> Result<(), rumqttc::ClientError> {
        debug!("[MQTT] Publishing to {}: {}", message.topic, message.payload);
        self.client
            .publish(
                message.topic.as_str(),
                QoS::AtMostOnce,
                false,
                message.payload.as_bytes(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_new() {
        let message = MqttMessage::new("zigbee/recv", "{}");
        assert_eq!(message.topic, "zigbee/recv");
        assert_eq!(message.payload, "{}");
    }

    #[test]
    fn test_requests_queue_before_connect() {
        let mqtt = MqttClient::new(&crate::config::Config::default().mqtt);
        let publisher = mqtt.publisher();
        assert!(tokio_test::block_on(mqtt.subscribe("#")).is_ok());
        assert!(
            tokio_test::block_on(publisher.publish(&MqttMessage::new("zigbee/recv", "{}")))
                .is_ok()
        );
    }
}
