//! Message-bus input: the gateway's MQTT broker carries zigbee reports,
//! BLE events and radio statistics.

mod client;
mod topic;

pub use client::{MqttClient, MqttMessage, MqttPublisher};
pub use topic::{COMMAND_TOPIC, InboundTopic, SUBSCRIPTION};
