//! Runtime boundary between the message bus and the decode core.
//!
//! [`Gateway`] owns the device table. Inbound messages are routed by topic,
//! decoded against the owning device's spec and handed to the resolver;
//! host writes are encoded into `write` commands for the gateway.

use crate::config::GatewayConfig;
use crate::decoder::{self, BleEvent, Command, PropertyBagMessage, fallback};
use crate::device::{Device, DeviceType, Inventory};
use crate::error::{BridgeError, Result};
use crate::input::mqtt::{COMMAND_TOPIC, InboundTopic, MqttMessage};
use crate::registry::ModelFamily;
use crate::state::{DecodedState, StateSink, TimerRegistry, resolver};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Property-bag did the gateway uses for itself.
const GATEWAY_ALIAS: &str = "lumi.0";

/// Decoded states for one device.
#[derive(Debug, Clone)]
pub struct Update {
    /// Host-side object id
    pub device_id: String,
    pub states: Vec<DecodedState>,
}

impl Update {
    fn new(device: &Device, states: Vec<DecodedState>) -> Option<Self> {
        if states.is_empty() {
            return None;
        }
        Some(Self {
            device_id: device.object_id().to_string(),
            states,
        })
    }
}

/// Did of the device a statistics message is about:
/// `lumi.` followed by the EUI-64 without `0x` and leading zeros.
pub fn stat_did(eui64: &str) -> String {
    let digits = eui64
        .strip_prefix("0x")
        .or_else(|| eui64.strip_prefix("0X"))
        .unwrap_or(eui64);
    format!("lumi.{}", digits.trim_start_matches('0').to_lowercase())
}

pub struct Gateway {
    did: Option<String>,
    devices: HashMap<String, Device>,
    external: Vec<ModelFamily>,
    excluded: Vec<&'static str>,
    debug_output: bool,
    messages_stat: bool,
    state_prefix: String,
}

impl Gateway {
    pub fn new(config: &GatewayConfig, external: Vec<ModelFamily>) -> Self {
        Self {
            did: None,
            devices: HashMap::new(),
            external,
            excluded: config.excluded_states(),
            debug_output: config.debug_output,
            messages_stat: config.messages_stat,
            state_prefix: config.state_prefix.clone(),
        }
    }

    pub fn did(&self) -> Option<&str> {
        self.did.as_deref()
    }

    pub fn device(&self, did: &str) -> Option<&Device> {
        self.devices.get(did)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Register every device of the inventory, create its states on the
    /// host and write the initial values derived from retained properties.
    pub fn setup_devices(&mut self, inventory: &Inventory, sink: &Arc<dyn StateSink>) {
        for record in inventory.records() {
            let device = Device::from_record(&record, &self.external, &self.excluded);

            if device.device_type == DeviceType::Gateway {
                self.did = Some(device.did.clone());
            } else {
                let object_id = device.object_id();
                for entry in &device.spec {
                    sink.ensure_state(object_id, entry.state.name(), &entry.state.state_object());
                }
                for (state, value) in &device.initial {
                    sink.emit(object_id, state, value.clone());
                }
            }

            self.devices.insert(device.did.clone(), device);
        }

        let count = |kind: fn(DeviceType) -> bool| {
            self.devices
                .values()
                .filter(|d| kind(d.device_type))
                .count()
        };
        info!(
            "[Gateway] Loaded devices: lumi - {}, ble - {}",
            count(DeviceType::is_property_bag),
            count(|t| matches!(t, DeviceType::Ble | DeviceType::Mesh))
        );
        for device in self.devices.values() {
            debug!(
                "[Gateway] {}: {} - DID: {}",
                device.device_type.to_string().to_uppercase(),
                device.model,
                device.did
            );
        }
    }

    /// Decode a property-bag message.
    pub fn process_property_bag(&self, message: PropertyBagMessage) -> Option<Update> {
        let Some(command) = message.command() else {
            warn!("[Zigbee] Unsupported cmd: {:?}", message.cmd);
            return None;
        };

        let message = match command {
            Command::WriteAck => return None,
            Command::Heartbeat => message.heartbeat_report()?,
            Command::Report | Command::ReadRsp | Command::WriteRsp => message,
        };

        let from_gateway = message.did.as_deref() == Some(GATEWAY_ALIAS);
        if command == Command::WriteRsp && !from_gateway {
            debug!("[Zigbee] Ignoring write_rsp from {:?}", message.did);
            return None;
        }

        let did = if from_gateway {
            self.did.clone()?
        } else {
            message.did.clone()?
        };
        let Some(device) = self.devices.get(&did) else {
            debug!("[Zigbee] Message for unknown device {}", did);
            return None;
        };

        let states = decoder::decode_pairs(&device.spec, &message.pairs());
        Update::new(device, states)
    }

    /// Decode a binary event. Repeated sequence numbers are dropped.
    pub fn process_ble(&mut self, event: BleEvent) -> Result<Option<Update>> {
        let device = self
            .devices
            .get_mut(&event.did)
            .ok_or_else(|| BridgeError::UnknownDevice(event.did.clone()))?;

        if let Some(seq) = event.seq
            && device.last_seq == Some(seq)
        {
            debug!("[BLE] Duplicate seq {} from {}", seq, event.did);
            return Ok(None);
        }
        device.last_seq = event.seq;

        let (mut states, used_fallback) = decoder::decode_ble(&device.spec, &event);
        if used_fallback {
            if states.is_empty() {
                debug!(
                    "[BLE] No decoder for 0x{:04X} ({} bytes) from pdid {}",
                    event.eid,
                    event.edata.len() / 2,
                    event.pdid
                );
            }
            if self.debug_output
                && let Some(entry) = fallback::debug_entry(event.eid, &event.edata, event.pdid)
            {
                states.push(DecodedState {
                    state: entry.state,
                    value: Some(entry.value),
                });
            }
        }

        Ok(Update::new(device, states))
    }

    /// Fold a radio statistics message into the device's counters.
    pub fn process_message_received(&mut self, message: &Map<String, Value>) -> Option<Update> {
        let eui64 = message.get("eui64")?.as_str()?;
        let did = stat_did(eui64);
        let Some(device) = self.devices.get_mut(&did) else {
            debug!("[Gateway] Statistics for unknown device {}", did);
            return None;
        };

        device.stats.update(message);
        debug!(
            "[Gateway] {}: received {}, missed {} (last {}), resets {}",
            did,
            device.stats.received(),
            device.stats.missed(),
            device.stats.last_missed(),
            device.stats.reset_count().unwrap_or(&Value::Null)
        );

        let state = Arc::clone(device.state("messages_stat")?);
        let value = state.normalize_left(&device.stats.to_value(&did));
        Update::new(device, vec![DecodedState { state, value }])
    }

    /// Build a `write` command for a property-bag device from host values.
    pub fn encode_command(&self, object_id: &str, states: &Map<String, Value>) -> Option<Value> {
        let device = self
            .devices
            .values()
            .find(|d| d.object_id() == object_id && d.device_type.is_property_bag())?;

        let mut payload = Map::new();
        payload.insert("cmd".to_string(), Value::String("write".to_string()));
        payload.insert("did".to_string(), Value::String(device.did.clone()));

        let mut encoded = 0;
        for (name, value) in states {
            let Some(state) = device.state(name) else {
                debug!("[Gateway] {} has no state {}", object_id, name);
                continue;
            };
            if !state.state_object().write {
                warn!("[Gateway] {}.{} is read-only", object_id, name);
                continue;
            }
            let Some(params) = state.encode(value) else {
                continue;
            };
            for (key, list) in params {
                let items = match list {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                match payload.entry(key).or_insert_with(|| Value::Array(Vec::new())) {
                    Value::Array(existing) => existing.extend(items),
                    _ => continue,
                }
            }
            encoded += 1;
        }

        if encoded == 0 {
            debug!("[Gateway] Nothing to write for {}", object_id);
            return None;
        }
        Some(Value::Object(payload))
    }

    /// Route one bus message. Decoded states are applied to `sink`; a
    /// command to publish is returned for host writes.
    pub fn handle_message(
        &mut self,
        topic: &str,
        payload: &str,
        sink: &Arc<dyn StateSink>,
        timers: &mut TimerRegistry,
    ) -> Result<Option<MqttMessage>> {
        let inbound = InboundTopic::classify(topic, &self.state_prefix);
        if !inbound.is_handled() {
            return Ok(None);
        }
        if inbound == InboundTopic::MessageReceived && !self.messages_stat {
            return Ok(None);
        }

        let body: Value = serde_json::from_str(payload)?;
        let Value::Object(object) = body else {
            return Err(BridgeError::InvalidMessage(format!(
                "expected a JSON object on {}",
                topic
            )));
        };

        let update = match inbound {
            InboundTopic::ZigbeeSend => {
                let message: PropertyBagMessage = serde_json::from_value(Value::Object(object))?;
                if message.command().is_none() {
                    return Err(BridgeError::UnsupportedCommand(
                        message.cmd.unwrap_or_default(),
                    ));
                }
                self.process_property_bag(message)
            }
            InboundTopic::BleLog => {
                let event: BleEvent = serde_json::from_value(Value::Object(object))?;
                hex::decode(&event.edata)?;
                self.process_ble(event)?
            }
            InboundTopic::MessageReceived => self.process_message_received(&object),
            InboundTopic::StateSet { object_id } => {
                let command = self.encode_command(object_id, &object);
                return Ok(command.map(|c| MqttMessage::new(COMMAND_TOPIC, c.to_string())));
            }
            InboundTopic::MiioLog | InboundTopic::Heartbeat | InboundTopic::Other => None,
        };

        if let Some(update) = update {
            resolver::apply(&update.device_id, &update.states, sink, timers);
        }
        Ok(None)
    }
}
