//! Host-side state storage.
//!
//! [`StateSink`] is everything the resolver needs from the host: create a
//! state object, write a value, and read back what is stored for a device.
//! [`MemoryStore`] keeps values in memory and can mirror every write to
//! retained MQTT topics under a prefix.

use super::descriptor::StateObject;
use log::{debug, warn};
use parking_lot::RwLock;
use rumqttc::{AsyncClient, QoS};
use serde_json::Value;
use std::collections::HashMap;

pub trait StateSink: Send + Sync {
    /// Create the state if it does not exist yet. Existing objects are kept.
    fn ensure_state(&self, device_id: &str, state: &str, object: &StateObject);

    /// Store a new value.
    fn emit(&self, device_id: &str, state: &str, value: Value);

    /// Currently stored values of a device, keyed by state name.
    fn current_values(&self, device_id: &str) -> HashMap<String, Value>;
}

/// One recorded write.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub device_id: String,
    pub state: String,
    pub value: Value,
}

struct Publisher {
    client: AsyncClient,
    prefix: String,
}

#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, HashMap<String, Value>>>,
    objects: RwLock<HashMap<String, HashMap<String, StateObject>>>,
    history: Option<RwLock<Vec<Emission>>>,
    publisher: Option<Publisher>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that also keeps every emission in order.
    pub fn recording() -> Self {
        Self {
            history: Some(RwLock::new(Vec::new())),
            ..Self::default()
        }
    }

    /// Mirror state objects and values to `<prefix>/<device>/<state>`.
    pub fn with_publisher(mut self, client: AsyncClient, prefix: &str) -> Self {
        self.publisher = Some(Publisher {
            client,
            prefix: prefix.trim_end_matches('/').to_string(),
        });
        self
    }

    pub fn value(&self, device_id: &str, state: &str) -> Option<Value> {
        self.values
            .read()
            .get(device_id)
            .and_then(|states| states.get(state))
            .cloned()
    }

    pub fn object(&self, device_id: &str, state: &str) -> Option<StateObject> {
        self.objects
            .read()
            .get(device_id)
            .and_then(|objects| objects.get(state))
            .cloned()
    }

    pub fn history(&self) -> Vec<Emission> {
        self.history
            .as_ref()
            .map(|h| h.read().clone())
            .unwrap_or_default()
    }

    /// Recorded values of one state, oldest first.
    pub fn values_of(&self, device_id: &str, state: &str) -> Vec<Value> {
        self.history()
            .into_iter()
            .filter(|e| e.device_id == device_id && e.state == state)
            .map(|e| e.value)
            .collect()
    }

    fn publish(&self, topic: String, payload: String) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let topic = format!("{}/{}", publisher.prefix, topic);
        debug!("[State] Publishing {} = {}", topic, payload);
        if let Err(e) = publisher
            .client
            .try_publish(topic, QoS::AtLeastOnce, true, payload.into_bytes())
        {
            warn!("[State] Failed to publish state: {}", e);
        }
    }
}

impl StateSink for MemoryStore {
    fn ensure_state(&self, device_id: &str, state: &str, object: &StateObject) {
        let created = {
            let mut objects = self.objects.write();
            let device = objects.entry(device_id.to_string()).or_default();
            if device.contains_key(state) {
                false
            } else {
                device.insert(state.to_string(), object.clone());
                true
            }
        };

        if created {
            debug!("[State] Created {}.{}", device_id, state);
            match serde_json::to_string(object) {
                Ok(meta) => self.publish(format!("{}/{}/$meta", device_id, state), meta),
                Err(e) => warn!("[State] Cannot serialize metadata of {}: {}", state, e),
            }
        }
    }

    fn emit(&self, device_id: &str, state: &str, value: Value) {
        debug!("[State] {}.{} = {}", device_id, state, value);
        self.publish(format!("{}/{}", device_id, state), value.to_string());

        if let Some(history) = &self.history {
            history.write().push(Emission {
                device_id: device_id.to_string(),
                state: state.to_string(),
                value: value.clone(),
            });
        }

        self.values
            .write()
            .entry(device_id.to_string())
            .or_default()
            .insert(state.to_string(), value);
    }

    fn current_values(&self, device_id: &str) -> HashMap<String, Value> {
        self.values
            .read()
            .get(device_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::catalogue::StateKind;
    use serde_json::json;

    #[test]
    fn test_emit_updates_values_and_history() {
        let store = MemoryStore::recording();
        store.emit("abc", "temperature", json!(21));
        store.emit("abc", "temperature", json!(22));
        store.emit("def", "humidity", json!(40));

        assert_eq!(store.value("abc", "temperature"), Some(json!(22)));
        assert_eq!(store.values_of("abc", "temperature"), vec![json!(21), json!(22)]);
        assert_eq!(store.current_values("def").len(), 1);
        assert!(store.current_values("zzz").is_empty());
    }

    #[test]
    fn test_ensure_state_keeps_first_object() {
        let store = MemoryStore::new();
        let first = StateKind::Switch.descriptor().state_object();
        let second = StateKind::Battery.descriptor().state_object();

        store.ensure_state("abc", "switch", &first);
        store.ensure_state("abc", "switch", &second);
        assert_eq!(store.object("abc", "switch"), Some(first));
    }

    #[test]
    fn test_plain_store_keeps_no_history() {
        let store = MemoryStore::new();
        store.emit("abc", "switch", json!(true));
        assert!(store.history().is_empty());
        assert_eq!(store.value("abc", "switch"), Some(json!(true)));
    }
}
