//! Inbound message decoding.
//!
//! Property-bag messages are flattened into `(key, value)` pairs and run
//! through every descriptor of the device's spec. Binary events do the
//! same with a single pair and fall back to [`fallback`] when the spec
//! produces nothing.

pub mod fallback;

use crate::convert::as_number;
use crate::registry::BoundEntry;
use crate::state::{DecodedState, WireKey, WirePair};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use strum::{AsRefStr, EnumString};

pub use fallback::{FallbackState, parse_xiaomi_ble};

/// Property-bag command names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Command {
    Heartbeat,
    Report,
    ReadRsp,
    WriteRsp,
    WriteAck,
}

/// A property-bag message as published on `zigbee/send`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PropertyBagMessage {
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub did: Option<String>,
    #[serde(default)]
    pub res_list: Vec<Value>,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub mi_spec: Vec<Value>,
}

/// One parameter record of a property-bag message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParamRecord {
    #[serde(default)]
    pub res_name: Option<String>,
    #[serde(default)]
    pub siid: Option<Value>,
    #[serde(default)]
    pub piid: Option<Value>,
    #[serde(default)]
    pub eiid: Option<Value>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub error_code: Option<Value>,
}

fn id_part(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ParamRecord {
    /// Wire key of the record: resource name, `siid.piid` or `siid.eiid`.
    pub fn key(&self) -> Option<WireKey> {
        if let Some(name) = &self.res_name {
            return Some(WireKey::resource(name));
        }
        let siid = self.siid.as_ref()?;
        let second = self.piid.as_ref().or(self.eiid.as_ref())?;
        Some(WireKey::Resource(format!(
            "{}.{}",
            id_part(siid),
            id_part(second)
        )))
    }

    pub fn failed(&self) -> bool {
        self.error_code
            .as_ref()
            .and_then(as_number)
            .is_some_and(|code| code != 0.0)
    }
}

impl PropertyBagMessage {
    pub fn command(&self) -> Option<Command> {
        self.cmd.as_deref()?.parse().ok()
    }

    /// The report embedded in a heartbeat.
    pub fn heartbeat_report(&self) -> Option<PropertyBagMessage> {
        let inner = self.params.first()?;
        match PropertyBagMessage::deserialize(inner) {
            Ok(mut report) => {
                if self.did.is_some() {
                    report.did = self.did.clone();
                }
                Some(report)
            }
            Err(e) => {
                debug!("[Zigbee] Malformed heartbeat payload: {}", e);
                None
            }
        }
    }

    /// All `(key, value)` pairs carried by the message, in list order.
    ///
    /// Failed records and records without a value are dropped; records
    /// without any usable key are logged and dropped.
    pub fn pairs(&self) -> Vec<WirePair> {
        let mut pairs = Vec::new();
        for raw in self
            .res_list
            .iter()
            .chain(&self.params)
            .chain(&self.results)
            .chain(&self.mi_spec)
        {
            let record = match ParamRecord::deserialize(raw) {
                Ok(record) => record,
                Err(_) => {
                    warn!("[Zigbee] Unsupported param: {}", raw);
                    continue;
                }
            };
            if record.failed() {
                debug!("[Zigbee] Skipping failed param: {}", raw);
                continue;
            }
            let Some(key) = record.key() else {
                warn!("[Zigbee] Unsupported param: {}", raw);
                continue;
            };
            if let Some(value) = record.value {
                pairs.push((key, value));
            }
        }
        pairs
    }
}

/// A binary event as forwarded from the BLE log.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BleEvent {
    pub did: String,
    pub eid: u32,
    pub edata: String,
    #[serde(default)]
    pub pdid: u32,
    #[serde(default)]
    pub seq: Option<i64>,
}

impl BleEvent {
    pub fn pairs(&self) -> Vec<WirePair> {
        vec![(WireKey::Event(self.eid), Value::String(self.edata.clone()))]
    }
}

/// Run `pairs` through every entry of `spec`.
///
/// The result holds each state that produced a value plus every state
/// depending on one of them, once per name and in spec order. When two
/// entries share a name the later value wins.
pub fn decode_pairs(spec: &[BoundEntry], pairs: &[WirePair]) -> Vec<DecodedState> {
    let mut values: Vec<(&str, Value)> = Vec::new();
    for entry in spec {
        let Some(value) = entry.state.decode(pairs) else {
            continue;
        };
        let name = entry.state.name();
        match values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => values.push((name, value)),
        }
    }

    let changed: HashSet<&str> = values.iter().map(|(name, _)| *name).collect();
    let mut seen = HashSet::new();
    spec.iter()
        .filter(|entry| {
            let state = &entry.state;
            changed.contains(state.name())
                || state
                    .depends_on()
                    .iter()
                    .any(|dep| changed.contains(dep.as_str()))
        })
        .filter(|entry| seen.insert(entry.state.name()))
        .map(|entry| DecodedState {
            state: Arc::clone(&entry.state),
            value: values
                .iter()
                .find(|(name, _)| *name == entry.state.name())
                .map(|(_, value)| value.clone()),
        })
        .collect()
}

/// Decode a binary event against a spec, falling back to the hardwired
/// table when the spec yields nothing. Fallback values are mapped to
/// their canonical form.
pub fn decode_ble(spec: &[BoundEntry], event: &BleEvent) -> (Vec<DecodedState>, bool) {
    let decoded = decode_pairs(spec, &event.pairs());
    if !decoded.is_empty() {
        return (decoded, false);
    }

    let fallback = fallback::decode(event.eid, &event.edata, event.pdid)
        .into_iter()
        .filter_map(|state| {
            let value = state.canonical()?;
            Some(DecodedState {
                state: state.state,
                value: Some(value),
            })
        })
        .collect();
    (fallback, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ble, zigbee};
    use serde_json::json;

    fn names(decoded: &[DecodedState]) -> Vec<&str> {
        decoded.iter().map(|d| d.name()).collect()
    }

    fn value_of<'a>(decoded: &'a [DecodedState], name: &str) -> Option<&'a Value> {
        decoded
            .iter()
            .find(|d| d.name() == name)
            .and_then(|d| d.value.as_ref())
    }

    fn message(value: Value) -> PropertyBagMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_command_names() {
        assert_eq!("read_rsp".parse::<Command>().unwrap(), Command::ReadRsp);
        assert_eq!("write_ack".parse::<Command>().unwrap(), Command::WriteAck);
        assert!("discover".parse::<Command>().is_err());
        assert_eq!(message(json!({"cmd": "bogus"})).command(), None);
    }

    #[test]
    fn test_param_keys() {
        let msg = message(json!({
            "cmd": "report",
            "params": [
                {"res_name": "4.1.85", "value": 1},
                {"siid": 2, "piid": 1, "value": 30},
                {"siid": 3, "eiid": 1, "value": []},
                {"res_name": "0.1.85", "value": 5, "error_code": -4001},
                {"res_name": "0.2.85"},
                {"value": 7}
            ]
        }));
        let pairs = msg.pairs();
        assert_eq!(
            pairs,
            vec![
                (WireKey::resource("4.1.85"), json!(1)),
                (WireKey::resource("2.1"), json!(30)),
                (WireKey::resource("3.1"), json!([])),
            ]
        );
    }

    #[test]
    fn test_lists_are_collected_in_order() {
        let msg = message(json!({
            "cmd": "read_rsp",
            "results": [{"res_name": "8.0.2008", "value": 3000}],
            "res_list": [{"res_name": "0.1.85", "value": 2100}],
            "mi_spec": [{"siid": "2", "piid": "1", "value": 10, "error_code": 0}]
        }));
        let keys: Vec<String> = msg.pairs().iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["0.1.85", "8.0.2008", "2.1"]);
    }

    #[test]
    fn test_heartbeat_unwraps_report() {
        let msg = message(json!({
            "cmd": "heartbeat",
            "params": [{"did": "lumi.abc", "res_list": [{"res_name": "8.0.2008", "value": 3100}]}]
        }));
        let report = msg.heartbeat_report().unwrap();
        assert_eq!(report.did.as_deref(), Some("lumi.abc"));
        assert_eq!(report.pairs(), vec![(WireKey::resource("8.0.2008"), json!(3100))]);
    }

    #[test]
    fn test_switch_report() {
        let device = zigbee::get_device("lumi.plug", &[]).without(&["debug_output", "messages_stat"]);
        let msg = message(json!({
            "cmd": "report",
            "did": "lumi.158d0001",
            "params": [{"res_name": "4.1.85", "value": "on"}]
        }));
        let decoded = decode_pairs(&device.spec, &msg.pairs());
        assert_eq!(names(&decoded), vec!["available", "switch"]);
        assert_eq!(value_of(&decoded, "switch"), Some(&json!(true)));
        assert_eq!(value_of(&decoded, "available"), Some(&json!(true)));
    }

    #[test]
    fn test_dependency_expansion() {
        let device = zigbee::get_device("lumi.sensor_motion.aq2", &[])
            .without(&["debug_output", "messages_stat"]);
        let pairs = vec![(WireKey::resource("3.1.85"), json!(1))];
        let decoded = decode_pairs(&device.spec, &pairs);

        assert_eq!(names(&decoded), vec!["available", "occupancy", "no_motion"]);
        assert_eq!(value_of(&decoded, "occupancy"), Some(&json!(true)));
        assert_eq!(value_of(&decoded, "no_motion"), None);
    }

    #[test]
    fn test_unknown_resource_decodes_nothing_specific() {
        let device = zigbee::get_device("lumi.sensor_magnet.aq2", &[])
            .without(&["available", "debug_output", "messages_stat"]);
        let pairs = vec![(WireKey::resource("99.9.99"), json!(1))];
        assert!(decode_pairs(&device.spec, &pairs).is_empty());
    }

    #[test]
    fn test_unknown_model_decodes_nothing() {
        let device = zigbee::get_device("lumi.nonexistent", &[]);
        let pairs = vec![(WireKey::resource("3.1.85"), json!(1))];
        assert!(decode_pairs(&device.spec, &pairs).is_empty());
    }

    #[test]
    fn test_decode_is_repeatable() {
        let device = zigbee::get_device("lumi.weather", &[]);
        let msg = message(json!({
            "cmd": "report",
            "params": [
                {"res_name": "0.1.85", "value": 2350},
                {"res_name": "0.2.85", "value": 5512}
            ]
        }));
        let first: Vec<(String, Option<Value>)> = decode_pairs(&device.spec, &msg.pairs())
            .into_iter()
            .map(|d| (d.name().to_string(), d.value))
            .collect();
        let second: Vec<(String, Option<Value>)> = decode_pairs(&device.spec, &msg.pairs())
            .into_iter()
            .map(|d| (d.name().to_string(), d.value))
            .collect();
        assert_eq!(first, second);
        assert!(first.contains(&("temperature".to_string(), Some(json!(24)))));
    }

    #[test]
    fn test_shared_name_decodes_once() {
        let device = ble::get_device(2701).unwrap().without(&["debug_output"]);
        let event = BleEvent {
            did: "blt.3.abc".to_string(),
            eid: 0x0F,
            edata: "6400".to_string(),
            pdid: 2701,
            seq: Some(1),
        };
        let (decoded, fallback) = decode_ble(&device.spec, &event);
        assert!(!fallback);
        assert_eq!(names(&decoded), vec!["light", "occupancy", "no_motion"]);
        assert_eq!(value_of(&decoded, "light"), Some(&json!(true)));
    }

    #[test]
    fn test_ble_spec_first() {
        let device = ble::get_device(1371).unwrap();
        let event = BleEvent {
            did: "blt.3.th".to_string(),
            eid: 0x100A,
            edata: "64".to_string(),
            pdid: 1371,
            seq: None,
        };
        let (decoded, fallback) = decode_ble(&device.spec, &event);
        assert!(!fallback);
        assert_eq!(value_of(&decoded, "battery"), Some(&json!(100)));
    }

    #[test]
    fn test_ble_fallback() {
        let event = BleEvent {
            did: "blt.3.door".to_string(),
            eid: 0x1019,
            edata: "00".to_string(),
            pdid: 2443,
            seq: None,
        };
        let (decoded, fallback) = decode_ble(&[], &event);
        assert!(fallback);
        assert_eq!(names(&decoded), vec!["contact"]);
        assert_eq!(value_of(&decoded, "contact"), Some(&json!(false)));

        let event = BleEvent {
            edata: "0000".to_string(),
            ..event
        };
        let (decoded, _) = decode_ble(&[], &event);
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_ble_event_from_json() {
        let event: BleEvent = serde_json::from_value(json!({
            "did": "blt.3.abc", "eid": 4100, "edata": "2701", "pdid": 1371, "seq": 42
        }))
        .unwrap();
        assert_eq!(event.eid, 0x1004);
        assert_eq!(event.seq, Some(42));
    }
}
