//! Runtime devices, the enumeration inventory they are built from, and
//! per-device radio statistics.

use crate::convert::as_number;
use crate::error::Result;
use crate::registry::{BoundEntry, ModelFamily, ResolvedModel, ble, zigbee};
use crate::state::StateDescriptor;
use chrono::{DateTime, FixedOffset, Local};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use strum::{Display, EnumString};

/// `deviceState` reported when a device stops answering.
const DEVICE_STATE_UNRESPONSIVE: i64 = 17;

/// Bit in the ZCL frame control that marks a manufacturer-specific frame.
const MANUFACTURER_SPECIFIC: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceType {
    Gateway,
    Zigbee,
    Lumi,
    Ble,
    Mesh,
}

impl DeviceType {
    /// Devices addressed with property-bag messages.
    pub fn is_property_bag(self) -> bool {
        matches!(self, DeviceType::Lumi | DeviceType::Zigbee)
    }
}

/// Radio statistics of one device, built from `MessageReceived` and
/// `devicestatechange` notifications.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceStats {
    nwk: String,
    received: u64,
    missed: u64,
    unresponsive: u64,
    lqi: i64,
    rssi: i64,
    #[serde(rename = "lastSeen")]
    last_seen: String,
    #[serde(skip)]
    last_seq: Option<(u8, u8)>,
    #[serde(skip)]
    last_missed: u64,
    #[serde(skip)]
    reset_count: Option<Value>,
}

fn int_field(message: &Map<String, Value>, key: &str) -> i64 {
    message.get(key).and_then(as_number).unwrap_or(0.0) as i64
}

/// APS counter, given either as a number or as a `0x` hex string.
fn parse_counter(value: &Value) -> Option<u8> {
    match value {
        Value::String(s) => match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u8::from_str_radix(hex, 16).ok(),
            None => s.trim().parse().ok(),
        },
        other => other.as_u64().map(|n| n as u8),
    }
}

fn hex_byte(payload: &str, index: usize) -> Option<u8> {
    let start = index * 2;
    u8::from_str_radix(payload.get(start..start + 2)?, 16).ok()
}

/// ZCL sequence number of an APS payload. Manufacturer-specific frames
/// carry a two-byte manufacturer code before it.
fn payload_sequence(payload: &str) -> Option<u8> {
    let frame_control = hex_byte(payload, 1)?;
    if frame_control & MANUFACTURER_SPECIFIC != 0 {
        hex_byte(payload, 4)
    } else {
        hex_byte(payload, 2)
    }
}

impl DeviceStats {
    pub fn new(reset_count: Option<Value>) -> Self {
        Self {
            reset_count,
            ..Self::default()
        }
    }

    pub fn update(&mut self, message: &Map<String, Value>) {
        self.update_at(message, Local::now().fixed_offset());
    }

    pub fn update_at(&mut self, message: &Map<String, Value>, now: DateTime<FixedOffset>) {
        if let Some(address) = message.get("sourceAddress") {
            self.nwk = match address {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            self.lqi = int_field(message, "linkQuality");
            self.rssi = int_field(message, "rssi");
            self.received += 1;

            let counter = message.get("APSCounter").and_then(parse_counter);
            let sequence = message
                .get("APSPlayload")
                .and_then(Value::as_str)
                .and_then(payload_sequence);
            match (counter, sequence) {
                (Some(counter), Some(sequence)) => self.track_sequence(counter, sequence),
                _ => error!("[Gateway] Malformed APS fields from {}", self.nwk),
            }

            self.last_seen = now.format("%Y-%m-%dT%H:%M:%S%:z").to_string();
        } else if message.contains_key("ago")
            || message.contains_key("parent")
            || message.contains_key("alive")
        {
            debug!("[Gateway] Ignoring statistics message: {:?}", message);
        } else if let Some(reset) = message.get("reset_cnt") {
            self.reset_count = Some(reset.clone());
        } else if int_field(message, "deviceState") == DEVICE_STATE_UNRESPONSIVE {
            self.unresponsive += 1;
        }
    }

    fn track_sequence(&mut self, counter: u8, sequence: u8) {
        if let Some((last_counter, last_sequence)) = self.last_seq
            && sequence != 0
        {
            let miss = counter
                .wrapping_sub(last_counter)
                .wrapping_sub(1)
                .min(sequence.wrapping_sub(last_sequence).wrapping_sub(1));
            self.missed += u64::from(miss);
            self.last_missed = u64::from(miss);
        }
        self.last_seq = Some((counter, sequence));
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Frames lost between the last two received.
    pub(crate) fn last_missed(&self) -> u64 {
        self.last_missed
    }

    pub fn unresponsive(&self) -> u64 {
        self.unresponsive
    }

    pub(crate) fn reset_count(&self) -> Option<&Value> {
        self.reset_count.as_ref()
    }

    /// Statistics object with the device did, as fed to `messages_stat`.
    pub fn to_value(&self, did: &str) -> Value {
        let mut object = match serde_json::to_value(self) {
            Ok(Value::Object(object)) => object,
            _ => Map::new(),
        };
        object.insert("did".to_string(), Value::String(did.to_string()));
        Value::Object(object)
    }
}

/// One device as listed by the enumeration collaborator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeviceRecord {
    pub did: String,
    pub mac: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub model: String,
    #[serde(default)]
    pub fw_version: Option<String>,
    /// Properties retained by the gateway, keyed by property name
    #[serde(default)]
    pub retained: Map<String, Value>,
}

/// Device enumeration dump.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub gateway: Option<DeviceRecord>,
    #[serde(default)]
    pub devices: Vec<DeviceRecord>,
    /// Raw rows of the BLE pairing table
    #[serde(default)]
    pub ble_rows: Vec<Vec<Value>>,
}

impl Inventory {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Every device record, BLE rows included.
    pub fn records(&self) -> Vec<DeviceRecord> {
        self.gateway
            .iter()
            .cloned()
            .chain(self.devices.iter().cloned())
            .chain(self.ble_rows.iter().filter_map(|row| {
                let projected = project_authed_row(row);
                if projected.is_none() {
                    debug!("[BLE] Skipping malformed pairing row: {:?}", row);
                }
                projected.map(AuthedRow::into_record)
            }))
            .collect()
    }
}

/// Columns of interest in a BLE pairing table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthedRow {
    /// `0x`-prefixed display MAC
    pub mac: String,
    pub pdid: u32,
    pub did: String,
}

impl AuthedRow {
    fn into_record(self) -> DeviceRecord {
        DeviceRecord {
            did: self.did,
            mac: self.mac,
            device_type: DeviceType::Ble,
            model: self.pdid.to_string(),
            fw_version: None,
            retained: Map::new(),
        }
    }
}

/// Project a pairing table row: MAC at column 1 (stored byte-reversed),
/// product id at column 2, did at column 4.
pub fn project_authed_row(row: &[Value]) -> Option<AuthedRow> {
    let mac = row.get(1)?.as_str()?;
    let pdid = match row.get(2)? {
        Value::String(s) => s.trim().parse().ok()?,
        other => u32::try_from(other.as_u64()?).ok()?,
    };
    let did = row.get(4)?.as_str()?;
    Some(AuthedRow {
        mac: format!("0x{}", reverse_mac(mac)),
        pdid,
        did: did.to_string(),
    })
}

/// Reverse the byte order of a MAC written as hex pairs. Separators and
/// case are dropped.
pub fn reverse_mac(mac: &str) -> String {
    let digits: Vec<char> = mac
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    digits
        .chunks_exact(2)
        .rev()
        .flat_map(|pair| pair.iter())
        .collect()
}

/// Display name of BLE devices whose product id has no registry entry.
pub const UNKNOWN_BLE_NAME: &str = "Bluetooth";

/// A device known to the gateway at runtime.
#[derive(Debug, Clone)]
pub struct Device {
    pub did: String,
    pub mac: String,
    pub device_type: DeviceType,
    pub model: String,
    pub name: String,
    pub fw_version: Option<String>,
    pub spec: Vec<BoundEntry>,
    pub stats: DeviceStats,
    /// Sequence number of the last binary event accepted
    pub last_seq: Option<i64>,
    /// Initial state values derived from retained properties
    pub initial: HashMap<String, Value>,
}

impl Device {
    /// Resolve a record against the registries. BLE product ids the
    /// registry does not know get an empty spec; their events still go
    /// through the hardwired table.
    pub fn from_record(record: &DeviceRecord, external: &[ModelFamily], excluded: &[&str]) -> Self {
        let resolved = match record.device_type {
            DeviceType::Ble | DeviceType::Mesh => {
                let pdid = record.model.parse::<u32>().ok();
                match pdid.and_then(ble::get_device) {
                    Some(resolved) => resolved,
                    None => {
                        warn!(
                            "[BLE] {} has an unsupported Bluetooth model: {}",
                            record.did, record.model
                        );
                        ResolvedModel {
                            manufacturer: None,
                            name: UNKNOWN_BLE_NAME.to_string(),
                            model: record.model.clone(),
                            spec: Vec::new(),
                        }
                    }
                }
            }
            _ => zigbee::get_device(&record.model, external),
        };
        let ResolvedModel {
            name, model, spec, ..
        } = resolved.without(excluded);

        let initial = spec
            .iter()
            .filter_map(|entry| {
                let raw = record.retained.get(entry.property.as_deref()?)?;
                let value = entry.state.normalize_left(raw)?;
                Some((entry.state.name().to_string(), value))
            })
            .collect();

        Self {
            did: record.did.clone(),
            mac: record.mac.clone(),
            device_type: record.device_type,
            model,
            name,
            fw_version: record.fw_version.clone(),
            spec,
            stats: DeviceStats::new(record.retained.get("reset_cnt").cloned()),
            last_seq: None,
            initial,
        }
    }

    /// Host-side id: the MAC without its `0x` prefix.
    pub fn object_id(&self) -> &str {
        object_id(&self.mac)
    }

    pub fn state(&self, name: &str) -> Option<&Arc<StateDescriptor>> {
        self.spec
            .iter()
            .map(|entry| &entry.state)
            .find(|state| state.name() == name)
    }
}

pub fn object_id(mac: &str) -> &str {
    mac.strip_prefix("0x").unwrap_or(mac)
}
