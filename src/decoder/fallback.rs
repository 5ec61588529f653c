//! Hardwired binary-event decoding for products without a usable spec.
//!
//! Fields are selected by event id, exact payload length and, for a few
//! events, the product id. Values are returned as the converters produce
//! them; value maps are applied by the caller when states are emitted.

use crate::convert::{Converter, Length, ModelRef, apply_chain};
use crate::state::{DisplayMeta, StateDescriptor, StateKind, WireKey};
use log::debug;
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Product {
    Any,
    Only(u32),
    Except(u32),
}

impl Product {
    fn accepts(self, pdid: u32) -> bool {
        match self {
            Product::Any => true,
            Product::Only(p) => pdid == p,
            Product::Except(p) => pdid != p,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FallbackField {
    eid: u32,
    length: Length,
    product: Product,
    kind: StateKind,
    rename: Option<(&'static str, &'static str)>,
    converter: Converter,
}

const fn field(eid: u32, length: Length, kind: StateKind, converter: Converter) -> FallbackField {
    FallbackField {
        eid,
        length,
        product: Product::Any,
        kind,
        rename: None,
        converter,
    }
}

const fn alarm(eid: u32, name: &'static str, label: &'static str) -> FallbackField {
    FallbackField {
        rename: Some((name, label)),
        ..field(eid, Length::Exactly(1), StateKind::Alarm, Converter::BleSingleByte)
    }
}

const fn for_product(mut field: FallbackField, product: Product) -> FallbackField {
    field.product = product;
    field
}

const NIGHT_LIGHT: u32 = 2038;
const QINGPING_MOTION: u32 = 2691;

const FIELDS: &[FallbackField] = &[
    field(0x1003, Length::Exactly(1), StateKind::LinkQuality, Converter::BleSingleByte),
    field(0x1004, Length::Exactly(2), StateKind::Temperature, Converter::BleTemperature),
    // kettle: power flag and water temperature
    field(0x1005, Length::Exactly(2), StateKind::Power, Converter::BleByte),
    field(0x1005, Length::Exactly(2), StateKind::Temperature, Converter::BleSecondByte),
    field(0x1006, Length::Exactly(2), StateKind::Humidity, Converter::BleHumidity),
    for_product(
        field(0x1007, Length::Exactly(3), StateKind::Light, Converter::BleIlluminanceOrLight),
        Product::Only(NIGHT_LIGHT),
    ),
    for_product(
        field(0x1007, Length::Exactly(3), StateKind::Illuminance, Converter::BleIlluminanceOrLight),
        Product::Except(NIGHT_LIGHT),
    ),
    field(0x1008, Length::Exactly(1), StateKind::Moisture, Converter::BleByte),
    field(0x1009, Length::Exactly(2), StateKind::Conductivity, Converter::BleConductivity),
    field(0x100A, Length::Any, StateKind::Battery, Converter::BleByte),
    field(0x100D, Length::Exactly(4), StateKind::Temperature, Converter::BleClimateTemperature),
    field(0x100D, Length::Exactly(4), StateKind::Humidity, Converter::BleClimateHumidity),
    field(0x1010, Length::Exactly(2), StateKind::Formaldehyde, Converter::BleFormaldehyde),
    field(0x1013, Length::Exactly(1), StateKind::Remaining, Converter::BleSingleByte),
    alarm(0x1014, "water_leak", "Water leak detected"),
    alarm(0x1015, "smoke", "Smoke detected"),
    alarm(0x1016, "gas", "Gas detected"),
    field(0x1017, Length::Exactly(4), StateKind::IdleTime, Converter::BleIdleTime),
    field(0x1018, Length::Exactly(1), StateKind::Light, Converter::BleLight),
    field(0x1019, Length::Exactly(1), StateKind::Contact, Converter::BleContact),
    field(0x0F, Length::AtMost(6), StateKind::Occupancy, Converter::BleOccupancy),
    for_product(
        field(0x0F, Length::AtMost(6), StateKind::Illuminance, Converter::BleMotionLight),
        Product::Only(QINGPING_MOTION),
    ),
    for_product(
        field(0x0F, Length::AtMost(6), StateKind::Light, Converter::BleMotionLight),
        Product::Except(QINGPING_MOTION),
    ),
];

/// A state decoded by the hardwired table, value not yet mapped.
#[derive(Debug, Clone)]
pub struct FallbackState {
    pub state: Arc<StateDescriptor>,
    pub value: Value,
}

impl FallbackState {
    /// Value as the host sees it, after the state's value map.
    pub fn canonical(&self) -> Option<Value> {
        match self.state.value_map() {
            Some(map) => map.left(&self.value),
            None => Some(self.value.clone()),
        }
    }
}

/// Decode one event. Unknown ids and unexpected lengths produce nothing.
pub fn decode(eid: u32, edata: &str, pdid: u32) -> Vec<FallbackState> {
    let length = match hex::decode(edata) {
        Ok(bytes) => bytes.len(),
        Err(e) => {
            debug!("[BLE] Undecodable payload {:?} for 0x{:04X}: {}", edata, eid, e);
            return Vec::new();
        }
    };

    let raw = Value::String(edata.to_string());
    FIELDS
        .iter()
        .filter(|f| f.eid == eid && f.length.accepts(length) && f.product.accepts(pdid))
        .filter_map(|f| {
            let chain = f.converter.bind(ModelRef::Ble(pdid));
            let value = apply_chain(&chain, &raw)?;

            let mut state = f.kind.descriptor();
            if let Some((name, label)) = f.rename {
                state = state.renamed(name).with_meta(&DisplayMeta {
                    label: Some(label.to_string()),
                    ..DisplayMeta::default()
                });
            }
            let state = state.bind(Some(WireKey::Event(eid)), chain);

            Some(FallbackState {
                state: Arc::new(state),
                value,
            })
        })
        .collect()
}

/// Plain `name -> value` view of [`decode`].
pub fn parse_xiaomi_ble(eid: u32, edata: &str, pdid: u32) -> Vec<(String, Value)> {
    decode(eid, edata, pdid)
        .into_iter()
        .map(|s| (s.state.name().to_string(), s.value))
        .collect()
}

/// The `debug_output` summary for one event.
pub fn debug_entry(eid: u32, edata: &str, pdid: u32) -> Option<FallbackState> {
    let chain = Converter::DebugOutput.bind(ModelRef::Ble(pdid));
    let state = StateKind::DebugOutput.descriptor().bind(None, chain);
    let value = state.decode(&[(WireKey::Event(eid), json!(edata))])?;
    Some(FallbackState {
        state: Arc::new(state),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(eid: u32, edata: &str, pdid: u32) -> Vec<(String, Value)> {
        parse_xiaomi_ble(eid, edata, pdid)
    }

    fn one(name: &str, value: Value) -> Vec<(String, Value)> {
        vec![(name.to_string(), value)]
    }

    #[test]
    fn test_link_quality() {
        assert_eq!(parse(0x1003, "ff", 0), one("link_quality", json!(255)));
    }

    #[test]
    fn test_temperature() {
        assert_eq!(parse(0x1004, "2701", 0), one("temperature", json!(29.5)));
        assert!(parse(0x1004, "270100", 0).is_empty());
    }

    #[test]
    fn test_kettle() {
        assert_eq!(
            parse(0x1005, "0150", 0),
            vec![
                ("power".to_string(), json!(1)),
                ("temperature".to_string(), json!(80)),
            ]
        );
    }

    #[test]
    fn test_humidity() {
        assert_eq!(parse(0x1006, "7601", 0), one("humidity", json!(37.4)));
        assert_eq!(parse(0x1006, "7601", 1371), one("humidity", json!(37)));
    }

    #[test]
    fn test_illuminance_or_light() {
        assert_eq!(parse(0x1007, "a08601", 0), one("illuminance", json!(100000)));
        assert_eq!(parse(0x1007, "a08601", 2038), one("light", json!(1)));
    }

    #[test]
    fn test_single_byte_fields() {
        assert_eq!(parse(0x1008, "63", 0), one("moisture", json!(99)));
        assert_eq!(parse(0x1013, "32", 0), one("remaining", json!(50)));
        assert_eq!(parse(0x1018, "01", 0), one("light", json!(1)));
        assert_eq!(parse(0x100A, "64", 1371), one("battery", json!(100)));
    }

    #[test]
    fn test_conductivity_and_formaldehyde() {
        assert_eq!(parse(0x1009, "fd08", 0), one("conductivity", json!(2301)));
        assert_eq!(parse(0x1010, "0900", 0), one("formaldehyde", json!(0.09)));
    }

    #[test]
    fn test_climate_pair() {
        assert_eq!(
            parse(0x100D, "27017601", 0),
            vec![
                ("temperature".to_string(), json!(29.5)),
                ("humidity".to_string(), json!(37.4)),
            ]
        );
    }

    #[test]
    fn test_alarms_are_renamed() {
        assert_eq!(parse(0x1014, "01", 0), one("water_leak", json!(1)));
        assert_eq!(parse(0x1015, "00", 0), one("smoke", json!(0)));
        let states = decode(0x1016, "01", 0);
        assert_eq!(states[0].state.name(), "gas");
        assert_eq!(states[0].state.meta().label.as_deref(), Some("Gas detected"));
        assert_eq!(states[0].canonical(), Some(json!(true)));
    }

    #[test]
    fn test_idle_time() {
        assert_eq!(parse(0x1017, "3c000000", 0), one("idle_time", json!(60)));
    }

    #[test]
    fn test_contact_is_inverted_before_mapping() {
        assert_eq!(parse(0x1019, "00", 0), one("contact", json!(1)));
        assert_eq!(parse(0x1019, "01", 0), one("contact", json!(0)));
        assert!(parse(0x1019, "02", 0).is_empty());

        let states = decode(0x1019, "01", 0);
        assert_eq!(states[0].canonical(), Some(json!(true)));
    }

    #[test]
    fn test_motion() {
        assert_eq!(
            parse(0x0F, "a08601", 0),
            vec![
                ("occupancy".to_string(), json!(1)),
                ("light".to_string(), json!(1)),
            ]
        );
        assert_eq!(
            parse(0x0F, "6300", 2691),
            vec![
                ("occupancy".to_string(), json!(1)),
                ("illuminance".to_string(), json!(99)),
            ]
        );
        assert!(parse(0x0F, "00000000000000", 0).is_empty());
    }

    #[test]
    fn test_unknown_event_or_bad_payload() {
        assert!(parse(0x1001, "000000", 0).is_empty());
        assert!(parse(0x4242, "01", 0).is_empty());
        assert!(parse(0x1004, "zz", 0).is_empty());
    }

    #[test]
    fn test_debug_entry() {
        let entry = debug_entry(0x1004, "2701", 1371).unwrap();
        let parsed: Value = serde_json::from_str(entry.value.as_str().unwrap()).unwrap();
        assert_eq!(parsed, json!({"model": 1371, "bluetooth": [4100]}));
    }
}
