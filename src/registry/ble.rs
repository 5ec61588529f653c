//! Binary-event (BLE) model registry, keyed by product id.
//!
//! Most products only carry a description; their events go through the
//! hardwired decoder in [`crate::decoder::fallback`]. Products with a spec
//! decode through it like any property-bag device.

use super::{ModelFamily, ResolvedModel, SpecEntry, resolve};
use crate::convert::{Converter, ModelRef};
use crate::state::StateKind;
use once_cell::sync::Lazy;

static BUILT_IN: Lazy<Vec<ModelFamily>> = Lazy::new(built_in_families);

pub fn built_in() -> &'static [ModelFamily] {
    &BUILT_IN
}

/// Resolve a product id. `None` for products the registry does not know.
pub fn get_device(pdid: u32) -> Option<ResolvedModel> {
    let id = pdid.to_string();
    BUILT_IN.iter().find_map(|family| {
        family
            .info(&id)
            .map(|info| resolve(family, &id, info, ModelRef::Ble(pdid)))
    })
}

fn built_in_families() -> Vec<ModelFamily> {
    vec![
        ModelFamily::new(
            &[
                ("152", "Xiaomi", "Flower Care", Some("HHCCJCY01")),
                ("349", "Xiaomi", "Flower Pot", Some("HHCCPOT002")),
                ("426", "Xiaomi", "TH Sensor", Some("LYWSDCGQ/01ZM")),
                ("794", "Xiaomi", "Door Lock", Some("MJZNMS02LM")),
                ("839", "Xiaomi", "Qingping TH Sensor", Some("CGG1")),
                ("903", "Xiaomi", "ZenMeasure TH", Some("MHO-C401")),
                ("982", "Xiaomi", "Qingping Door Sensor", Some("CGH1")),
                ("1034", "Xiaomi", "Mosquito Repellent", Some("WX08ZM")),
                ("1115", "Xiaomi", "TH Clock", Some("LYWSD02MMC")),
                ("1161", "Xiaomi", "Toothbrush T500", Some("MES601")),
                ("1249", "Xiaomi", "Magic Cube", Some("XMMF01JQD")),
                ("1398", "Xiaomi", "Alarm Clock", Some("CGD1")),
                ("1433", "Xiaomi", "Door Lock", Some("MJZNMS03LM")),
                ("1647", "Xiaomi", "Qingping TH Lite", Some("CGDK2")),
                ("1694", "Aqara", "Door Lock N100", Some("ZNMS16LM")),
                ("1695", "Aqara", "Door Lock N200", Some("ZNMS17LM")),
                ("1747", "Xiaomi", "ZenMeasure Clock", Some("MHO-C303")),
                ("1983", "Yeelight", "Button S1", Some("YLAI003")),
                ("2038", "Xiaomi", "Night Light 2", Some("MJYD02YL-A")),
                ("2147", "Xiaomi", "Water Leak Sensor", Some("SJWS01LM")),
                ("2443", "Xiaomi", "Door Sensor 2", Some("MCCGQ02HL")),
                ("2444", "Xiaomi", "Door Lock", Some("XMZNMST02YD")),
                ("2455", "Honeywell", "Smoke Alarm", Some("JTYJGD03MI")),
                ("2480", "Xiaomi", "Safe Box", Some("BGX-5/X1-3001")),
                ("2691", "Xiaomi", "Qingping Motion Sensor", Some("CGPR1")),
                ("2888", "Xiaomi", "Qingping TH Sensor", Some("CGG1")),
            ],
            Vec::new(),
        ),
        ModelFamily::new(
            &[("1371", "Xiaomi", "TH Sensor 2", Some("LYWSD03MMC"))],
            vec![
                SpecEntry::event(0x100A, StateKind::Battery).converters(&[Converter::BleByte]),
                SpecEntry::event(0x1004, StateKind::Temperature)
                    .converters(&[Converter::BleTemperature]),
                SpecEntry::event(0x1006, StateKind::Humidity)
                    .converters(&[Converter::BleHumidity]),
            ],
        ),
        ModelFamily::new(
            &[("2701", "Xiaomi", "Motion Sensor 2", Some("RTCGQ02LM"))],
            vec![
                SpecEntry::event(0x100A, StateKind::Battery).converters(&[Converter::BleByte]),
                SpecEntry::event(0x1017, StateKind::IdleTime)
                    .converters(&[Converter::BleIdleTime]),
                SpecEntry::event(0x1018, StateKind::Light).converters(&[Converter::BleLight]),
                SpecEntry::event(0x0F, StateKind::Occupancy)
                    .converters(&[Converter::BleOccupancy]),
                SpecEntry::event(0x0F, StateKind::Light).converters(&[Converter::BleMotionLight]),
                SpecEntry::new(None, None, StateKind::NoMotion),
                SpecEntry::new(None, None, StateKind::OccupancyTimeout),
                SpecEntry::new(None, None, StateKind::DebugOutput)
                    .converters(&[Converter::DebugOutput]),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WireKey;
    use serde_json::{Value, json};

    fn event(eid: u32, edata: &str) -> (WireKey, Value) {
        (WireKey::Event(eid), json!(edata))
    }

    #[test]
    fn test_unknown_pdid() {
        assert!(get_device(9999).is_none());
    }

    #[test]
    fn test_description_only_product() {
        let device = get_device(2038).unwrap();
        assert_eq!(device.name, "Xiaomi Night Light 2");
        assert_eq!(device.model, "MJYD02YL-A");
        assert!(device.spec.is_empty());
    }

    #[test]
    fn test_th_sensor_spec() {
        let device = get_device(1371).unwrap();
        let pairs = vec![event(0x1006, "7601"), event(0x100A, "64")];
        assert_eq!(device.state("humidity").unwrap().decode(&pairs), Some(json!(37)));
        assert_eq!(device.state("battery").unwrap().decode(&pairs), Some(json!(100)));
        assert_eq!(device.state("temperature").unwrap().decode(&pairs), None);
    }

    #[test]
    fn test_motion_sensor_spec() {
        let device = get_device(2701).unwrap();
        let names: Vec<&str> = device.spec.iter().map(|e| e.state.name()).collect();
        assert_eq!(
            names,
            vec![
                "battery",
                "idle_time",
                "light",
                "occupancy",
                "light",
                "no_motion",
                "occupancy_timeout",
                "debug_output"
            ]
        );

        let pairs = vec![event(0x0F, "6400")];
        let motion_light = &device.spec[4].state;
        assert_eq!(motion_light.decode(&pairs), Some(json!(true)));
        assert_eq!(device.spec[3].state.decode(&pairs), Some(json!(true)));
        // the 0x1018 light entry ignores 0x0F events
        assert_eq!(device.spec[2].state.decode(&pairs), None);
    }
}
