use super::descriptor::{Behavior, DataType, DisplayMeta, StateDescriptor, ValueMap};
use serde::{Deserialize, Serialize};
use serde_json::json;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

/// Every state class a device spec can reference.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StateKind {
    Alarm,
    Available,
    Battery,
    Brightness,
    Button,
    Channel,
    ColorTemperature,
    Conductivity,
    Contact,
    CurtainLevel,
    CurtainMotor,
    DebugOutput,
    Formaldehyde,
    Humidity,
    IdleTime,
    Illuminance,
    Light,
    LinkQuality,
    LoadPower,
    LoadVoltage,
    LockState,
    MessagesStat,
    Moisture,
    NoMotion,
    Occupancy,
    OccupancyTimeout,
    Power,
    Pressure,
    Remaining,
    RunState,
    Switch,
    Temperature,
    Timeout,
    Voltage,
}

impl StateKind {
    /// Unbound template for this kind, with its default name and metadata.
    pub fn descriptor(self) -> StateDescriptor {
        match self {
            StateKind::Alarm => StateDescriptor::new("alarm", DisplayMeta::new("Alarm", "sensor.alarm"))
                .with_value_map(ValueMap::boolean()),
            StateKind::Available => StateDescriptor::new(
                "available",
                DisplayMeta::new("Available", "state")
                    .data_type(DataType::Boolean)
                    .read_only(),
            )
            .with_value_map(ValueMap::boolean()),
            StateKind::Battery => StateDescriptor::new(
                "battery",
                DisplayMeta::new("Battery percent", "value.battery")
                    .unit("%")
                    .range(0.0, 100.0),
            ),
            StateKind::Brightness => StateDescriptor::new(
                "brightness",
                DisplayMeta::new("Light brightness", "value.brightness").unit("lux"),
            ),
            StateKind::Button => {
                StateDescriptor::new("button", DisplayMeta::new("Button", "button"))
                    .with_value_map(ValueMap::boolean())
            }
            StateKind::Channel => StateDescriptor::new(
                "channel_1",
                DisplayMeta::new("Channel 1 switch", "switch"),
            )
            .with_value_map(ValueMap::boolean()),
            StateKind::ColorTemperature => StateDescriptor::new(
                "color_temperature",
                DisplayMeta::new("Color temperature", "level.color.temperature")
                    .unit("K")
                    .range(2200.0, 6500.0),
            ),
            StateKind::Conductivity => StateDescriptor::new(
                "conductivity",
                DisplayMeta::new("Soil EC", "value")
                    .unit("us/cm")
                    .range(0.0, 5000.0),
            ),
            StateKind::Contact => {
                StateDescriptor::new("contact", DisplayMeta::new("Contact", "sensor.door"))
                    .with_value_map(ValueMap::inverted_boolean())
            }
            StateKind::CurtainLevel => StateDescriptor::new(
                "curtain_level",
                DisplayMeta::new("Curtain level", "level.curtain")
                    .unit("%")
                    .range(0.0, 100.0),
            ),
            StateKind::CurtainMotor => StateDescriptor::new(
                "motor_action",
                DisplayMeta::new("Curtain motor action", "state")
                    .data_type(DataType::Number)
                    .enum_labels(&[("0", "close"), ("1", "open"), ("2", "stop")]),
            ),
            StateKind::DebugOutput => StateDescriptor::new(
                "debug_output",
                DisplayMeta::new("Debug output", "state")
                    .data_type(DataType::String)
                    .read_only(),
            )
            .with_depends_on(&["debug_output"])
            .with_behavior(Behavior::DebugAccumulator),
            StateKind::Formaldehyde => StateDescriptor::new(
                "formaldehyde",
                DisplayMeta::new("Formaldehyde concentration", "value").unit("mg/m3"),
            ),
            StateKind::Humidity => StateDescriptor::new(
                "humidity",
                DisplayMeta::new("Humidity", "value.humidity")
                    .unit("%")
                    .range(0.0, 100.0),
            ),
            StateKind::IdleTime => StateDescriptor::new(
                "idle_time",
                DisplayMeta::new("Duration", "value").unit("seconds"),
            ),
            StateKind::Illuminance => StateDescriptor::new(
                "illuminance",
                DisplayMeta::new("Illuminance", "value.brightness").unit("lux"),
            ),
            StateKind::Light => StateDescriptor::new("light", DisplayMeta::new("Light", "sensor.light"))
                .with_value_map(ValueMap::boolean()),
            StateKind::LinkQuality => StateDescriptor::new(
                "link_quality",
                DisplayMeta::new("Link quality", "level")
                    .writable(false)
                    .range(0.0, 255.0),
            ),
            StateKind::LoadPower => StateDescriptor::new(
                "load_power",
                DisplayMeta::new("Load power", "value.power").unit("W"),
            ),
            StateKind::LoadVoltage => StateDescriptor::new(
                "load_voltage",
                DisplayMeta::new("Load voltage", "value.voltage").unit("V"),
            ),
            StateKind::LockState => StateDescriptor::new(
                "lock_state",
                DisplayMeta::new("Lock state", "sensor.lock"),
            ),
            StateKind::MessagesStat => StateDescriptor::new(
                "messages_stat",
                DisplayMeta::new("Messages statistic", "state")
                    .data_type(DataType::String)
                    .read_only(),
            ),
            StateKind::Moisture => StateDescriptor::new(
                "moisture",
                DisplayMeta::new("Humidity percentage", "value")
                    .unit("%")
                    .range(0.0, 100.0),
            ),
            StateKind::NoMotion => StateDescriptor::new(
                "no_motion",
                DisplayMeta::new("Time from last motion", "state")
                    .data_type(DataType::Number)
                    .unit("seconds")
                    .read_only(),
            )
            .with_depends_on(&["occupancy", "occupancy_timeout"])
            .with_behavior(Behavior::NoMotion),
            StateKind::Occupancy => {
                StateDescriptor::new("occupancy", DisplayMeta::new("Occupancy", "sensor.motion"))
                    .with_value_map(ValueMap::boolean())
                    .with_depends_on(&["occupancy", "occupancy_timeout"])
                    .with_behavior(Behavior::Occupancy)
            }
            StateKind::OccupancyTimeout => StateDescriptor::new(
                "occupancy_timeout",
                DisplayMeta::new("Occupancy timeout", "state")
                    .data_type(DataType::Number)
                    .unit("seconds"),
            ),
            StateKind::Power => StateDescriptor::new("power", DisplayMeta::new("Power state", "switch"))
                .with_value_map(ValueMap::boolean()),
            StateKind::Pressure => StateDescriptor::new(
                "pressure",
                DisplayMeta::new("Pressure", "value.pressure")
                    .unit("hPa")
                    .range(0.0, 10000.0),
            ),
            StateKind::Remaining => StateDescriptor::new(
                "remaining",
                DisplayMeta::new("Remaining percentage", "value")
                    .unit("%")
                    .range(0.0, 100.0),
            ),
            StateKind::RunState => StateDescriptor::new(
                "run_state",
                DisplayMeta::new("Run state", "state")
                    .data_type(DataType::String)
                    .writable(false),
            )
            .with_value_map(ValueMap::from_pairs(vec![
                (json!(0), json!("closing")),
                (json!(1), json!("opening")),
                (json!(2), json!("stop")),
            ])),
            StateKind::Switch => StateDescriptor::new("switch", DisplayMeta::new("Switch state", "switch"))
                .with_value_map(ValueMap::boolean()),
            StateKind::Temperature => StateDescriptor::new(
                "temperature",
                DisplayMeta::new("Temperature", "value.temperature").unit("°C"),
            ),
            StateKind::Timeout => StateDescriptor::new(
                "timeout",
                DisplayMeta::new("Timeout", "state")
                    .data_type(DataType::Number)
                    .unit("seconds"),
            ),
            StateKind::Voltage => StateDescriptor::new(
                "voltage",
                DisplayMeta::new("Battery voltage", "value.voltage").unit("V"),
            ),
        }
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Kind whose default state name is `name`.
    pub fn for_state_name(name: &str) -> Option<StateKind> {
        StateKind::iter().find(|kind| kind.descriptor().name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::loose_eq;

    #[test]
    fn test_value_maps_round_trip() {
        for kind in StateKind::iter() {
            let state = kind.descriptor();
            let Some(map) = state.value_map() else {
                continue;
            };
            for outer in map.outer() {
                let canonical = state.normalize_left(outer).unwrap();
                let back = state.normalize_right(&canonical).unwrap();
                assert!(loose_eq(&back, outer), "{:?} {} -> {}", kind, outer, back);
            }
            for canonical in map.canonical() {
                let outer = state.normalize_right(canonical).unwrap();
                let back = state.normalize_left(&outer).unwrap();
                assert!(loose_eq(&back, canonical), "{:?} {} -> {}", kind, canonical, back);
            }
        }
    }

    #[test]
    fn test_state_names_are_unique() {
        let mut names: Vec<String> = StateKind::iter()
            .map(|k| k.descriptor().name().to_string())
            .collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_lookup_by_state_name() {
        assert_eq!(StateKind::for_state_name("water_leak"), None);
        assert_eq!(StateKind::for_state_name("idle_time"), Some(StateKind::IdleTime));
        assert_eq!(StateKind::for_state_name("motor_action"), Some(StateKind::CurtainMotor));
    }

    #[test]
    fn test_contact_is_inverted() {
        let contact = StateKind::Contact.descriptor();
        assert_eq!(contact.normalize_left(&json!(0)), Some(json!(true)));
        assert_eq!(contact.normalize_left(&json!(1)), Some(json!(false)));
    }

    #[test]
    fn test_kind_names_parse_from_json() {
        let kind: StateKind = serde_json::from_value(json!("occupancy_timeout")).unwrap();
        assert_eq!(kind, StateKind::OccupancyTimeout);
        assert_eq!(StateKind::LinkQuality.as_str(), "link_quality");
    }
}
